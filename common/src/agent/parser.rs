use crate::error::{AskJsonError, ExtractionError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

static FENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```([^\n`]*)\n(.*?)```").unwrap()
});

/// sql plus the model's explanation of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedQuery {
    pub sql: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FencedBlock<'a> {
    /// first word of the info string, lowercased
    tag: String,
    body: &'a str,
}

fn fenced_blocks(raw: &str) -> (Vec<FencedBlock<'_>>, String) {
    let mut blocks = Vec::new();
    let mut outside = String::new();
    let mut last_end = 0;

    for caps in FENCE_REGEX.captures_iter(raw) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(2)) else {
            continue;
        };

        let tag = caps
            .get(1)
            .and_then(|m| m.as_str().split_whitespace().next())
            .unwrap_or("")
            .to_lowercase();

        outside.push_str(&raw[last_end..whole.start()]);
        last_end = whole.end();

        blocks.push(FencedBlock {
            tag,
            body: body.as_str(),
        });
    }

    outside.push_str(&raw[last_end..]);
    (blocks, outside)
}

fn normalize_sql(body: &str) -> String {
    body.trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string()
}

/// pull the query and explanation out of a model reply
///
/// Only fences tagged `sql` or `sqlite` count; the first one wins. The
/// explanation comes from an `explanation` fence when present, otherwise
/// from the prose outside all fences.
pub fn extract_query(raw: &str) -> std::result::Result<ExtractedQuery, ExtractionError> {
    let (blocks, outside) = fenced_blocks(raw);

    let sql_block = blocks
        .iter()
        .find(|b| b.tag == "sql" || b.tag == "sqlite")
        .ok_or(ExtractionError::NoSqlBlock)?;

    let sql = normalize_sql(sql_block.body);
    if sql.is_empty() {
        return Err(ExtractionError::EmptySqlBlock);
    }

    let explanation = blocks
        .iter()
        .find(|b| b.tag == "explanation")
        .map(|b| b.body.trim().to_string())
        .unwrap_or_else(|| outside.trim().to_string());

    Ok(ExtractedQuery { sql, explanation })
}

/// first json fence (tagged `json` or untagged), or the whole reply when it
/// is bare json
pub fn extract_json_block<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let (blocks, _) = fenced_blocks(raw);

    let text = blocks
        .iter()
        .find(|b| b.tag == "json")
        .or_else(|| blocks.iter().find(|b| b.tag.is_empty()))
        .map(|b| b.body.trim())
        .unwrap_or_else(|| raw.trim());

    if text.is_empty() {
        return Err(AskJsonError::Analysis("model returned empty output".to_string()));
    }

    if !text.starts_with('{') && !text.starts_with('[') {
        return Err(AskJsonError::Analysis(
            "model output did not contain a ```json fenced block".to_string(),
        ));
    }

    serde_json::from_str(text)
        .map_err(|e| AskJsonError::Analysis(format!("model returned invalid json: {}", e)))
}
