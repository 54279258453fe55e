use crate::agent::executor::complete_with_retry;
use crate::agent::parser::extract_json_block;
use crate::error::{AskJsonError, Result};
use crate::llm::client::LlmClient;
use crate::schema::hints::FieldHints;
use serde_json::Value;

const ENHANCEMENT_SYSTEM_PROMPT: &str = "add concise description fields to json schema properties. \
     descriptions should be 5-15 words explaining field purpose. \
     use field hints to inform descriptions. keep every existing key and type unchanged. \
     output only one ```json fenced block.";

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn build_enhancement_prompt(json_schema: &Value, hints: &FieldHints) -> Result<String> {
    let hint_context = format!(
        "timestamp fields: {}\ncategory fields: {}\ncollections: {}",
        list_or_none(&hints.timestamps),
        list_or_none(&hints.categories),
        list_or_none(&hints.collections)
    );

    Ok(format!(
        "add description fields to this json schema. \
         use the field hints to inform descriptions.\n\n\
         hints:\n{}\n\n\
         schema:\n{}",
        hint_context,
        serde_json::to_string_pretty(json_schema)?
    ))
}

fn parse_enhanced(raw: &str, original: &Value) -> Result<Value> {
    let enhanced: Value = extract_json_block(raw)?;

    // the model may only annotate, not reshape
    if enhanced.get("type") != original.get("type") {
        return Err(AskJsonError::Analysis(
            "enhanced schema changed the top-level type".to_string(),
        ));
    }
    if !enhanced.is_object() {
        return Err(AskJsonError::Analysis(
            "enhanced schema is not a json object".to_string(),
        ));
    }

    Ok(enhanced)
}

/// add llm-written descriptions to a rule-based json schema
#[tracing::instrument(skip(llm, json_schema, hints), fields(llm = llm.name()))]
pub async fn enhance_type_spec(
    llm: &dyn LlmClient,
    json_schema: &Value,
    hints: &FieldHints,
    max_attempts: usize,
) -> Result<Value> {
    tracing::info!("enhancing type spec with llm-generated descriptions");

    let prompt = build_enhancement_prompt(json_schema, hints)?;
    let enhanced = complete_with_retry(
        llm,
        "type spec enhancement",
        ENHANCEMENT_SYSTEM_PROMPT,
        &prompt,
        max_attempts,
        |raw| parse_enhanced(raw, json_schema),
    )
    .await?;

    tracing::info!("type spec enhancement complete");
    Ok(enhanced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::FnClient;
    use crate::llm::message::Message;
    use serde_json::json;

    #[test]
    fn test_enhancement_prompt_lists_hints() {
        let hints = FieldHints {
            timestamps: vec!["created_at".to_string()],
            categories: vec![],
            collections: vec!["flights".to_string()],
        };

        let prompt = build_enhancement_prompt(&json!({"type": "object"}), &hints).unwrap();
        assert!(prompt.contains("timestamp fields: created_at"));
        assert!(prompt.contains("category fields: none"));
        assert!(prompt.contains("collections: flights"));
    }

    #[test]
    fn test_reshaped_schema_rejected() {
        let original = json!({"type": "object", "properties": {}});
        assert!(parse_enhanced("```json\n{\"type\": \"array\"}\n```", &original).is_err());
        assert!(parse_enhanced(
            "```json\n{\"type\": \"object\", \"description\": \"a booking\"}\n```",
            &original
        )
        .is_ok());
    }

    #[tokio::test]
    async fn test_enhance_type_spec() {
        let client = FnClient::new("fake", |_: &[Message]| {
            Ok("```json\n{\"type\": \"object\", \"properties\": {\"to\": \
                {\"type\": \"string\", \"description\": \"arrival city\"}}}\n```"
                .to_string())
        });

        let original = json!({"type": "object", "properties": {"to": {"type": "string"}}});
        let enhanced = enhance_type_spec(&client, &original, &FieldHints::default(), 1)
            .await
            .unwrap();

        assert_eq!(enhanced["properties"]["to"]["description"], json!("arrival city"));
    }
}
