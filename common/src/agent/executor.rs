use crate::agent::parser::extract_query;
use crate::agent::prompt::{build_corrective_prompt, build_query_prompt};
use crate::error::{AskJsonError, AttemptError, Result};
use crate::llm::client::LlmClient;
use crate::llm::message::Message;
use crate::schema::model::SchemaSet;
use crate::store::{execute, Store};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone)]
pub struct AskOptions {
    /// corrective round-trips allowed after the first attempt
    pub max_retries: usize,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self { max_retries: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskState {
    Building,
    Calling,
    Extracting,
    Executing,
    Retrying,
    Done,
    Failed,
}

impl fmt::Display for AskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AskState::Building => "building",
            AskState::Calling => "calling",
            AskState::Extracting => "extracting",
            AskState::Executing => "executing",
            AskState::Retrying => "retrying",
            AskState::Done => "done",
            AskState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// answer to one question: the accepted sql, its explanation and its rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub sql: String,
    pub explanation: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub truncated: bool,
    /// llm calls it took, including the successful one
    pub attempts: usize,
}

fn transition(state: &mut AskState, next: AskState, attempt: usize) {
    tracing::debug!(from = %state, to = %next, attempt, "ask state transition");
    *state = next;
}

/// turn a natural-language question into rows from `store`
///
/// Every attempt extracts then executes; extraction and execution failures
/// are fed back to the model until `max_retries` corrective turns are used
/// up. Transport failures propagate immediately.
#[tracing::instrument(
    skip(schema, llm, store, options),
    fields(llm = llm.name(), max_retries = options.max_retries)
)]
pub async fn ask(
    question: &str,
    schema: &SchemaSet,
    llm: &dyn LlmClient,
    store: &Store,
    options: &AskOptions,
) -> Result<QueryResult> {
    let mut state = AskState::Building;
    let mut messages = build_query_prompt(question, schema);
    let mut last_sql: Option<String> = None;
    let mut attempts = 0;

    loop {
        attempts += 1;
        transition(&mut state, AskState::Calling, attempts);

        let reply = llm.complete(&messages).await?;
        tracing::debug!(reply_len = reply.len(), "received model reply");

        transition(&mut state, AskState::Extracting, attempts);
        let (failed_sql, error) = match extract_query(&reply) {
            Err(e) => (None, AttemptError::from(e)),
            Ok(extracted) => {
                last_sql = Some(extracted.sql.clone());
                transition(&mut state, AskState::Executing, attempts);

                match execute(&extracted.sql, store) {
                    Ok(rows) => {
                        transition(&mut state, AskState::Done, attempts);
                        tracing::info!(attempts, rows = rows.rows.len(), "question answered");

                        return Ok(QueryResult {
                            sql: extracted.sql,
                            explanation: extracted.explanation,
                            columns: rows.columns,
                            rows: rows.rows,
                            truncated: rows.truncated,
                            attempts,
                        });
                    }
                    Err(e) => (Some(extracted.sql), AttemptError::from(e)),
                }
            }
        };

        tracing::warn!(attempt = attempts, "attempt failed: {}", error);

        if attempts > options.max_retries {
            transition(&mut state, AskState::Failed, attempts);
            return Err(AskJsonError::BudgetExceeded {
                attempts,
                last_sql,
                last_error: error,
            });
        }

        transition(&mut state, AskState::Retrying, attempts);
        messages.push(Message::assistant(reply));
        messages.push(Message::user(build_corrective_prompt(
            failed_sql.as_deref(),
            &error,
        )));
    }
}

/// call the model until `parse` accepts its reply, feeding each rejection
/// back as a corrective turn
#[tracing::instrument(skip(llm, system, prompt, parse), fields(llm = llm.name()))]
pub async fn complete_with_retry<T, F>(
    llm: &dyn LlmClient,
    step: &str,
    system: &str,
    prompt: &str,
    max_attempts: usize,
    parse: F,
) -> Result<T>
where
    F: Fn(&str) -> Result<T>,
{
    if max_attempts == 0 {
        return Err(AskJsonError::Config(
            "max attempts must be at least 1".to_string(),
        ));
    }

    let mut messages = vec![Message::system(system), Message::user(prompt)];
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        tracing::info!("{} attempt {}/{}", step, attempt, max_attempts);

        let output = llm.complete(&messages).await?;

        match parse(&output) {
            Ok(value) => {
                tracing::info!("{} succeeded on attempt {}", step, attempt);
                return Ok(value);
            }
            Err(e) => {
                tracing::warn!("{} attempt {} failed: {}", step, attempt, e);
                last_error = e.to_string();

                messages.push(Message::assistant(output));
                messages.push(Message::user(format!(
                    "previous output was invalid: {}\n\
                     fix it and reply with only one ```json fenced block. no notes.",
                    e
                )));
            }
        }
    }

    Err(AskJsonError::Analysis(format!(
        "{} failed after {} attempts: {}",
        step, max_attempts, last_error
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExecutionErrorKind, ExtractionError};
    use crate::llm::client::FnClient;
    use crate::store::tests::{flights_schema, flights_store};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<Vec<Message>>>>;

    fn scripted(
        replies: Vec<Result<String>>,
    ) -> (FnClient<impl Fn(&[Message]) -> Result<String> + Send + Sync>, Calls) {
        let queue = Mutex::new(replies.into_iter().collect::<VecDeque<_>>());
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);

        let client = FnClient::new("scripted", move |messages: &[Message]| {
            seen.lock().unwrap().push(messages.to_vec());
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("out of script".to_string()))
        });

        (client, calls)
    }

    fn sql_reply(sql: &str, explanation: &str) -> Result<String> {
        Ok(format!("```sql\n{}\n```\n```explanation\n{}\n```", sql, explanation))
    }

    #[tokio::test]
    async fn test_flights_to_paris_in_march() {
        let store = flights_store();
        let (client, calls) = scripted(vec![sql_reply(
            "SELECT origin, destination, date FROM flights \
             WHERE destination = 'Paris' AND date LIKE '2024-03-%' ORDER BY date",
            "Flights arriving in Paris during March.",
        )]);

        let result = ask(
            "flights to Paris in March",
            &flights_schema(),
            &client,
            &store,
            &AskOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.attempts, 1);
        assert_eq!(result.columns, vec!["origin", "destination", "date"]);
        assert_eq!(result.rows.len(), 2);
        for row in &result.rows {
            assert_eq!(row[1], json!("Paris"));
            assert!(row[2].as_str().unwrap().starts_with("2024-03-"));
        }
        assert_eq!(result.explanation, "Flights arriving in Paris during March.");

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0][0].content.contains("fare_code"));
    }

    #[tokio::test]
    async fn test_missing_fence_then_success() {
        let store = flights_store();
        let (client, calls) = scripted(vec![
            Ok("You should select flights where destination is Paris.".to_string()),
            sql_reply("SELECT COUNT(*) AS n FROM flights WHERE destination = 'Paris'", "count"),
        ]);

        let result = ask("how many Paris flights?", &flights_schema(), &client, &store, &AskOptions::default())
            .await
            .unwrap();

        assert_eq!(result.attempts, 2);
        assert_eq!(result.rows, vec![vec![json!(3)]]);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].len(), 4);
        assert_eq!(calls[1][2].role, crate::llm::MessageRole::Assistant);
        assert!(calls[1][3].content.contains("```sql"));
    }

    #[tokio::test]
    async fn test_unknown_column_fed_back_verbatim() {
        let store = flights_store();
        let (client, calls) = scripted(vec![
            sql_reply("SELECT arrival_gate FROM flights", "gates"),
            sql_reply("SELECT destination FROM flights ORDER BY id LIMIT 1", "first"),
        ]);

        let result = ask("which gate?", &flights_schema(), &client, &store, &AskOptions::default())
            .await
            .unwrap();
        assert_eq!(result.attempts, 2);

        let calls = calls.lock().unwrap();
        let corrective = &calls[1][3].content;
        assert!(corrective.contains("SELECT arrival_gate FROM flights"));
        assert!(corrective.contains("no such column: arrival_gate"));
    }

    #[tokio::test]
    async fn test_budget_exceeded_after_exact_call_count() {
        let store = flights_store();
        let (client, calls) = scripted(vec![
            Ok("no sql".to_string()),
            Ok("still no sql".to_string()),
            Ok("never".to_string()),
            Ok("unused".to_string()),
        ]);

        let err = ask("anything", &flights_schema(), &client, &store, &AskOptions { max_retries: 2 })
            .await
            .unwrap_err();

        match err {
            AskJsonError::BudgetExceeded {
                attempts,
                last_sql,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_sql, None);
                assert_eq!(last_error, AttemptError::Extraction(ExtractionError::NoSqlBlock));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_zero_retries_keeps_last_sql() {
        let store = flights_store();
        let (client, calls) = scripted(vec![sql_reply("DROP TABLE flights", "oops")]);

        let err = ask("drop it", &flights_schema(), &client, &store, &AskOptions { max_retries: 0 })
            .await
            .unwrap_err();

        match err {
            AskJsonError::BudgetExceeded {
                attempts,
                last_sql,
                last_error: AttemptError::Execution(e),
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(last_sql.as_deref(), Some("DROP TABLE flights"));
                assert_eq!(e.kind, ExecutionErrorKind::Unsafe);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(store.row_count("flights").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_retried() {
        let store = flights_store();
        let (client, calls) = scripted(vec![
            Err(AskJsonError::Transport("connection refused".to_string())),
            sql_reply("SELECT 1", "never reached"),
        ]);

        let err = ask("anything", &flights_schema(), &client, &store, &AskOptions { max_retries: 3 })
            .await
            .unwrap_err();

        assert!(matches!(err, AskJsonError::Transport(_)));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_with_retry_feeds_back_parse_error() {
        let (client, calls) = scripted(vec![
            Ok("not json".to_string()),
            Ok("```json\n{\"ok\": true}\n```".to_string()),
        ]);

        let value: Value = complete_with_retry(&client, "demo", "system", "prompt", 2, |raw| {
            crate::agent::parser::extract_json_block(raw)
        })
        .await
        .unwrap();

        assert_eq!(value, json!({"ok": true}));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[1][3].content.starts_with("previous output was invalid"));
    }

    #[tokio::test]
    async fn test_complete_with_retry_gives_up() {
        let (client, _) = scripted(vec![Ok("nope".to_string()), Ok("nope".to_string())]);

        let result: Result<Value> = complete_with_retry(&client, "demo", "s", "p", 2, |raw| {
            crate::agent::parser::extract_json_block(raw)
        })
        .await;

        assert!(matches!(result, Err(AskJsonError::Analysis(_))));
    }
}
