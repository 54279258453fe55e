use crate::error::Result;
use crate::llm::message::Message;
use async_trait::async_trait;

/// one chat-completion call: a conversation in, a single completion out
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// provider/model label used in logs and reports
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

/// adapts a plain function or closure into an [`LlmClient`]
pub struct FnClient<F> {
    name: String,
    call: F,
}

impl<F> FnClient<F>
where
    F: Fn(&[Message]) -> Result<String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, call: F) -> Self {
        Self {
            name: name.into(),
            call,
        }
    }
}

#[async_trait]
impl<F> LlmClient for FnClient<F>
where
    F: Fn(&[Message]) -> Result<String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, messages: &[Message]) -> Result<String> {
        (self.call)(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AskJsonError;

    #[tokio::test]
    async fn test_fn_client_passes_messages_through() {
        let client = FnClient::new("echo", |messages: &[Message]| {
            Ok(messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default())
        });

        let reply = client.complete(&[Message::user("ping")]).await.unwrap();
        assert_eq!(reply, "ping");
        assert_eq!(client.name(), "echo");
    }

    #[tokio::test]
    async fn test_fn_client_propagates_errors() {
        let client = FnClient::new("down", |_: &[Message]| {
            Err(AskJsonError::Transport("connection refused".to_string()))
        });

        let err = client.complete(&[]).await.unwrap_err();
        assert!(matches!(err, AskJsonError::Transport(_)));
    }
}
