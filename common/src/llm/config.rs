use crate::error::{AskJsonError, Result};
use crate::llm::anthropic::AnthropicClient;
use crate::llm::client::LlmClient;
use crate::llm::ollama::OllamaClient;
use crate::llm::openai::OpenAiClient;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const PROVIDER_ENV: &str = "ASKJSON_LLM_PROVIDER";
pub const MODEL_ENV: &str = "ASKJSON_LLM_MODEL";
pub const BASE_URL_ENV: &str = "ASKJSON_LLM_BASE_URL";
pub const API_KEY_ENV: &str = "ASKJSON_LLM_API_KEY";

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";
const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Ollama => "ollama",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => DEFAULT_OPENAI_MODEL,
            Provider::Anthropic => DEFAULT_ANTHROPIC_MODEL,
            Provider::Ollama => DEFAULT_OLLAMA_MODEL,
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::Ollama => "http://localhost:11434",
        }
    }

    /// provider-specific key variable, checked after `ASKJSON_LLM_API_KEY`
    fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Ollama => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AskJsonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "ollama" => Ok(Provider::Ollama),
            other => Err(AskJsonError::Config(format!(
                "unsupported llm provider: {}",
                other
            ))),
        }
    }
}

/// fully resolved settings for one llm client
#[derive(Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.trim().is_empty())
}

impl LlmConfig {
    /// resolve settings: explicit value, then environment, then provider default
    pub fn resolve(
        provider: Option<String>,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let provider = match provider.or_else(|| env_non_empty(PROVIDER_ENV)) {
            Some(p) => p.parse()?,
            None => Provider::OpenAi,
        };

        let model = model
            .or_else(|| env_non_empty(MODEL_ENV))
            .unwrap_or_else(|| provider.default_model().to_string());

        let base_url = base_url
            .or_else(|| env_non_empty(BASE_URL_ENV))
            .unwrap_or_else(|| provider.default_base_url().to_string());

        let api_key = env_non_empty(API_KEY_ENV)
            .or_else(|| provider.api_key_env().and_then(env_non_empty));

        if api_key.is_none() && provider != Provider::Ollama {
            return Err(AskJsonError::Config(format!(
                "no api key for {}: set {} or {}",
                provider,
                API_KEY_ENV,
                provider.api_key_env().unwrap_or(API_KEY_ENV)
            )));
        }

        Ok(Self {
            provider,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            temperature: 0.0,
            max_tokens: 2048,
        })
    }

    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// build the client for the configured provider
pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    tracing::info!(
        provider = %config.provider,
        model = %config.model,
        "building llm client"
    );

    let client: Arc<dyn LlmClient> = match config.provider {
        Provider::OpenAi => Arc::new(OpenAiClient::new(config.clone())?),
        Provider::Anthropic => Arc::new(AnthropicClient::new(config.clone())?),
        Provider::Ollama => Arc::new(OllamaClient::new(config.clone())),
    };

    Ok(client)
}
