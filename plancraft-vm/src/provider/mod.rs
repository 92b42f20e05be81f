//! # Completion Service Interface
//!
//! A trait-based abstraction over chat-completion backends.
//!
//! ## Design
//! - `LlmProvider` defines the core interface (object safe, shared as `Arc<dyn LlmProvider>`)
//! - `OpenAIProvider` talks to any OpenAI-compatible endpoint
//! - `ScriptedProvider` replays canned responses for tests and offline demos
//! - Usage tracking across calls

pub mod openai;
pub mod scripted;

pub use openai::OpenAIProvider;
pub use scripted::ScriptedProvider;

use async_trait::async_trait;
use plancraft_error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Core Types
// ============================================================================

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}]", self.role.as_str().to_uppercase())?;
        write!(f, "{}", self.content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Request parameters for a completion
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }
}

/// Response from a completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    pub content: Option<String>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown,
}

impl FinishReason {
    pub fn from_api(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Error type for provider operations
#[derive(Debug)]
pub enum ProviderError {
    /// Network/connection error
    Network(String),
    /// API returned an error
    Api { status: u16, message: String },
    /// Failed to parse response
    Parse(String),
    /// Rate limited
    RateLimited { retry_after: Option<u64> },
    /// Invalid request
    InvalidRequest(String),
    /// Authentication failed
    AuthenticationFailed,
    /// The service answered without any content
    EmptyResponse,
    /// Other error
    Other(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(e) => write!(f, "Network error: {}", e),
            Self::Api { status, message } => write!(f, "API error ({}): {}", status, message),
            Self::Parse(e) => write!(f, "Parse error: {}", e),
            Self::RateLimited { retry_after } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after {
                    write!(f, " (retry after {}s)", secs)?;
                }
                Ok(())
            }
            Self::InvalidRequest(e) => write!(f, "Invalid request: {}", e),
            Self::AuthenticationFailed => write!(f, "Authentication failed"),
            Self::EmptyResponse => write!(f, "No content in response"),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// The plancraft error kind this failure maps to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::NetworkFailed,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Api { status, .. } if *status >= 500 => ErrorKind::ProviderUnavailable,
            Self::AuthenticationFailed | Self::InvalidRequest(_) => ErrorKind::ConfigInvalid,
            _ => ErrorKind::InferenceFailed,
        }
    }

    /// Wrap into a plancraft error, keeping the provider error as source
    pub fn into_error(self, operation: &'static str) -> Error {
        Error::new(self.kind(), self.to_string())
            .with_operation(operation)
            .set_source(self)
    }
}

/// The main completion-service trait
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "openai", "scripted")
    fn name(&self) -> &str;

    /// Get the default model
    fn default_model(&self) -> &str;

    /// Send a completion request and get a full response
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Chat with message history
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, ProviderError> {
        let request = CompletionRequest::new(messages);
        let response = self.complete(request).await?;
        response.content.ok_or(ProviderError::EmptyResponse)
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Configuration for creating providers
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    OpenAI,
    Local,
}

impl ProviderConfig {
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::OpenAI,
            api_key: Some(api_key.into()),
            base_url: Some(DEFAULT_OPENAI_BASE_URL.into()),
            default_model: Some(DEFAULT_OPENAI_MODEL.into()),
            headers: HashMap::new(),
            timeout_secs: Some(120),
        }
    }

    /// An OpenAI-compatible server without authentication (vLLM, Ollama, ...)
    pub fn local(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider_type: ProviderType::Local,
            api_key: None,
            base_url: Some(base_url.into()),
            default_model: Some(model.into()),
            headers: HashMap::new(),
            timeout_secs: Some(300),
        }
    }

    /// Read `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `OPENAI_MODEL`.
    ///
    /// Without an API key the base URL is treated as a local server.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let api_key = lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty());
        let base_url = lookup("OPENAI_BASE_URL").filter(|u| !u.trim().is_empty());
        let model = lookup("OPENAI_MODEL").filter(|m| !m.trim().is_empty());

        let config = match (api_key, base_url) {
            (Some(key), base_url) => {
                let mut config = Self::openai(key);
                if let Some(url) = base_url {
                    config.base_url = Some(url);
                }
                config
            }
            (None, Some(url)) => {
                Self::local(url, model.clone().unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into()))
            }
            (None, None) => {
                return Err(Error::config_invalid(
                    "set OPENAI_API_KEY, or OPENAI_BASE_URL for a local server",
                )
                .with_operation("provider::from_env"))
            }
        };

        Ok(match model {
            Some(model) => config.with_model(model),
            None => config,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Usage Tracking
// ============================================================================

/// Tracks token usage across multiple calls
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    pub total_calls: usize,
    pub total_prompt_tokens: usize,
    pub total_completion_tokens: usize,
    pub by_model: HashMap<String, Usage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, model: &str, usage: &Usage) {
        self.total_calls += 1;
        self.total_prompt_tokens += usage.prompt_tokens;
        self.total_completion_tokens += usage.completion_tokens;

        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
        entry.total_tokens += usage.total_tokens;
    }

    pub fn total_tokens(&self) -> usize {
        self.total_prompt_tokens + self.total_completion_tokens
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let sys = ChatMessage::system("You translate requests into programs");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.content, "You translate requests into programs");

        let user = ChatMessage::user("Track my package");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.to_string(), "[USER]\nTrack my package");

        let asst = ChatMessage::assistant("{}");
        assert_eq!(asst.role, Role::Assistant);
    }

    #[test]
    fn test_completion_request_builder() {
        let request = CompletionRequest::new(vec![ChatMessage::user("Hello")])
            .with_model("gpt-4o")
            .with_temperature(0.0)
            .with_max_tokens(1000);

        assert_eq!(request.model, Some("gpt-4o".into()));
        assert_eq!(request.temperature, Some(0.0));
        assert_eq!(request.max_tokens, Some(1000));
    }

    #[test]
    fn test_provider_config_from_lookup() {
        let config = ProviderConfig::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk-test".into()),
            "OPENAI_MODEL" => Some("gpt-4o-mini".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.provider_type, ProviderType::OpenAI);
        assert_eq!(config.default_model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.base_url.as_deref(), Some(DEFAULT_OPENAI_BASE_URL));

        let config = ProviderConfig::from_lookup(|key| match key {
            "OPENAI_BASE_URL" => Some("http://localhost:11434/v1".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.provider_type, ProviderType::Local);
        assert!(config.api_key.is_none());

        let err = ProviderConfig::from_lookup(|_| None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_provider_error_mapping() {
        assert_eq!(ProviderError::Network("reset".into()).kind(), ErrorKind::NetworkFailed);
        assert_eq!(
            ProviderError::Api { status: 503, message: "busy".into() }.kind(),
            ErrorKind::ProviderUnavailable
        );
        assert_eq!(
            ProviderError::Api { status: 400, message: "bad".into() }.kind(),
            ErrorKind::InferenceFailed
        );

        let err = ProviderError::RateLimited { retry_after: Some(3) }.into_error("planner::complete");
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.message().contains("retry after 3s"));
        assert!(err.source_ref().is_some());
    }

    #[test]
    fn test_usage_tracker() {
        let mut tracker = UsageTracker::new();

        tracker.track("gpt-4o", &Usage {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
        });

        tracker.track("gpt-4o-mini", &Usage {
            prompt_tokens: 200,
            completion_tokens: 100,
            total_tokens: 300,
        });

        assert_eq!(tracker.total_calls, 2);
        assert_eq!(tracker.total_prompt_tokens, 300);
        assert_eq!(tracker.total_completion_tokens, 150);
        assert_eq!(tracker.total_tokens(), 450);
        assert_eq!(tracker.by_model.len(), 2);
    }
}
