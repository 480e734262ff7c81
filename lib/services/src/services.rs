//! The adapter callback surface.
//!
//! One async method per external capability a workflow node can reach. The
//! engine holds the implementation behind `Arc<dyn Services>` and shares it
//! across every node task of an execution, so implementations must be
//! `Send + Sync` and must not assume calls are serialized.

use crate::error::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A text generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRequest {
    /// Prompt text.
    pub input: String,
    /// Model identifier understood by the provider.
    pub model: String,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

impl TextRequest {
    /// Creates a request with the provider defaults used by new nodes.
    #[must_use]
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 150,
            temperature: 0.7,
        }
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the token limit.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// An outbound email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub smtp_server: String,
    pub port: u16,
    pub enable_ssl: bool,
}

/// External capabilities available to workflow nodes.
#[async_trait]
pub trait Services: Send + Sync {
    /// Generates text for a prompt.
    async fn process_text(&self, request: &TextRequest) -> Result<String, ServiceError>;

    /// Runs image analysis and returns the provider's structured result.
    async fn analyze_image(
        &self,
        image: &[u8],
        provider: &str,
        features: &[String],
    ) -> Result<JsonValue, ServiceError>;

    /// Translates text into `target_language`.
    async fn translate(
        &self,
        text: &str,
        target_language: &str,
        provider: &str,
    ) -> Result<String, ServiceError>;

    /// Scores the sentiment of `text`.
    async fn sentiment(&self, text: &str, provider: &str) -> Result<JsonValue, ServiceError>;

    /// Converts speech audio to text.
    async fn transcribe(
        &self,
        audio: &[u8],
        language: &str,
        provider: &str,
    ) -> Result<String, ServiceError>;

    /// Sends an email. Returns whether the server accepted it.
    async fn send_email(&self, request: &EmailRequest) -> Result<bool, ServiceError>;

    /// Posts a Slack message. Returns the message id.
    async fn send_slack(
        &self,
        channel: &str,
        message: &str,
        bot_token: &str,
        username: &str,
    ) -> Result<String, ServiceError>;

    /// Calls a webhook and returns its JSON response.
    async fn http_post(
        &self,
        url: &str,
        method: &str,
        body: &JsonValue,
    ) -> Result<JsonValue, ServiceError>;
}
