//! Offline service adapters.
//!
//! Every call succeeds locally with a canned response that mentions its
//! inputs. Useful for dry runs of a workflow before real credentials exist.

use crate::error::ServiceError;
use crate::services::{EmailRequest, Services, TextRequest};
use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use tracing::debug;

/// Services implementation that never leaves the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedServices;

impl SimulatedServices {
    /// Creates the simulator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Services for SimulatedServices {
    async fn process_text(&self, request: &TextRequest) -> Result<String, ServiceError> {
        debug!(model = %request.model, "simulating text generation");
        Ok(format!("AI processing simulated for: {}", request.input))
    }

    async fn analyze_image(
        &self,
        image: &[u8],
        provider: &str,
        features: &[String],
    ) -> Result<JsonValue, ServiceError> {
        debug!(provider, bytes = image.len(), "simulating image analysis");
        Ok(json!({
            "description": "Image analysis simulated",
            "provider": provider,
            "features": features,
            "bytes": image.len(),
        }))
    }

    async fn translate(
        &self,
        text: &str,
        target_language: &str,
        provider: &str,
    ) -> Result<String, ServiceError> {
        debug!(provider, target_language, "simulating translation");
        Ok(format!("Translation simulated: '{text}' to {target_language}"))
    }

    async fn sentiment(&self, text: &str, provider: &str) -> Result<JsonValue, ServiceError> {
        debug!(provider, chars = text.len(), "simulating sentiment analysis");
        Ok(json!({
            "sentiment": "neutral",
            "score": 0.5,
            "provider": provider,
        }))
    }

    async fn transcribe(
        &self,
        audio: &[u8],
        language: &str,
        provider: &str,
    ) -> Result<String, ServiceError> {
        debug!(provider, language, bytes = audio.len(), "simulating transcription");
        Ok(format!(
            "Audio transcription simulated ({} bytes, {language})",
            audio.len()
        ))
    }

    async fn send_email(&self, request: &EmailRequest) -> Result<bool, ServiceError> {
        debug!(to = %request.to, server = %request.smtp_server, "simulating email");
        Ok(true)
    }

    async fn send_slack(
        &self,
        channel: &str,
        message: &str,
        _bot_token: &str,
        username: &str,
    ) -> Result<String, ServiceError> {
        debug!(channel, username, chars = message.len(), "simulating slack post");
        Ok(format!("simulated-{}", channel.trim_start_matches('#')))
    }

    async fn http_post(
        &self,
        url: &str,
        method: &str,
        body: &JsonValue,
    ) -> Result<JsonValue, ServiceError> {
        debug!(url, method, "simulating webhook call");
        Ok(json!({
            "status": "simulated",
            "url": url,
            "method": method,
            "echo": body,
        }))
    }
}
