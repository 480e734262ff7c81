//! Test doubles shared by the crate's unit tests.

use crate::registry::NodeContext;
use async_trait::async_trait;
use flowmill_services::{EmailRequest, ServiceError, Services, TextRequest};
use serde_json::{Value as JsonValue, json};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Deterministic in-memory services with scriptable failures.
#[derive(Default)]
pub struct FakeServices {
    text_requests: Mutex<Vec<TextRequest>>,
    emails: Mutex<Vec<EmailRequest>>,
    posts: Mutex<Vec<(String, String, JsonValue)>>,
    text_calls: AtomicU32,
    email_calls: AtomicU32,
    slack_calls: AtomicU32,
    /// Transient failures before text succeeds.
    text_failures: u32,
    /// Transient failures before email succeeds.
    email_failures: u32,
    /// Transient failures before Slack succeeds.
    slack_failures: u32,
    text_rejection: Option<String>,
    text_delay: Option<Duration>,
}

impl FakeServices {
    /// Answers every text request with `ECHO:<prompt>`.
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn failing_text_times(mut self, failures: u32) -> Self {
        self.text_failures = failures;
        self
    }

    pub fn failing_email_times(mut self, failures: u32) -> Self {
        self.email_failures = failures;
        self
    }

    pub fn failing_slack_times(mut self, failures: u32) -> Self {
        self.slack_failures = failures;
        self
    }

    pub fn rejecting_text(mut self, message: &str) -> Self {
        self.text_rejection = Some(message.to_string());
        self
    }

    pub fn with_text_delay(mut self, delay: Duration) -> Self {
        self.text_delay = Some(delay);
        self
    }

    pub fn text_requests(&self) -> Vec<TextRequest> {
        self.text_requests.lock().unwrap().clone()
    }

    pub fn text_calls(&self) -> u32 {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn emails(&self) -> Vec<EmailRequest> {
        self.emails.lock().unwrap().clone()
    }

    pub fn email_calls(&self) -> u32 {
        self.email_calls.load(Ordering::SeqCst)
    }

    pub fn slack_calls(&self) -> u32 {
        self.slack_calls.load(Ordering::SeqCst)
    }

    pub fn posts(&self) -> Vec<(String, String, JsonValue)> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Services for FakeServices {
    async fn process_text(&self, request: &TextRequest) -> Result<String, ServiceError> {
        let call = self.text_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.text_requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.text_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.text_rejection {
            return Err(ServiceError::rejected(message.as_str()));
        }
        if call <= self.text_failures {
            return Err(ServiceError::transient(format!("upstream busy ({call})")));
        }
        Ok(format!("ECHO:{}", request.input))
    }

    async fn analyze_image(
        &self,
        image: &[u8],
        provider: &str,
        features: &[String],
    ) -> Result<JsonValue, ServiceError> {
        Ok(json!({"bytes": image.len(), "provider": provider, "features": features}))
    }

    async fn translate(
        &self,
        text: &str,
        target_language: &str,
        _provider: &str,
    ) -> Result<String, ServiceError> {
        Ok(format!("{target_language}:{text}"))
    }

    async fn sentiment(&self, text: &str, _provider: &str) -> Result<JsonValue, ServiceError> {
        Ok(json!({"label": "positive", "score": 0.9, "text": text, "opinions": []}))
    }

    async fn transcribe(
        &self,
        audio: &[u8],
        language: &str,
        _provider: &str,
    ) -> Result<String, ServiceError> {
        Ok(format!("transcript({} bytes, {language})", audio.len()))
    }

    async fn send_email(&self, request: &EmailRequest) -> Result<bool, ServiceError> {
        let call = self.email_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.email_failures {
            return Err(ServiceError::transient("smtp timeout"));
        }
        self.emails.lock().unwrap().push(request.clone());
        Ok(true)
    }

    async fn send_slack(
        &self,
        channel: &str,
        _message: &str,
        _bot_token: &str,
        _username: &str,
    ) -> Result<String, ServiceError> {
        let call = self.slack_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.slack_failures {
            return Err(ServiceError::transient(format!("rate limited ({call})")));
        }
        Ok(format!("msg-{channel}"))
    }

    async fn http_post(
        &self,
        url: &str,
        method: &str,
        body: &JsonValue,
    ) -> Result<JsonValue, ServiceError> {
        self.posts
            .lock()
            .unwrap()
            .push((url.to_string(), method.to_string(), body.clone()));
        Ok(json!({"ok": true, "url": url}))
    }
}

/// A first-attempt context with no deadline and a null execution input.
pub fn context(services: Arc<dyn Services>) -> NodeContext {
    context_with_input(services, JsonValue::Null)
}

pub fn context_with_input(services: Arc<dyn Services>, input: JsonValue) -> NodeContext {
    NodeContext {
        node_id: "test".into(),
        deadline: None,
        cancellation: CancellationToken::new(),
        services,
        input: Arc::new(input),
        attempt: 1,
    }
}
