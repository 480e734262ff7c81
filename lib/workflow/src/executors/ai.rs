//! AI executors. Each one hands its inputs and configuration to the
//! services adapter and maps the answer onto its output port.

use super::{file_bytes, required_text, single, wrong_config};
use crate::error::NodeError;
use crate::node::{Node, NodeConfig, NodeKind};
use crate::registry::{NodeContext, NodeExecutor, PortValues};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use flowmill_services::TextRequest;
use serde_json::Value as JsonValue;
use tracing::debug;

/// `ai-text`: prompt in, generated text out.
pub struct TextExecutor;

#[async_trait]
impl NodeExecutor for TextExecutor {
    async fn execute(
        &self,
        node: &Node,
        inputs: &PortValues,
        ctx: &NodeContext,
    ) -> Result<PortValues, NodeError> {
        let NodeConfig::AiText(config) = &node.config else {
            return Err(wrong_config(node, NodeKind::AiText));
        };
        let request = TextRequest::new(required_text(inputs, "prompt")?)
            .with_model(config.model.as_str())
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature);
        debug!(node_id = %node.id, model = %config.model, attempt = ctx.attempt, "processing text");
        let text = ctx.services.process_text(&request).await?;
        Ok(single("text", JsonValue::String(text)))
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::external())
    }
}

/// `ai-image`: image file in, analysis object out.
pub struct ImageExecutor;

#[async_trait]
impl NodeExecutor for ImageExecutor {
    async fn execute(
        &self,
        node: &Node,
        inputs: &PortValues,
        ctx: &NodeContext,
    ) -> Result<PortValues, NodeError> {
        let NodeConfig::AiImage(config) = &node.config else {
            return Err(wrong_config(node, NodeKind::AiImage));
        };
        let image = file_bytes(inputs, "image")?;
        let analysis = ctx
            .services
            .analyze_image(&image, &config.provider, &config.features)
            .await?;
        Ok(single("analysis", analysis))
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::external())
    }
}

/// `ai-speech`: audio file in, transcript out.
pub struct SpeechExecutor;

#[async_trait]
impl NodeExecutor for SpeechExecutor {
    async fn execute(
        &self,
        node: &Node,
        inputs: &PortValues,
        ctx: &NodeContext,
    ) -> Result<PortValues, NodeError> {
        let NodeConfig::AiSpeech(config) = &node.config else {
            return Err(wrong_config(node, NodeKind::AiSpeech));
        };
        let audio = file_bytes(inputs, "audio")?;
        let text = ctx
            .services
            .transcribe(&audio, &config.language, &config.provider)
            .await?;
        Ok(single("text", JsonValue::String(text)))
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::external())
    }
}

/// `ai-translate`
pub struct TranslateExecutor;

#[async_trait]
impl NodeExecutor for TranslateExecutor {
    async fn execute(
        &self,
        node: &Node,
        inputs: &PortValues,
        ctx: &NodeContext,
    ) -> Result<PortValues, NodeError> {
        let NodeConfig::AiTranslate(config) = &node.config else {
            return Err(wrong_config(node, NodeKind::AiTranslate));
        };
        let text = required_text(inputs, "text")?;
        let translated = ctx
            .services
            .translate(text, &config.target_language, &config.provider)
            .await?;
        Ok(single("translated", JsonValue::String(translated)))
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::external())
    }
}

/// `ai-sentiment`. Opinion mining is dropped from the result unless
/// `includeOpinions` is set.
pub struct SentimentExecutor;

#[async_trait]
impl NodeExecutor for SentimentExecutor {
    async fn execute(
        &self,
        node: &Node,
        inputs: &PortValues,
        ctx: &NodeContext,
    ) -> Result<PortValues, NodeError> {
        let NodeConfig::AiSentiment(config) = &node.config else {
            return Err(wrong_config(node, NodeKind::AiSentiment));
        };
        let text = required_text(inputs, "text")?;
        let mut sentiment = ctx.services.sentiment(text, &config.provider).await?;
        if !config.include_opinions
            && let Some(map) = sentiment.as_object_mut()
        {
            map.remove("opinions");
        }
        Ok(single("sentiment", sentiment))
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::external())
    }
}
