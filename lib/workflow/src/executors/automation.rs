//! Automation executors: email, Slack and outbound webhooks.

use super::{object_or_empty, required_text, single, wrong_config};
use crate::error::NodeError;
use crate::node::{Node, NodeConfig, NodeKind};
use crate::registry::{NodeContext, NodeExecutor, PortValues};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use flowmill_services::EmailRequest;
use serde_json::{Value as JsonValue, json};
use tracing::warn;

/// `automation-email`.
///
/// Reports `status: false` rather than failing when the last attempt fails
/// transiently.
pub struct EmailExecutor;

#[async_trait]
impl NodeExecutor for EmailExecutor {
    async fn execute(
        &self,
        node: &Node,
        inputs: &PortValues,
        ctx: &NodeContext,
    ) -> Result<PortValues, NodeError> {
        let NodeConfig::Email(config) = &node.config else {
            return Err(wrong_config(node, NodeKind::Email));
        };
        let request = EmailRequest {
            to: required_text(inputs, "to")?.to_string(),
            subject: required_text(inputs, "subject")?.to_string(),
            body: required_text(inputs, "body")?.to_string(),
            smtp_server: config.smtp_server.clone(),
            port: config.port,
            enable_ssl: config.enable_ssl,
        };
        let sent = ctx.services.send_email(&request).await?;
        Ok(single("status", JsonValue::Bool(sent)))
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::external())
    }

    fn on_exhausted(&self, node: &Node, error: &NodeError) -> Option<PortValues> {
        if !error.is_transient() {
            return None;
        }
        warn!(node_id = %node.id, %error, "email not sent, reporting status false");
        Some(single("status", JsonValue::Bool(false)))
    }
}

/// `automation-slack`
pub struct SlackExecutor;

#[async_trait]
impl NodeExecutor for SlackExecutor {
    async fn execute(
        &self,
        node: &Node,
        inputs: &PortValues,
        ctx: &NodeContext,
    ) -> Result<PortValues, NodeError> {
        let NodeConfig::Slack(config) = &node.config else {
            return Err(wrong_config(node, NodeKind::Slack));
        };
        let message_id = ctx
            .services
            .send_slack(
                required_text(inputs, "channel")?,
                required_text(inputs, "message")?,
                &config.bot_token,
                &config.username,
            )
            .await?;
        Ok(single("messageId", JsonValue::String(message_id)))
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::external())
    }
}

/// `automation-zapier`: posts `data` to the webhook.
pub struct ZapierExecutor;

#[async_trait]
impl NodeExecutor for ZapierExecutor {
    async fn execute(
        &self,
        node: &Node,
        inputs: &PortValues,
        ctx: &NodeContext,
    ) -> Result<PortValues, NodeError> {
        let NodeConfig::Zapier(config) = &node.config else {
            return Err(wrong_config(node, NodeKind::Zapier));
        };
        let body = object_or_empty(inputs, "data")?;
        let response = ctx
            .services
            .http_post(
                &config.webhook_url,
                &config.method.to_ascii_uppercase(),
                &body,
            )
            .await?;
        Ok(single("response", response))
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::external())
    }
}

/// `automation-powerautomate`: posts `trigger` to the flow, wrapped with the
/// trigger name when one is set.
pub struct PowerAutomateExecutor;

#[async_trait]
impl NodeExecutor for PowerAutomateExecutor {
    async fn execute(
        &self,
        node: &Node,
        inputs: &PortValues,
        ctx: &NodeContext,
    ) -> Result<PortValues, NodeError> {
        let NodeConfig::PowerAutomate(config) = &node.config else {
            return Err(wrong_config(node, NodeKind::PowerAutomate));
        };
        let trigger = object_or_empty(inputs, "trigger")?;
        let body = if config.trigger_name.is_empty() {
            trigger
        } else {
            json!({"triggerName": config.trigger_name, "data": trigger})
        };
        let result = ctx.services.http_post(&config.flow_url, "POST", &body).await?;
        Ok(single("result", result))
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::external())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeServices, context};
    use std::sync::Arc;

    fn node(kind: NodeKind, properties: JsonValue) -> Node {
        let JsonValue::Object(properties) = properties else {
            panic!("properties must be an object");
        };
        Node::new("n".into(), kind, properties).unwrap()
    }

    fn email_inputs() -> PortValues {
        PortValues::from([
            ("to".to_string(), json!("ops@example.com")),
            ("subject".to_string(), json!("Report")),
            ("body".to_string(), json!("All good")),
        ])
    }

    #[tokio::test]
    async fn email_uses_configured_server() {
        let services = Arc::new(FakeServices::echo());
        let node = node(NodeKind::Email, json!({"smtpServer": "mail.example.com", "port": 465}));

        let outputs = EmailExecutor
            .execute(&node, &email_inputs(), &context(services.clone()))
            .await
            .unwrap();

        assert_eq!(outputs["status"], true);
        let sent = services.emails();
        assert_eq!(sent[0].smtp_server, "mail.example.com");
        assert_eq!(sent[0].port, 465);
        assert_eq!(sent[0].subject, "Report");
    }

    #[test]
    fn email_exhaustion_reports_false_for_transient_errors() {
        let node = node(NodeKind::Email, json!({}));
        let transient = NodeError::ExternalFailure {
            message: "timeout".to_string(),
            attempts: 3,
        };
        assert_eq!(
            EmailExecutor.on_exhausted(&node, &transient),
            Some(single("status", json!(false)))
        );
        let rejected = NodeError::ExternalRejected {
            message: "no such mailbox".to_string(),
        };
        assert_eq!(EmailExecutor.on_exhausted(&node, &rejected), None);
        assert_eq!(SlackExecutor.on_exhausted(&node, &transient), None);
    }

    #[tokio::test]
    async fn slack_returns_message_id() {
        let node = node(NodeKind::Slack, json!({}));
        let inputs = PortValues::from([
            ("channel".to_string(), json!("ops")),
            ("message".to_string(), json!("deployed")),
        ]);
        let outputs = SlackExecutor
            .execute(&node, &inputs, &context(Arc::new(FakeServices::echo())))
            .await
            .unwrap();
        assert_eq!(outputs["messageId"], "msg-ops");
    }

    #[tokio::test]
    async fn webhooks_post_their_payloads() {
        let services = Arc::new(FakeServices::echo());
        let zapier = node(
            NodeKind::Zapier,
            json!({"webhookUrl": "https://hooks.example.com/z", "method": "put"}),
        );
        ZapierExecutor
            .execute(
                &zapier,
                &single("data", json!({"a": 1})),
                &context(services.clone()),
            )
            .await
            .unwrap();

        let flow = node(
            NodeKind::PowerAutomate,
            json!({"flowUrl": "https://flow.example.com", "triggerName": "manual"}),
        );
        let outputs = PowerAutomateExecutor
            .execute(&flow, &PortValues::new(), &context(services.clone()))
            .await
            .unwrap();
        assert_eq!(outputs["result"]["ok"], true);

        let posts = services.posts();
        assert_eq!(posts[0].1, "PUT");
        assert_eq!(posts[0].2, json!({"a": 1}));
        assert_eq!(posts[1].0, "https://flow.example.com");
        assert_eq!(posts[1].2, json!({"triggerName": "manual", "data": {}}));
    }
}
