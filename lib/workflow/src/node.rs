//! Workflow node types and configurations.
//!
//! A node in a stored graph is an id, a type tag and a bag of untyped JSON
//! properties. Building a [`Node`] validates those properties into the
//! type's [`NodeConfig`] record and derives its ports, so executors never see
//! raw property JSON they have not been promised.

use crate::path::JsonPath;
use crate::port::{InputPort, OutputPort, PortType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Raw node properties as stored in the graph definition.
pub type Properties = Map<String, JsonValue>;

/// Identifier of a node, unique within one graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Broad family a node type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Calls an AI provider.
    Ai,
    /// Calls a messaging or webhook service.
    Automation,
    /// Shapes control flow.
    Logic,
    /// Moves values in and out of the graph.
    Data,
}

/// The type tag of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(rename = "ai-text")]
    AiText,
    #[serde(rename = "ai-image")]
    AiImage,
    #[serde(rename = "ai-speech")]
    AiSpeech,
    #[serde(rename = "ai-translate")]
    AiTranslate,
    #[serde(rename = "ai-sentiment")]
    AiSentiment,
    #[serde(rename = "automation-email")]
    Email,
    #[serde(rename = "automation-slack")]
    Slack,
    #[serde(rename = "automation-zapier")]
    Zapier,
    #[serde(rename = "automation-powerautomate")]
    PowerAutomate,
    #[serde(rename = "logic-condition")]
    Condition,
    #[serde(rename = "logic-loop")]
    Loop,
    #[serde(rename = "logic-merge")]
    Merge,
    #[serde(rename = "data-input")]
    DataInput,
    #[serde(rename = "data-output")]
    DataOutput,
    #[serde(rename = "data-transform")]
    Transform,
}

impl NodeKind {
    /// Every built-in node type.
    pub const ALL: [Self; 15] = [
        Self::AiText,
        Self::AiImage,
        Self::AiSpeech,
        Self::AiTranslate,
        Self::AiSentiment,
        Self::Email,
        Self::Slack,
        Self::Zapier,
        Self::PowerAutomate,
        Self::Condition,
        Self::Loop,
        Self::Merge,
        Self::DataInput,
        Self::DataOutput,
        Self::Transform,
    ];

    /// Returns the type tag used in graph definitions.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::AiText => "ai-text",
            Self::AiImage => "ai-image",
            Self::AiSpeech => "ai-speech",
            Self::AiTranslate => "ai-translate",
            Self::AiSentiment => "ai-sentiment",
            Self::Email => "automation-email",
            Self::Slack => "automation-slack",
            Self::Zapier => "automation-zapier",
            Self::PowerAutomate => "automation-powerautomate",
            Self::Condition => "logic-condition",
            Self::Loop => "logic-loop",
            Self::Merge => "logic-merge",
            Self::DataInput => "data-input",
            Self::DataOutput => "data-output",
            Self::Transform => "data-transform",
        }
    }

    /// Looks up a type tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    #[must_use]
    pub const fn category(self) -> NodeCategory {
        match self {
            Self::AiText | Self::AiImage | Self::AiSpeech | Self::AiTranslate | Self::AiSentiment => {
                NodeCategory::Ai
            }
            Self::Email | Self::Slack | Self::Zapier | Self::PowerAutomate => {
                NodeCategory::Automation
            }
            Self::Condition | Self::Loop | Self::Merge => NodeCategory::Logic,
            Self::DataInput | Self::DataOutput | Self::Transform => NodeCategory::Data,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// `ai-text` properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 150,
            temperature: 0.7,
        }
    }
}

/// `ai-image` properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageConfig {
    pub provider: String,
    pub features: Vec<String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            provider: "azure".to_string(),
            features: vec![
                "description".to_string(),
                "tags".to_string(),
                "objects".to_string(),
            ],
        }
    }
}

/// `ai-speech` properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpeechConfig {
    pub language: String,
    pub provider: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            provider: "azure".to_string(),
        }
    }
}

/// `ai-translate` properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TranslateConfig {
    pub target_language: String,
    pub provider: String,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            target_language: "es".to_string(),
            provider: "google".to_string(),
        }
    }
}

/// `ai-sentiment` properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SentimentConfig {
    pub provider: String,
    pub include_opinions: bool,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            provider: "azure".to_string(),
            include_opinions: true,
        }
    }
}

/// `automation-email` properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmailConfig {
    pub smtp_server: String,
    pub port: u16,
    pub enable_ssl: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_server: "smtp.gmail.com".to_string(),
            port: 587,
            enable_ssl: true,
        }
    }
}

/// `automation-slack` properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SlackConfig {
    pub bot_token: String,
    pub username: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            username: "Workflow Bot".to_string(),
        }
    }
}

/// `automation-zapier` properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebhookConfig {
    pub webhook_url: String,
    pub method: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            method: "POST".to_string(),
        }
    }
}

/// `automation-powerautomate` properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FlowConfig {
    pub flow_url: String,
    pub trigger_name: String,
}

/// `logic-condition` properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConditionConfig {
    /// Treat an upstream failure as a `false` condition instead of failing.
    pub error_as_false: bool,
}

/// `logic-loop` properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub parallel: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            parallel: false,
        }
    }
}

/// Iteration cap applied when a loop does not set one.
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// How `logic-merge` combines its inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    #[default]
    Concat,
    Overlay,
    Zip,
}

/// `logic-merge` properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MergeConfig {
    pub merge_strategy: MergeStrategy,
    /// Number of `inputN` ports.
    pub input_count: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            merge_strategy: MergeStrategy::Concat,
            input_count: 2,
        }
    }
}

/// `data-input` properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InputConfig {
    pub default_value: JsonValue,
    /// Narrows the execution input before it is emitted.
    pub path: Option<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            default_value: JsonValue::String(String::new()),
            path: None,
        }
    }
}

/// `data-output` properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutputConfig {
    pub format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}

/// Transformations offered by `data-transform`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Transformation {
    #[default]
    Identity,
    JsonPath,
    Template,
    Arithmetic,
}

/// Operators for the `arithmetic` transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithmeticOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// `data-transform` properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransformConfig {
    pub transformation: Transformation,
    pub json_path: String,
    pub template: Option<String>,
    pub operator: Option<ArithmeticOperator>,
    pub operand: Option<f64>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            transformation: Transformation::Identity,
            json_path: "$".to_string(),
            template: None,
            operator: None,
            operand: None,
        }
    }
}

/// Validated, type-specific node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "properties")]
pub enum NodeConfig {
    #[serde(rename = "ai-text")]
    AiText(TextConfig),
    #[serde(rename = "ai-image")]
    AiImage(ImageConfig),
    #[serde(rename = "ai-speech")]
    AiSpeech(SpeechConfig),
    #[serde(rename = "ai-translate")]
    AiTranslate(TranslateConfig),
    #[serde(rename = "ai-sentiment")]
    AiSentiment(SentimentConfig),
    #[serde(rename = "automation-email")]
    Email(EmailConfig),
    #[serde(rename = "automation-slack")]
    Slack(SlackConfig),
    #[serde(rename = "automation-zapier")]
    Zapier(WebhookConfig),
    #[serde(rename = "automation-powerautomate")]
    PowerAutomate(FlowConfig),
    #[serde(rename = "logic-condition")]
    Condition(ConditionConfig),
    #[serde(rename = "logic-loop")]
    Loop(LoopConfig),
    #[serde(rename = "logic-merge")]
    Merge(MergeConfig),
    #[serde(rename = "data-input")]
    DataInput(InputConfig),
    #[serde(rename = "data-output")]
    DataOutput(OutputConfig),
    #[serde(rename = "data-transform")]
    Transform(TransformConfig),
}

impl NodeConfig {
    /// Validates raw properties for a node type.
    ///
    /// Missing properties take the type's defaults; unknown properties are
    /// ignored (they may still feed unconnected input ports).
    ///
    /// # Errors
    ///
    /// Returns every validation message found for the node.
    pub fn parse(kind: NodeKind, properties: &Properties) -> Result<Self, Vec<String>> {
        let config = match kind {
            NodeKind::AiText => Self::AiText(decode(properties)?),
            NodeKind::AiImage => Self::AiImage(decode(properties)?),
            NodeKind::AiSpeech => Self::AiSpeech(decode(properties)?),
            NodeKind::AiTranslate => Self::AiTranslate(decode(properties)?),
            NodeKind::AiSentiment => Self::AiSentiment(decode(properties)?),
            NodeKind::Email => Self::Email(decode(properties)?),
            NodeKind::Slack => Self::Slack(decode(properties)?),
            NodeKind::Zapier => Self::Zapier(decode(properties)?),
            NodeKind::PowerAutomate => Self::PowerAutomate(decode(properties)?),
            NodeKind::Condition => Self::Condition(decode(properties)?),
            NodeKind::Loop => Self::Loop(decode(properties)?),
            NodeKind::Merge => Self::Merge(decode(properties)?),
            NodeKind::DataInput => Self::DataInput(decode(properties)?),
            NodeKind::DataOutput => Self::DataOutput(decode(properties)?),
            NodeKind::Transform => Self::Transform(decode(properties)?),
        };

        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }

    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match self {
            Self::AiText(c) => {
                require_text(&mut errors, "model", &c.model);
                if !(1..=4096).contains(&c.max_tokens) {
                    errors.push(format!(
                        "maxTokens must be between 1 and 4096, got {}",
                        c.max_tokens
                    ));
                }
                if !(0.0..=2.0).contains(&c.temperature) {
                    errors.push(format!(
                        "temperature must be between 0 and 2, got {}",
                        c.temperature
                    ));
                }
            }
            Self::AiImage(c) => {
                require_text(&mut errors, "provider", &c.provider);
                if c.features.is_empty() {
                    errors.push("features must name at least one analysis".to_string());
                }
            }
            Self::AiSpeech(c) => {
                require_text(&mut errors, "language", &c.language);
                require_text(&mut errors, "provider", &c.provider);
            }
            Self::AiTranslate(c) => {
                require_text(&mut errors, "targetLanguage", &c.target_language);
                require_text(&mut errors, "provider", &c.provider);
            }
            Self::AiSentiment(c) => require_text(&mut errors, "provider", &c.provider),
            Self::Email(c) => {
                require_text(&mut errors, "smtpServer", &c.smtp_server);
                if c.port == 0 {
                    errors.push("port must be between 1 and 65535".to_string());
                }
            }
            Self::Slack(c) => require_text(&mut errors, "username", &c.username),
            Self::Zapier(c) => {
                require_text(&mut errors, "webhookUrl", &c.webhook_url);
                if !HTTP_METHODS.contains(&c.method.to_ascii_uppercase().as_str()) {
                    errors.push(format!("unsupported HTTP method '{}'", c.method));
                }
            }
            Self::PowerAutomate(c) => require_text(&mut errors, "flowUrl", &c.flow_url),
            Self::Condition(_) | Self::DataOutput(_) => {}
            Self::Loop(c) => {
                if c.max_iterations == 0 {
                    errors.push("maxIterations must be at least 1".to_string());
                }
            }
            Self::Merge(c) => {
                if !(2..=MAX_MERGE_INPUTS).contains(&c.input_count) {
                    errors.push(format!(
                        "inputCount must be between 2 and {MAX_MERGE_INPUTS}, got {}",
                        c.input_count
                    ));
                }
            }
            Self::DataInput(c) => {
                if let Some(path) = &c.path {
                    if let Err(e) = JsonPath::parse(path) {
                        errors.push(e.to_string());
                    }
                }
            }
            Self::Transform(c) => match c.transformation {
                Transformation::Identity => {}
                Transformation::JsonPath => {
                    if let Err(e) = JsonPath::parse(&c.json_path) {
                        errors.push(e.to_string());
                    }
                }
                Transformation::Template => {
                    if c.template.is_none() {
                        errors.push("template transformation needs a template".to_string());
                    }
                }
                Transformation::Arithmetic => {
                    if c.operator.is_none() {
                        errors.push("arithmetic transformation needs an operator".to_string());
                    }
                    match c.operand {
                        None => errors.push("arithmetic transformation needs an operand".to_string()),
                        Some(operand)
                            if operand == 0.0
                                && c.operator == Some(ArithmeticOperator::Divide) =>
                        {
                            errors.push("operand must not be zero for divide".to_string());
                        }
                        Some(_) => {}
                    }
                }
            },
        }
        errors
    }

    /// Returns the node type this configuration belongs to.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::AiText(_) => NodeKind::AiText,
            Self::AiImage(_) => NodeKind::AiImage,
            Self::AiSpeech(_) => NodeKind::AiSpeech,
            Self::AiTranslate(_) => NodeKind::AiTranslate,
            Self::AiSentiment(_) => NodeKind::AiSentiment,
            Self::Email(_) => NodeKind::Email,
            Self::Slack(_) => NodeKind::Slack,
            Self::Zapier(_) => NodeKind::Zapier,
            Self::PowerAutomate(_) => NodeKind::PowerAutomate,
            Self::Condition(_) => NodeKind::Condition,
            Self::Loop(_) => NodeKind::Loop,
            Self::Merge(_) => NodeKind::Merge,
            Self::DataInput(_) => NodeKind::DataInput,
            Self::DataOutput(_) => NodeKind::DataOutput,
            Self::Transform(_) => NodeKind::Transform,
        }
    }

    /// Returns the input ports for this configuration.
    #[must_use]
    pub fn input_ports(&self) -> Vec<InputPort> {
        use PortType as T;
        let ports: &[(&str, PortType)] = match self {
            Self::AiText(_) => &[("prompt", T::String)],
            Self::AiImage(_) => &[("image", T::File)],
            Self::AiSpeech(_) => &[("audio", T::File)],
            Self::AiTranslate(_) | Self::AiSentiment(_) => &[("text", T::String)],
            Self::Email(_) => &[
                ("to", T::String),
                ("subject", T::String),
                ("body", T::String),
            ],
            Self::Slack(_) => &[("channel", T::String), ("message", T::String)],
            Self::Zapier(_) => &[("data", T::Object)],
            Self::PowerAutomate(_) => &[("trigger", T::Object)],
            Self::Condition(_) => &[
                (CONDITION_PORT, T::Boolean),
                (TRUE_VALUE_PORT, T::Any),
                (FALSE_VALUE_PORT, T::Any),
            ],
            Self::Loop(_) => &[(LOOP_COLLECTION_PORT, T::Array), (LOOP_RESULT_PORT, T::Any)],
            Self::Merge(c) => {
                return (1..=c.input_count)
                    .map(|i| InputPort::new(format!("input{i}"), T::Any))
                    .collect();
            }
            Self::DataInput(_) => &[],
            Self::DataOutput(_) => &[(OUTPUT_DATA_PORT, T::Any)],
            Self::Transform(_) => &[("input", T::Any)],
        };
        ports
            .iter()
            .map(|(name, ty)| InputPort::new(*name, *ty))
            .collect()
    }

    /// Returns the output ports for this configuration.
    #[must_use]
    pub fn output_ports(&self) -> Vec<OutputPort> {
        use PortType as T;
        let ports: &[(&str, PortType)] = match self {
            Self::AiText(_) | Self::AiSpeech(_) => &[("text", T::String)],
            Self::AiImage(_) => &[("analysis", T::Object)],
            Self::AiTranslate(_) => &[("translated", T::String)],
            Self::AiSentiment(_) => &[("sentiment", T::Object)],
            Self::Email(_) => &[("status", T::Boolean)],
            Self::Slack(_) => &[("messageId", T::String)],
            Self::Zapier(_) => &[("response", T::Object)],
            Self::PowerAutomate(_) => &[("result", T::Object)],
            Self::Condition(_) => &[("result", T::Any)],
            Self::Loop(_) => &[
                (LOOP_ITEM_PORT, T::Any),
                (LOOP_INDEX_PORT, T::Number),
                (LOOP_RESULTS_PORT, T::Array),
            ],
            Self::Merge(_) => &[("merged", T::Any)],
            Self::DataInput(_) => &[("value", T::Any)],
            Self::DataOutput(_) => &[],
            Self::Transform(_) => &[("output", T::Any)],
        };
        ports
            .iter()
            .map(|(name, ty)| OutputPort::new(*name, *ty))
            .collect()
    }
}

/// Condition input selecting the branch.
pub const CONDITION_PORT: &str = "condition";
/// Condition input returned when the condition holds.
pub const TRUE_VALUE_PORT: &str = "trueValue";
/// Condition input returned otherwise.
pub const FALSE_VALUE_PORT: &str = "falseValue";
/// Loop input holding the elements to iterate.
pub const LOOP_COLLECTION_PORT: &str = "collection";
/// Loop output carrying the current element.
pub const LOOP_ITEM_PORT: &str = "item";
/// Loop output carrying the current element's position.
pub const LOOP_INDEX_PORT: &str = "index";
/// Loop input fed by the body's back-edge.
pub const LOOP_RESULT_PORT: &str = "result";
/// Loop output carrying the collected per-iteration values.
pub const LOOP_RESULTS_PORT: &str = "results";
/// The `data-output` input whose value becomes the execution output.
pub const OUTPUT_DATA_PORT: &str = "data";

const MAX_MERGE_INPUTS: usize = 16;
const HTTP_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

fn decode<T: DeserializeOwned>(properties: &Properties) -> Result<T, Vec<String>> {
    serde_json::from_value(JsonValue::Object(properties.clone())).map_err(|e| vec![e.to_string()])
}

fn require_text(errors: &mut Vec<String>, name: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{name} must not be empty"));
    }
}

/// A workflow node with validated configuration and derived ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub config: NodeConfig,
    /// The properties exactly as stored; unconnected inputs read from here.
    pub properties: Properties,
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<OutputPort>,
}

impl Node {
    /// Builds a node from its stored parts.
    ///
    /// # Errors
    ///
    /// Returns the property validation messages.
    pub fn new(id: NodeId, kind: NodeKind, properties: Properties) -> Result<Self, Vec<String>> {
        let config = NodeConfig::parse(kind, &properties)?;
        Ok(Self {
            id,
            inputs: config.input_ports(),
            outputs: config.output_ports(),
            config,
            properties,
        })
    }

    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.config.kind()
    }

    /// Returns an input port by name.
    #[must_use]
    pub fn input_port(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Returns an output port by name.
    #[must_use]
    pub fn output_port(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.iter().find(|p| p.name == name)
    }
}
