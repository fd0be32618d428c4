use serde::de::Error as _;
use serde::{Deserialize, Serialize};

/// An interactive element tagged during the last perception cycle.
///
/// `x`/`y` are the element's center in CSS pixels. Descriptors are rebuilt
/// from scratch every cycle, so an index into the list is only valid until
/// the next perception pass; stale indices must fail as out-of-range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default, rename = "ariaLabel")]
    pub aria_label: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// A message in the conversation history sent to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Mutable run state threaded through every loop iteration.
///
/// The page handle itself is not stored here: it is owned by the browser
/// session and never reassigned for the lifetime of a run. `history` is
/// append-only; everything else is replaced wholesale each cycle.
#[derive(Debug, Clone, Default)]
pub struct AgentState {
    pub task: String,
    /// Base64-encoded PNG of the last perception cycle.
    pub screenshot: String,
    pub bboxes: Vec<BBox>,
    pub history: Vec<ChatMessage>,
    pub last_output: String,
}

impl AgentState {
    pub fn new(task: &str) -> Self {
        Self {
            task: task.to_string(),
            ..Default::default()
        }
    }
}

/// One tool invocation as requested by the model: a name plus the raw
/// argument record. Strict schema validation happens when the dispatcher
/// parses this into a `ToolAction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(rename = "tool")]
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// The structured result of one policy invocation. The loop acts on
/// exactly one of these per iteration, via exhaustive match.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Free-form commentary without a tool call.
    Remark(String),
    /// A single tool invocation.
    Invoke(ToolCall),
    /// The task is finished; carries the final answer text.
    Complete { answer: String },
    /// Structured-extraction request: persist these orders.
    ExtractOrders(Vec<Order>),
}

/// Where a scroll applies: the whole viewport (JSON literal `"WINDOW"`)
/// or a single element referenced by bounding-box index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollTarget {
    Viewport,
    Element(usize),
}

impl<'de> Deserialize<'de> for ScrollTarget {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(usize),
            Literal(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Index(i) => Ok(ScrollTarget::Element(i)),
            Raw::Literal(s) if s == "WINDOW" => Ok(ScrollTarget::Viewport),
            Raw::Literal(s) => Err(D::Error::custom(format!(
                "scroll target must be \"WINDOW\" or an element index, got \"{s}\""
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    /// Scroll delta with the sign applied: up is negative, down positive.
    pub fn signed(self, magnitude: i64) -> i64 {
        match self {
            ScrollDirection::Up => -magnitude,
            ScrollDirection::Down => magnitude,
        }
    }
}

impl std::fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
        })
    }
}

/// A single extracted order, as persisted in the orders artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub product_name: String,
    pub product_price: i64,
    pub delivery_status: DeliveryStatus,
}

/// Closed delivery-status enumeration. Stored in the artifact as its bare
/// integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Refunded,
    Cancelled,
}

impl DeliveryStatus {
    pub fn code(self) -> u8 {
        match self {
            DeliveryStatus::Pending => 0,
            DeliveryStatus::Delivered => 1,
            DeliveryStatus::Refunded => 2,
            DeliveryStatus::Cancelled => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DeliveryStatus::Pending),
            1 => Some(DeliveryStatus::Delivered),
            2 => Some(DeliveryStatus::Refunded),
            3 => Some(DeliveryStatus::Cancelled),
            _ => None,
        }
    }
}

impl Serialize for DeliveryStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for DeliveryStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let code = u8::deserialize(deserializer)?;
        DeliveryStatus::from_code(code).ok_or_else(|| {
            D::Error::custom(format!("delivery status code must be 0..=3, got {code}"))
        })
    }
}

/// Error taxonomy for one agent run. Local faults end the run cleanly and
/// are surfaced to the operator; everything else propagates as fatal.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("bounding box index {index} is out of range ({len} elements on this page)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid arguments for tool '{tool}': {reason}")]
    BadArgs { tool: String, reason: String },
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl AgentError {
    pub fn is_local(&self) -> bool {
        !matches!(self, AgentError::Fatal(_))
    }
}
