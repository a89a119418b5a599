//! Role-tagged conversation entries.
//!
//! Entries have two shapes. The typed [`MessageEntry`] is what the rest of the
//! crate works with. The record shape is the flat JSON object that persisted
//! transcripts and evaluation datasets use:
//!
//! ```json
//! {"role": "user", "timestamp": "2025-01-01T08:00:00+00:00", "content": "喂"}
//! {"role": "assistant", "tool_name": "lookup", "args": {}, "tool_call_id": "c1"}
//! {"role": "tool", "tool_name": "lookup", "content": "ok", "tool_call_id": "c1"}
//! ```
//!
//! Conversion from records validates role-specific fields and normalizes
//! timestamps to UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::{FlowError, Result};

/// Conversation role as it appears in record form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of the canonical transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEntry {
    System {
        content: String,
        timestamp: DateTime<Utc>,
    },
    User {
        content: String,
        timestamp: DateTime<Utc>,
    },
    Assistant {
        content: String,
        timestamp: DateTime<Utc>,
    },
    ToolRequest {
        tool_name: String,
        args: Value,
        tool_call_id: String,
        timestamp: DateTime<Utc>,
    },
    ToolResult {
        tool_name: String,
        content: Value,
        tool_call_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl MessageEntry {
    /// Create a system note.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a user utterance.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant utterance.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a tool request issued by the assistant.
    pub fn tool_request(
        tool_name: impl Into<String>,
        args: Value,
        tool_call_id: impl Into<String>,
    ) -> Self {
        Self::ToolRequest {
            tool_name: tool_name.into(),
            args,
            tool_call_id: tool_call_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a tool result.
    pub fn tool_result(
        tool_name: impl Into<String>,
        content: Value,
        tool_call_id: impl Into<String>,
    ) -> Self {
        Self::ToolResult {
            tool_name: tool_name.into(),
            content,
            tool_call_id: tool_call_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Replace the timestamp.
    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        match &mut self {
            Self::System { timestamp, .. }
            | Self::User { timestamp, .. }
            | Self::Assistant { timestamp, .. }
            | Self::ToolRequest { timestamp, .. }
            | Self::ToolResult { timestamp, .. } => *timestamp = ts,
        }
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::System { timestamp, .. }
            | Self::User { timestamp, .. }
            | Self::Assistant { timestamp, .. }
            | Self::ToolRequest { timestamp, .. }
            | Self::ToolResult { timestamp, .. } => *timestamp,
        }
    }

    /// Record-form role. Tool requests are assistant-authored.
    pub fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant { .. } | Self::ToolRequest { .. } => Role::Assistant,
            Self::ToolResult { .. } => Role::Tool,
        }
    }

    /// Text content for system, user and assistant entries.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::System { content, .. }
            | Self::User { content, .. }
            | Self::Assistant { content, .. } => Some(content),
            _ => None,
        }
    }

    /// Convert to the flat record shape.
    pub fn to_record(&self) -> Value {
        let mut record = Map::new();
        record.insert("role".into(), Value::String(self.role().to_string()));
        record.insert("timestamp".into(), Value::String(self.timestamp().to_rfc3339()));
        match self {
            Self::System { content, .. }
            | Self::User { content, .. }
            | Self::Assistant { content, .. } => {
                record.insert("content".into(), Value::String(content.clone()));
            }
            Self::ToolRequest {
                tool_name,
                args,
                tool_call_id,
                ..
            } => {
                record.insert("tool_name".into(), Value::String(tool_name.clone()));
                record.insert("args".into(), args.clone());
                record.insert("tool_call_id".into(), Value::String(tool_call_id.clone()));
            }
            Self::ToolResult {
                tool_name,
                content,
                tool_call_id,
                ..
            } => {
                record.insert("tool_name".into(), Value::String(tool_name.clone()));
                record.insert("content".into(), content.clone());
                record.insert("tool_call_id".into(), Value::String(tool_call_id.clone()));
            }
        }
        Value::Object(record)
    }

    /// Parse and validate one record.
    ///
    /// Fails with [`FlowError::MalformedEntry`] when the role is unknown or a
    /// field required by the role is absent.
    pub fn from_record(record: &Value) -> Result<Self> {
        let obj = record
            .as_object()
            .ok_or_else(|| FlowError::MalformedEntry(format!("expected an object, got {record}")))?;
        let role = obj
            .get("role")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FlowError::MalformedEntry(format!("missing required key 'role' in {record}"))
            })?;
        let timestamp = parse_timestamp(obj.get("timestamp"))?;

        match role {
            "system" => Ok(Self::System {
                content: required_str(obj, "content", record)?,
                timestamp,
            }),
            "user" => Ok(Self::User {
                content: required_str(obj, "content", record)?,
                timestamp,
            }),
            "tool" => Ok(Self::ToolResult {
                tool_name: required_str(obj, "tool_name", record)?,
                content: required(obj, "content", record)?.clone(),
                tool_call_id: tool_call_id(obj),
                timestamp,
            }),
            "assistant" => match obj.get("content") {
                Some(content) if !content.is_null() => Ok(Self::Assistant {
                    content: content
                        .as_str()
                        .ok_or_else(|| {
                            FlowError::MalformedEntry(format!(
                                "'content' must be a string in {record}"
                            ))
                        })?
                        .to_string(),
                    timestamp,
                }),
                _ if obj.contains_key("tool_name") => Ok(Self::ToolRequest {
                    tool_name: required_str(obj, "tool_name", record)?,
                    args: obj
                        .get("args")
                        .cloned()
                        .unwrap_or_else(|| Value::String(String::new())),
                    tool_call_id: tool_call_id(obj),
                    timestamp,
                }),
                _ => Err(FlowError::MalformedEntry(format!(
                    "assistant entry needs 'content' or 'tool_name': {record}"
                ))),
            },
            other => Err(FlowError::MalformedEntry(format!("unknown role '{other}'"))),
        }
    }
}

impl Serialize for MessageEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_record().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MessageEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let record = Value::deserialize(deserializer)?;
        Self::from_record(&record).map_err(serde::de::Error::custom)
    }
}

fn required<'a>(obj: &'a Map<String, Value>, key: &str, record: &Value) -> Result<&'a Value> {
    obj.get(key).ok_or_else(|| {
        FlowError::MalformedEntry(format!("missing required key '{key}' in {record}"))
    })
}

fn required_str(obj: &Map<String, Value>, key: &str, record: &Value) -> Result<String> {
    required(obj, key, record)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| FlowError::MalformedEntry(format!("'{key}' must be a string in {record}")))
}

fn tool_call_id(obj: &Map<String, Value>) -> String {
    obj.get("tool_call_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(generate_tool_call_id)
}

/// Generate an identifier for tool calls that arrived without one.
pub fn generate_tool_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Normalize a record timestamp to UTC.
///
/// Missing or null means "now". Naive timestamps are taken as UTC. Offsets
/// (including a trailing `Z`) are honored and converted.
pub fn parse_timestamp(value: Option<&Value>) -> Result<DateTime<Utc>> {
    match value {
        None | Some(Value::Null) => Ok(Utc::now()),
        Some(Value::String(raw)) => parse_timestamp_str(raw),
        Some(other) => Err(FlowError::MalformedEntry(format!(
            "invalid timestamp type: {other}"
        ))),
    }
}

/// Parse an ISO-8601 style timestamp string into UTC.
pub fn parse_timestamp_str(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }

    Err(FlowError::MalformedEntry(format!("invalid timestamp '{raw}'")))
}
