//! Backend-native history turns.
//!
//! A generation backend sees history as alternating request and response
//! turns, each made of ordered parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool call the model issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub tool_name: String,
    /// Either a decoded object or the raw argument text.
    pub args: Value,
    pub tool_call_id: String,
}

impl ToolCallPart {
    pub fn new(tool_name: impl Into<String>, args: Value, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            args,
            tool_call_id: tool_call_id.into(),
        }
    }

    /// Arguments as JSON text, the form chat-completion APIs expect.
    pub fn args_json(&self) -> String {
        match &self.args {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        }
    }
}

/// The value a tool returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReturnPart {
    pub tool_name: String,
    pub content: Value,
    pub tool_call_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ToolReturnPart {
    pub fn new(
        tool_name: impl Into<String>,
        content: Value,
        tool_call_id: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            content,
            tool_call_id: tool_call_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Content rendered as text for the next model request.
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Part of a request turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part_kind", rename_all = "kebab-case")]
pub enum RequestPart {
    SystemPrompt {
        content: String,
        timestamp: DateTime<Utc>,
    },
    UserPrompt {
        content: String,
        timestamp: DateTime<Utc>,
    },
    ToolReturn(ToolReturnPart),
}

/// Part of a response turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part_kind", rename_all = "kebab-case")]
pub enum ResponsePart {
    Text { content: String },
    ToolCall(ToolCallPart),
}

/// One turn of backend history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ModelTurn {
    Request {
        parts: Vec<RequestPart>,
    },
    Response {
        parts: Vec<ResponsePart>,
        timestamp: DateTime<Utc>,
    },
}

impl ModelTurn {
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request { .. })
    }

    /// Number of parts in this turn.
    pub fn len(&self) -> usize {
        match self {
            Self::Request { parts } => parts.len(),
            Self::Response { parts, .. } => parts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
