//! Event vocabularies.
//!
//! [`BackendEvent`] is what a generation backend streams. [`AgentEvent`] is
//! the normalized vocabulary the turn runner produces and the orchestrator
//! and session consume.

use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use strum::IntoStaticStr;

use super::decision::Decision;
use super::turn::{ResponsePart, ToolCallPart, ToolReturnPart};

/// Incremental update to an in-progress response segment.
#[derive(Debug, Clone, PartialEq)]
pub enum PartDelta {
    Text { content: String },
    ToolCallArgs { args_delta: String },
    Thinking { content: String },
}

/// How a generation run settled.
#[derive(Debug, Clone)]
pub enum RunOutput {
    Text(String),
    Decision(Arc<dyn Decision>),
}

/// Low-level event streamed by a generation backend.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// A new response segment begins.
    PartStart { index: usize, part: ResponsePart },
    PartDelta { index: usize, delta: PartDelta },
    PartEnd { index: usize },
    /// A tool call is dispatched to its implementation.
    ToolInvoked { call: ToolCallPart },
    ToolReturned { result: ToolReturnPart },
    /// The backend knows which output branch will be final.
    FinalResult { tool_name: Option<String> },
    RunConcluded { output: RunOutput },
}

/// Metadata of a completed handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Handoff {
    pub source_agent: String,
    pub target_agent: String,
}

/// Normalized event emitted to callers.
#[derive(Debug, Clone, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AgentEvent {
    TextDelta { delta: String },
    /// A tool-call segment began; arguments may still be streaming.
    ToolCallStarted { call: ToolCallPart },
    /// A tool call was dispatched with its complete arguments.
    ToolInvoked { call: ToolCallPart },
    ToolResult { result: ToolReturnPart },
    /// A structured result, not yet interpreted.
    Decision {
        agent: String,
        decision: Arc<dyn Decision>,
    },
    Handoff(Handoff),
    Hangup {
        agent: String,
        decision: Arc<dyn Decision>,
    },
}

impl AgentEvent {
    pub fn text(delta: impl Into<String>) -> Self {
        Self::TextDelta { delta: delta.into() }
    }

    /// Discriminant name, e.g. `"text_delta"`.
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Text carried by a text delta.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::TextDelta { delta } => Some(delta),
            _ => None,
        }
    }

    /// Discriminated JSON payload.
    pub fn payload(&self) -> Value {
        let body = match self {
            Self::TextDelta { delta } => json!({ "delta": delta }),
            Self::ToolCallStarted { call } | Self::ToolInvoked { call } => json!({ "call": call }),
            Self::ToolResult { result } => json!({ "result": result }),
            Self::Decision { agent, decision } | Self::Hangup { agent, decision } => json!({
                "agent": agent,
                "schema": decision.schema_name(),
                "fields": decision.fields(),
            }),
            Self::Handoff(handoff) => json!(handoff),
        };
        json!({ "type": self.kind(), "data": body })
    }
}

impl Serialize for AgentEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.payload().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_snake_case() {
        assert_eq!(AgentEvent::text("您好").kind(), "text_delta");
        let handoff = AgentEvent::Handoff(Handoff {
            source_agent: "a".into(),
            target_agent: "b".into(),
        });
        assert_eq!(handoff.kind(), "handoff");
    }

    #[test]
    fn payload_is_discriminated() {
        let payload = AgentEvent::text("您好").payload();
        assert_eq!(payload["type"], "text_delta");
        assert_eq!(payload["data"]["delta"], "您好");
    }
}
