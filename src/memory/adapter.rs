//! Transcript to backend history conversion.
//!
//! Each entry becomes a single-part request or response turn, then adjacent
//! turns of the same kind are merged so the backend sees strictly
//! alternating request/response turns. System notes, user utterances and
//! tool results are request-kind; assistant text and tool requests are
//! response-kind.

use serde_json::Value;

use crate::error::Result;
use crate::types::{
    MessageEntry, ModelTurn, RequestPart, ResponsePart, ToolCallPart, ToolReturnPart,
};

/// Convert one entry into a single-part turn.
pub fn entry_to_turn(entry: &MessageEntry) -> ModelTurn {
    match entry {
        MessageEntry::System { content, timestamp } => ModelTurn::Request {
            parts: vec![RequestPart::SystemPrompt {
                content: content.clone(),
                timestamp: *timestamp,
            }],
        },
        MessageEntry::User { content, timestamp } => ModelTurn::Request {
            parts: vec![RequestPart::UserPrompt {
                content: content.clone(),
                timestamp: *timestamp,
            }],
        },
        MessageEntry::ToolResult {
            tool_name,
            content,
            tool_call_id,
            timestamp,
        } => ModelTurn::Request {
            parts: vec![RequestPart::ToolReturn(ToolReturnPart {
                tool_name: tool_name.clone(),
                content: content.clone(),
                tool_call_id: tool_call_id.clone(),
                timestamp: *timestamp,
            })],
        },
        MessageEntry::Assistant { content, timestamp } => ModelTurn::Response {
            parts: vec![ResponsePart::Text {
                content: content.clone(),
            }],
            timestamp: *timestamp,
        },
        MessageEntry::ToolRequest {
            tool_name,
            args,
            tool_call_id,
            timestamp,
        } => ModelTurn::Response {
            parts: vec![ResponsePart::ToolCall(ToolCallPart {
                tool_name: tool_name.clone(),
                args: args.clone(),
                tool_call_id: tool_call_id.clone(),
            })],
            timestamp: *timestamp,
        },
    }
}

/// Merge runs of adjacent same-kind turns, concatenating parts in order.
///
/// Idempotent: merged output contains no adjacent same-kind turns.
pub fn merge_turns(turns: Vec<ModelTurn>) -> Vec<ModelTurn> {
    let mut merged: Vec<ModelTurn> = Vec::with_capacity(turns.len());
    for turn in turns {
        match (merged.last_mut(), turn) {
            (Some(ModelTurn::Request { parts }), ModelTurn::Request { parts: next }) => {
                parts.extend(next);
            }
            (Some(ModelTurn::Response { parts, .. }), ModelTurn::Response { parts: next, .. }) => {
                parts.extend(next);
            }
            (_, turn) => merged.push(turn),
        }
    }
    merged
}

/// Build merged backend history from transcript entries.
pub fn build_history(entries: &[MessageEntry]) -> Vec<ModelTurn> {
    merge_turns(entries.iter().map(entry_to_turn).collect())
}

/// Validate record-form entries and build merged history.
///
/// Fails before producing anything when a record is malformed.
pub fn history_from_records(records: &[Value]) -> Result<Vec<ModelTurn>> {
    let entries = records
        .iter()
        .map(MessageEntry::from_record)
        .collect::<Result<Vec<_>>>()?;
    Ok(build_history(&entries))
}
