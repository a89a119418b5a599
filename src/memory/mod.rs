//! Conversation message store.

pub mod adapter;

pub use adapter::{build_history, merge_turns};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::types::{MessageEntry, ModelTurn};

/// Ordered transcript of what the caller actually heard and said.
///
/// Append order is exposure order: entries are never reordered or edited
/// after being pushed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Memory {
    entries: Vec<MessageEntry>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from record-form entries, validating each one.
    pub fn from_records(records: &[Value]) -> Result<Self> {
        let entries = records
            .iter()
            .map(MessageEntry::from_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Parse a JSON array of records.
    pub fn from_json(json: &str) -> Result<Self> {
        let records: Vec<Value> = serde_json::from_str(json)?;
        Self::from_records(&records)
    }

    pub fn push(&mut self, entry: MessageEntry) {
        self.entries.push(entry);
    }

    /// Add a user utterance.
    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.push(MessageEntry::user(text));
    }

    /// Add an assistant utterance.
    pub fn add_assistant_message(&mut self, text: impl Into<String>) {
        self.push(MessageEntry::assistant(text));
    }

    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    /// Entries appended at or after `start`.
    pub fn since(&self, start: usize) -> &[MessageEntry] {
        &self.entries[start.min(self.entries.len())..]
    }

    /// Get the last N entries.
    pub fn last_n(&self, n: usize) -> &[MessageEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// Backend history for the whole transcript.
    pub fn history(&self) -> Vec<ModelTurn> {
        build_history(&self.entries)
    }

    /// Record form of every entry.
    pub fn to_records(&self) -> Vec<Value> {
        self.entries.iter().map(MessageEntry::to_record).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<MessageEntry>> for Memory {
    fn from(entries: Vec<MessageEntry>) -> Self {
        Self { entries }
    }
}
