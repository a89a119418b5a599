//! The externally facing turn boundary.
//!
//! A session owns the transcript. Each external input is appended as a user
//! entry, the orchestrator is driven against the merged history, and the
//! resulting events are committed back once the turn finishes. Text and tool
//! traffic keep their arrival order; text may be truncated to what playback
//! actually exposed.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::orchestrator::{FlowState, Orchestrator};
use crate::error::Result;
use crate::memory::Memory;
use crate::types::{is_output_tool, AgentEvent, Decision, Handoff, MessageEntry};

/// Result of one external input.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// Entries appended during this turn, the user entry included.
    pub new_messages: Vec<MessageEntry>,
    pub handoffs: Vec<Handoff>,
    /// Assistant text committed for this turn.
    pub output_text: String,
    /// Last decision forwarded without routing, if any.
    pub decision: Option<Arc<dyn Decision>>,
    pub finished: bool,
}

/// Persisted shape of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub messages: Vec<Value>,
    pub agent_state: Map<String, Value>,
    pub current_agent: String,
    pub finished: bool,
}

/// One conversation. Turns are strictly sequential.
#[derive(Debug)]
pub struct AgentSession {
    orchestrator: Orchestrator,
    memory: Memory,
    handoffs: Vec<Handoff>,
    finished: bool,
}

impl AgentSession {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            memory: Memory::new(),
            handoffs: Vec::new(),
            finished: false,
        }
    }

    /// Start from an existing transcript.
    pub fn with_memory(mut self, memory: Memory) -> Self {
        self.memory = memory;
        self
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Replace the transcript, e.g. with an evaluation sample.
    pub fn set_memory(&mut self, memory: Memory) {
        self.memory = memory;
    }

    /// Jump to a registered agent.
    pub fn set_agent(&mut self, id: &str) -> Result<()> {
        self.orchestrator.set_agent(id)?;
        self.finished = false;
        Ok(())
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn current_agent(&self) -> &str {
        self.orchestrator.current_agent()
    }

    /// Accumulated decision fields.
    pub fn agent_state(&self) -> &Map<String, Value> {
        self.orchestrator.agent_state()
    }

    /// Every handoff recorded so far.
    pub fn handoffs(&self) -> &[Handoff] {
        &self.handoffs
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Persistable view of the session.
    pub fn snapshot(&self) -> SessionState {
        SessionState {
            messages: self.memory.to_records(),
            agent_state: self.orchestrator.agent_state().clone(),
            current_agent: self.orchestrator.current_agent().to_string(),
            finished: self.finished,
        }
    }

    /// Restore transcript, pointer and accumulated state from a snapshot.
    pub fn restore(&mut self, state: &SessionState) -> Result<()> {
        let memory = Memory::from_records(&state.messages)?;
        self.orchestrator.set_agent(&state.current_agent)?;
        self.orchestrator.set_agent_state(state.agent_state.clone());
        self.memory = memory;
        self.finished = state.finished;
        Ok(())
    }

    /// Run a full turn, draining every event.
    ///
    /// On a backend error everything received before the failure is still
    /// committed, then the error is returned.
    pub async fn chat(&mut self, input: impl Into<String>) -> Result<TurnOutcome> {
        let mut turn = self.begin_turn(input);
        loop {
            match turn.next_event().await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    let outcome = turn.finish();
                    warn!(
                        error = %e,
                        committed = outcome.new_messages.len(),
                        "turn failed, kept received output"
                    );
                    return Err(e);
                }
            }
        }
        Ok(turn.finish())
    }

    /// Start a turn the caller pulls events from.
    ///
    /// Input after the session finished is ignored: the returned turn yields
    /// nothing and commits nothing.
    pub fn begin_turn(&mut self, input: impl Into<String>) -> Turn<'_> {
        let Self {
            orchestrator,
            memory,
            handoffs,
            finished,
        } = self;
        let state_rx = orchestrator.watch_state();

        if *finished {
            warn!(agent = %orchestrator.current_agent(), "input after session finished, ignoring");
            return Turn {
                events: None,
                memory,
                session_handoffs: handoffs,
                finished,
                state_rx,
                start: 0,
                accepted: false,
                staged: Vec::new(),
                handoffs: Vec::new(),
                decision: None,
                output_text: String::new(),
            };
        }

        let start = memory.len();
        memory.add_user_message(input);
        debug!(agent = %orchestrator.current_agent(), entries = memory.len(), "turn started");
        let history = memory.history();
        let events = orchestrator.run(None, history);

        Turn {
            events: Some(events),
            memory,
            session_handoffs: handoffs,
            finished,
            state_rx,
            start,
            accepted: true,
            staged: Vec::new(),
            handoffs: Vec::new(),
            decision: None,
            output_text: String::new(),
        }
    }
}

/// Output received during a turn, in arrival order.
#[derive(Debug)]
enum Staged {
    Text(String),
    Entry(MessageEntry),
}

/// An in-flight turn.
///
/// Nothing reaches the transcript until [`Turn::finish`] or
/// [`Turn::finish_heard`]. Stopping before the stream is exhausted models an
/// interruption: call `finish_heard` with the number of characters playback
/// exposed.
pub struct Turn<'a> {
    events: Option<BoxStream<'a, Result<AgentEvent>>>,
    memory: &'a mut Memory,
    session_handoffs: &'a mut Vec<Handoff>,
    finished: &'a mut bool,
    state_rx: watch::Receiver<FlowState>,
    start: usize,
    accepted: bool,
    staged: Vec<Staged>,
    handoffs: Vec<Handoff>,
    decision: Option<Arc<dyn Decision>>,
    output_text: String,
}

impl Turn<'_> {
    /// Whether the input was accepted (the session had not finished).
    pub fn accepted(&self) -> bool {
        self.accepted
    }

    /// Text received so far this turn.
    pub fn pending_text(&self) -> String {
        self.staged
            .iter()
            .filter_map(|s| match s {
                Staged::Text(text) => Some(text.as_str()),
                Staged::Entry(_) => None,
            })
            .collect()
    }

    /// Pull the next event, staging text and tool traffic for commit.
    ///
    /// An error ends the turn; [`Turn::finish`] may still be called to
    /// commit what was received.
    pub async fn next_event(&mut self) -> Result<Option<AgentEvent>> {
        let Some(events) = self.events.as_mut() else {
            return Ok(None);
        };
        let event = match events.next().await {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                self.events = None;
                self.observe_state();
                return Err(e);
            }
            None => {
                self.events = None;
                self.observe_state();
                return Ok(None);
            }
        };

        match &event {
            AgentEvent::TextDelta { delta } => match self.staged.last_mut() {
                Some(Staged::Text(text)) => text.push_str(delta),
                _ => self.staged.push(Staged::Text(delta.clone())),
            },
            AgentEvent::ToolInvoked { call } if !is_output_tool(&call.tool_name) => {
                self.staged.push(Staged::Entry(MessageEntry::tool_request(
                    &call.tool_name,
                    call.args.clone(),
                    &call.tool_call_id,
                )));
            }
            AgentEvent::ToolResult { result } if !is_output_tool(&result.tool_name) => {
                self.staged.push(Staged::Entry(MessageEntry::tool_result(
                    &result.tool_name,
                    result.content.clone(),
                    &result.tool_call_id,
                )));
            }
            AgentEvent::Handoff(handoff) => {
                self.handoffs.push(handoff.clone());
                self.session_handoffs.push(handoff.clone());
            }
            AgentEvent::Hangup { .. } => *self.finished = true,
            AgentEvent::Decision { decision, .. } => self.decision = Some(Arc::clone(decision)),
            _ => {}
        }
        self.observe_state();
        Ok(Some(event))
    }

    /// Commit everything received and close the turn.
    pub fn finish(mut self) -> TurnOutcome {
        self.commit(None);
        self.outcome()
    }

    /// Commit only the first `heard_chars` characters of this turn's text.
    ///
    /// Tool traffic is committed in place regardless; text past the budget is
    /// dropped.
    pub fn finish_heard(mut self, heard_chars: usize) -> TurnOutcome {
        self.commit(Some(heard_chars));
        self.outcome()
    }

    fn observe_state(&mut self) {
        if matches!(*self.state_rx.borrow(), FlowState::Ended) {
            *self.finished = true;
        }
    }

    /// Move staged output into the transcript, spending `budget` characters
    /// across all text segments when given.
    fn commit(&mut self, mut budget: Option<usize>) {
        for staged in std::mem::take(&mut self.staged) {
            let text = match staged {
                Staged::Entry(entry) => {
                    self.memory.push(entry);
                    continue;
                }
                Staged::Text(text) => text,
            };
            let text: String = match budget.as_mut() {
                Some(left) => {
                    let kept: String = text.chars().take(*left).collect();
                    *left -= kept.chars().count();
                    kept
                }
                None => text,
            };
            if text.is_empty() {
                continue;
            }
            self.output_text.push_str(&text);
            self.memory.push(MessageEntry::assistant(text));
        }
    }

    fn outcome(mut self) -> TurnOutcome {
        self.events = None;
        self.observe_state();
        if *self.finished && self.accepted {
            info!(handoffs = self.handoffs.len(), "session finished");
        }
        TurnOutcome {
            new_messages: if self.accepted {
                self.memory.since(self.start).to_vec()
            } else {
                Vec::new()
            },
            handoffs: self.handoffs,
            output_text: self.output_text,
            decision: self.decision,
            finished: *self.finished,
        }
    }
}
