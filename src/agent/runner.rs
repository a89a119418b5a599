//! Single-agent turn execution.
//!
//! Drives exactly one streamed generation call and translates raw backend
//! events into [`AgentEvent`]s. No routing happens here.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::trace;

use super::definition::Agent;
use crate::error::Result;
use crate::types::{AgentEvent, BackendEvent, ModelTurn, PartDelta, ResponsePart, Route, RunOutput};

/// Per-run classification state.
#[derive(Debug)]
pub struct EventClassifier {
    agent: String,
    final_result: bool,
}

impl EventClassifier {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            final_result: false,
        }
    }

    /// Whether the backend has announced the final output branch.
    pub fn final_result(&self) -> bool {
        self.final_result
    }

    /// Map one raw event to at most one normalized event.
    pub fn classify(&mut self, event: BackendEvent) -> Option<AgentEvent> {
        match event {
            BackendEvent::PartStart {
                part: ResponsePart::ToolCall(call),
                ..
            } => Some(AgentEvent::ToolCallStarted { call }),
            BackendEvent::PartStart {
                part: ResponsePart::Text { content },
                ..
            } => Some(AgentEvent::TextDelta { delta: content }),
            BackendEvent::PartDelta {
                delta: PartDelta::Text { content },
                ..
            } => Some(AgentEvent::TextDelta { delta: content }),
            BackendEvent::ToolInvoked { call } => Some(AgentEvent::ToolInvoked { call }),
            BackendEvent::ToolReturned { result } => Some(AgentEvent::ToolResult { result }),
            BackendEvent::FinalResult { tool_name } => {
                trace!(agent = %self.agent, tool = ?tool_name, "final output branch identified");
                self.final_result = true;
                None
            }
            BackendEvent::RunConcluded {
                output: RunOutput::Decision(decision),
            } => {
                let agent = self.agent.clone();
                Some(match decision.route() {
                    Route::Hangup => AgentEvent::Hangup { agent, decision },
                    _ => AgentEvent::Decision { agent, decision },
                })
            }
            BackendEvent::RunConcluded {
                output: RunOutput::Text(_),
            }
            | BackendEvent::PartDelta { .. }
            | BackendEvent::PartEnd { .. } => None,
        }
    }
}

/// Runs the active agent for one turn.
#[derive(Debug, Clone)]
pub struct TurnRunner {
    agent: Arc<Agent>,
}

impl TurnRunner {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { agent }
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Swap the active agent between turns.
    pub fn set_agent(&mut self, agent: Arc<Agent>) {
        self.agent = agent;
    }

    /// Stream normalized events for one generation call.
    ///
    /// Backend errors end the stream with that error; nothing is retried.
    pub fn run(
        &self,
        prompt: Option<String>,
        history: Vec<ModelTurn>,
    ) -> BoxStream<'static, Result<AgentEvent>> {
        let agent = Arc::clone(&self.agent);

        let stream = async_stream::try_stream! {
            let request = agent.request(prompt, history);
            let mut raw = agent.backend().stream(request).await?;
            let mut classifier = EventClassifier::new(agent.name());

            while let Some(event) = raw.next().await {
                let event: BackendEvent = event?;
                if let Some(normalized) = classifier.classify(event) {
                    yield normalized;
                }
            }
        };

        Box::pin(stream)
    }
}

impl From<Arc<Agent>> for TurnRunner {
    fn from(agent: Arc<Agent>) -> Self {
        Self::new(agent)
    }
}
