//! Multi-agent orchestration: the handoff state machine.
//!
//! The orchestrator owns the current-agent pointer and the accumulated
//! decision state. Each call to [`Orchestrator::run`] drives the current agent
//! and intercepts decisions:
//!
//! - informational decisions are forwarded and end the turn;
//! - `end` emits the ending message and ends the conversation;
//! - a registered agent id switches the pointer, emits a handoff and starts a
//!   new turn on that agent with the same input, up to `max_cascade` turns;
//! - an unregistered id fails with [`FlowError::InvalidHandoffTarget`] before
//!   anything is mutated.

use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::registry::AgentRegistry;
use super::runner::TurnRunner;
use crate::config::FlowConfig;
use crate::error::{FlowError, Result};
use crate::types::{AgentEvent, Decision, Handoff, ModelTurn, Route, RoutingTarget};

/// Orchestrator lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Running { agent: String },
    /// A handoff is switching the pointer.
    AwaitingTransfer { from: String, to: String },
    Ended,
}

/// What a decision asks the orchestrator to do.
enum Step {
    Forward,
    Hangup,
    End,
    Transfer(String),
}

/// Owns the current agent and routes completed decisions.
pub struct Orchestrator {
    registry: AgentRegistry,
    runner: TurnRunner,
    current: String,
    agent_state: Map<String, Value>,
    config: FlowConfig,
    state_tx: watch::Sender<FlowState>,
}

impl Orchestrator {
    /// Create an orchestrator starting at `entry_agent`.
    pub fn new(mut registry: AgentRegistry, entry_agent: &str, config: FlowConfig) -> Result<Self> {
        let agent = registry.get(entry_agent)?;
        let (state_tx, _) = watch::channel(FlowState::Running {
            agent: entry_agent.to_string(),
        });
        Ok(Self {
            registry,
            runner: TurnRunner::new(agent),
            current: entry_agent.to_string(),
            agent_state: Map::new(),
            config,
            state_tx,
        })
    }

    pub fn current_agent(&self) -> &str {
        &self.current
    }

    /// Fields merged from every decision that caused a handoff.
    pub fn agent_state(&self) -> &Map<String, Value> {
        &self.agent_state
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn state(&self) -> FlowState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<FlowState> {
        self.state_tx.subscribe()
    }

    pub fn is_ended(&self) -> bool {
        matches!(*self.state_tx.borrow(), FlowState::Ended)
    }

    /// Jump to a registered agent without a decision, e.g. to replay a
    /// recorded conversation from a given step.
    pub fn set_agent(&mut self, id: &str) -> Result<()> {
        let agent = self.registry.get(id)?;
        debug!(agent = %id, "agent set manually");
        self.runner.set_agent(agent);
        self.current = id.to_string();
        self.state_tx.send_replace(FlowState::Running {
            agent: id.to_string(),
        });
        Ok(())
    }

    /// Seed accumulated state, e.g. when restoring a session.
    pub fn set_agent_state(&mut self, state: Map<String, Value>) {
        self.agent_state = state;
    }

    /// Drive the current agent for one external input.
    ///
    /// Events are yielded in backend order. A handoff cascade emits the
    /// previous agent's events completely before the next agent starts.
    /// Dropping the stream abandons the turn.
    pub fn run(
        &mut self,
        prompt: Option<String>,
        history: Vec<ModelTurn>,
    ) -> BoxStream<'_, Result<AgentEvent>> {
        let stream = async_stream::try_stream! {
            if self.is_ended() {
                warn!(agent = %self.current, "conversation already ended, ignoring input");
                return;
            }

            let max_turns = self.config.max_cascade.max(1);
            let mut turns = 0usize;

            'cascade: loop {
                turns += 1;
                let mut events = self.runner.run(prompt.clone(), history.clone());

                while let Some(event) = events.next().await {
                    let event = event?;
                    let (agent, decision) = match event {
                        AgentEvent::Decision { agent, decision } => (agent, decision),
                        AgentEvent::Hangup { .. } => {
                            debug!(agent = %self.current, "hangup requested");
                            self.state_tx.send_replace(FlowState::Ended);
                            yield event;
                            return;
                        }
                        other => {
                            yield other;
                            continue;
                        }
                    };

                    match self.resolve(decision.as_ref())? {
                        Step::Forward => {
                            yield AgentEvent::Decision { agent, decision };
                            return;
                        }
                        Step::Hangup => {
                            debug!(agent = %self.current, "hangup requested");
                            self.state_tx.send_replace(FlowState::Ended);
                            yield AgentEvent::Hangup { agent, decision };
                            return;
                        }
                        Step::End => {
                            debug!(agent = %self.current, "conversation reached end sentinel");
                            let message = self.config.ending_message().to_string();
                            self.state_tx.send_replace(FlowState::Ended);
                            yield AgentEvent::text(message);
                            return;
                        }
                        Step::Transfer(target) => {
                            let handoff = self.handoff(&target, decision.as_ref())?;
                            yield AgentEvent::Handoff(handoff);

                            if turns >= max_turns {
                                warn!(
                                    agent = %self.current,
                                    max_cascade = max_turns,
                                    "cascade bound reached, stopping handoff chain"
                                );
                                return;
                            }
                            continue 'cascade;
                        }
                    }
                }

                // Plain text (or nothing) concluded the run.
                return;
            }
        };

        Box::pin(stream)
    }

    /// Decide what a decision asks for, failing on wiring defects.
    fn resolve(&self, decision: &dyn Decision) -> Result<Step> {
        match decision.route() {
            Route::Informational => Ok(Step::Forward),
            Route::Hangup => Ok(Step::Hangup),
            Route::Transfer(RoutingTarget::End) => Ok(Step::End),
            Route::Transfer(RoutingTarget::Agent(target)) => {
                if !self.registry.contains(&target) {
                    return Err(FlowError::InvalidHandoffTarget {
                        source_agent: self.current.clone(),
                        target,
                    });
                }
                Ok(Step::Transfer(target))
            }
            Route::Transfer(RoutingTarget::Unresolved) => Err(FlowError::ProtocolViolation {
                agent: self.current.clone(),
                decision: decision.schema_name().to_string(),
            }),
        }
    }

    /// Merge the decision, switch the pointer and describe the handoff.
    fn handoff(&mut self, target: &str, decision: &dyn Decision) -> Result<Handoff> {
        let agent = self.registry.get(target)?;
        let source = std::mem::replace(&mut self.current, target.to_string());

        self.state_tx.send_replace(FlowState::AwaitingTransfer {
            from: source.clone(),
            to: target.to_string(),
        });
        self.agent_state.extend(decision.fields());
        self.runner.set_agent(agent);
        self.state_tx.send_replace(FlowState::Running {
            agent: target.to_string(),
        });

        debug!(
            source = %source,
            target = %target,
            decision = decision.schema_name(),
            "agent handoff"
        );
        Ok(Handoff {
            source_agent: source,
            target_agent: target.to_string(),
        })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("current", &self.current)
            .field("state", &*self.state_tx.borrow())
            .field("agents", &self.registry.ids())
            .field("max_cascade", &self.config.max_cascade)
            .finish()
    }
}
