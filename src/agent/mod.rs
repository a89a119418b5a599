//! Agents and the multi-agent turn machinery.

pub mod definition;
pub mod orchestrator;
pub mod registry;
pub mod runner;
pub mod session;

pub use definition::{Agent, AgentDefinition};
pub use orchestrator::{FlowState, Orchestrator};
pub use registry::AgentRegistry;
pub use runner::{EventClassifier, TurnRunner};
pub use session::{AgentSession, SessionState, Turn, TurnOutcome};
