//! Convenience re-exports for common use.

pub use crate::agent::{
    AgentDefinition, AgentRegistry, AgentSession, FlowState, Orchestrator, TurnOutcome,
};
pub use crate::backend::{GenerationBackend, GenerationRequest};
pub use crate::config::{BackendConfig, FlowConfig};
pub use crate::error::{FlowError, Result};
pub use crate::memory::Memory;
pub use crate::tools::{FnTool, Tool, ToolArguments, ToolParameters};
pub use crate::types::{
    AgentEvent, Decision, DecisionSchema, Handoff, MessageEntry, Role, Route, RoutingTarget,
    TypedSchema,
};
