//! Generation backend collaborator.
//!
//! A backend accepts instructions, an optional prompt, merged history, the
//! agent's tools and an optional decision schema, and streams
//! [`BackendEvent`]s until the run concludes with free text or a decision.

pub mod http;
#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "openai")]
pub use openai::OpenAiBackend;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::tools::Tool;
use crate::types::{BackendEvent, DecisionSchema, ModelTurn};

/// Ordered stream of raw backend events.
pub type BackendEventStream = BoxStream<'static, Result<BackendEvent>>;

/// Everything a backend needs for one streamed generation call.
#[derive(Clone)]
pub struct GenerationRequest {
    /// Agent the call is made for.
    pub agent: String,
    pub instructions: String,
    pub prompt: Option<String>,
    pub history: Vec<ModelTurn>,
    pub tools: Vec<Arc<dyn Tool>>,
    /// Structured output the agent may settle on instead of free text.
    pub output_schema: Option<Arc<dyn DecisionSchema>>,
}

impl GenerationRequest {
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Look up an agent tool by name.
    pub fn find_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }
}

impl fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("agent", &self.agent)
            .field("prompt", &self.prompt)
            .field("history_turns", &self.history.len())
            .field("tools", &self.tool_names())
            .field("output_schema", &self.output_schema.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

/// Opaque streaming text generator.
///
/// Failures (transport, timeout, malformed output) are returned as errors,
/// either from `stream` itself or as an `Err` item mid-stream. The core never
/// retries them.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    async fn stream(&self, request: GenerationRequest) -> Result<BackendEventStream>;
}
