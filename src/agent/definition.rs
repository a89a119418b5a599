//! Agent definitions and the runnable handles built from them.

use std::fmt;
use std::sync::Arc;

use bon::Builder;

use crate::backend::{GenerationBackend, GenerationRequest};
use crate::tools::Tool;
use crate::types::{DecisionSchema, HangupDecision, ModelTurn, HANGUP_AGENT};

const HANGUP_INSTRUCTION: &str = "You are closing a customer service phone call. \
Say a short, polite goodbye in Chinese that fits the conversation so far, \
then call the hang-up tool to end the call.";

/// Immutable configuration of one agent in a call flow.
///
/// ```ignore
/// let agent = AgentDefinition::builder()
///     .name("customer_name_inquiry")
///     .backend(backend.clone())
///     .instruction(GLOBAL_INSTRUCTION)
///     .step_instruction("Confirm the customer's name.")
///     .examples(vec!["Agent: 喂，您好，请问是张先生吗？".into()])
///     .decision(CustomerName::schema())
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AgentDefinition {
    #[builder(into)]
    pub name: String,
    pub backend: Arc<dyn GenerationBackend>,
    /// Global instruction shared by every step of the flow.
    #[builder(into)]
    pub instruction: String,
    #[builder(into)]
    pub step_instruction: Option<String>,
    #[builder(default)]
    pub examples: Vec<String>,
    /// Structured result the agent must fill to complete its step.
    pub decision: Option<Arc<dyn DecisionSchema>>,
    #[builder(default)]
    pub tools: Vec<Arc<dyn Tool>>,
}

impl AgentDefinition {
    /// The conventional closing agent, whose only decision is to hang up.
    pub fn hangup(backend: Arc<dyn GenerationBackend>) -> Self {
        Self::builder()
            .name(HANGUP_AGENT)
            .backend(backend)
            .instruction(HANGUP_INSTRUCTION)
            .decision(HangupDecision::schema().shared())
            .build()
    }

    /// Global, step and example instructions composed into one prompt.
    pub fn full_instruction(&self) -> String {
        let mut full = self.instruction.clone();
        if let Some(step) = self.step_instruction.as_deref().filter(|s| !s.is_empty()) {
            full.push_str(&format!("\n## Current Step Instruction:\n{step}\n\n"));
        }
        if !self.examples.is_empty() {
            full.push_str(&format!(
                "\n## Example Interaction:\n{}\n\n",
                self.examples.join("\n")
            ));
        }
        full
    }

    /// Instantiate the runnable handle.
    pub fn instantiate(&self) -> Agent {
        Agent {
            name: self.name.clone(),
            instructions: self.full_instruction(),
            backend: Arc::clone(&self.backend),
            tools: self.tools.clone(),
            decision: self.decision.clone(),
        }
    }
}

impl fmt::Debug for AgentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentDefinition")
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .field("decision", &self.decision.as_ref().map(|d| d.name().to_string()))
            .field("tools", &self.tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>())
            .finish()
    }
}

/// A runnable agent: composed instructions bound to a backend.
pub struct Agent {
    name: String,
    instructions: String,
    backend: Arc<dyn GenerationBackend>,
    tools: Vec<Arc<dyn Tool>>,
    decision: Option<Arc<dyn DecisionSchema>>,
}

impl Agent {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    pub fn decision(&self) -> Option<&Arc<dyn DecisionSchema>> {
        self.decision.as_ref()
    }

    /// Build the backend request for one turn.
    pub fn request(&self, prompt: Option<String>, history: Vec<ModelTurn>) -> GenerationRequest {
        GenerationRequest {
            agent: self.name.clone(),
            instructions: self.instructions.clone(),
            prompt,
            history,
            tools: self.tools.clone(),
            output_schema: self.decision.clone(),
        }
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .finish()
    }
}
