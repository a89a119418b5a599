//! Shared test helpers and a scripted generation backend.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use callflow::agent::{AgentDefinition, AgentRegistry, Orchestrator};
use callflow::backend::{BackendEventStream, GenerationBackend, GenerationRequest};
use callflow::config::FlowConfig;
use callflow::error::{FlowError, Result};
use callflow::tools::ToolParameters;
use callflow::types::*;

/// One scripted generation call.
pub enum Script {
    Events(Vec<BackendEvent>),
    /// `stream` itself fails.
    Fail(String),
    /// Events, then an error item mid-stream.
    FailAfter(Vec<BackendEvent>, String),
}

/// A backend that replays queued scripts, one per generation call, and
/// records every request it receives.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, events: Vec<BackendEvent>) {
        self.scripts.lock().unwrap().push_back(Script::Events(events));
    }

    pub fn push_script(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: GenerationRequest) -> Result<BackendEventStream> {
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front();
        let items: Vec<Result<BackendEvent>> = match script {
            None => return Err(FlowError::Backend("no script queued".into())),
            Some(Script::Fail(message)) => return Err(FlowError::Backend(message)),
            Some(Script::Events(events)) => events.into_iter().map(Ok).collect(),
            Some(Script::FailAfter(events, message)) => events
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(FlowError::Backend(message))))
                .collect(),
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// Text streamed as one start part plus deltas, concluded as free text.
pub fn text_script(chunks: &[&str]) -> Vec<BackendEvent> {
    let mut events = Vec::new();
    if let Some((first, rest)) = chunks.split_first() {
        events.push(BackendEvent::PartStart {
            index: 0,
            part: ResponsePart::Text {
                content: first.to_string(),
            },
        });
        events.push(BackendEvent::FinalResult { tool_name: None });
        for chunk in rest {
            events.push(BackendEvent::PartDelta {
                index: 0,
                delta: PartDelta::Text {
                    content: chunk.to_string(),
                },
            });
        }
        events.push(BackendEvent::PartEnd { index: 0 });
    }
    events.push(BackendEvent::RunConcluded {
        output: RunOutput::Text(chunks.concat()),
    });
    events
}

/// The model calls a tool and gets `result` back.
pub fn tool_script(
    tool_name: &str,
    args: Value,
    call_id: &str,
    result: Value,
) -> Vec<BackendEvent> {
    let call = ToolCallPart::new(tool_name, args, call_id);
    vec![
        BackendEvent::PartStart {
            index: 0,
            part: ResponsePart::ToolCall(call.clone()),
        },
        BackendEvent::PartEnd { index: 0 },
        BackendEvent::ToolInvoked { call },
        BackendEvent::ToolReturned {
            result: ToolReturnPart::new(tool_name, result, call_id),
        },
    ]
}

/// The model fills `schema` with `args`, the way an output tool surfaces.
pub fn decision_script(schema: &Arc<dyn DecisionSchema>, args: Value) -> Vec<BackendEvent> {
    let tool_name = schema.output_tool_name();
    let call_id = generate_tool_call_id();
    let call = ToolCallPart::new(&tool_name, args.clone(), &call_id);
    let decision = schema.parse(&args).unwrap();
    vec![
        BackendEvent::PartStart {
            index: 0,
            part: ResponsePart::ToolCall(call.clone()),
        },
        BackendEvent::FinalResult {
            tool_name: Some(tool_name.clone()),
        },
        BackendEvent::PartEnd { index: 0 },
        BackendEvent::ToolInvoked { call },
        BackendEvent::ToolReturned {
            result: ToolReturnPart::new(
                &tool_name,
                Value::String("Final result processed.".into()),
                &call_id,
            ),
        },
        BackendEvent::RunConcluded {
            output: RunOutput::Decision(decision),
        },
    ]
}

/// Text followed by a decision in the same run.
pub fn text_then_decision(
    chunks: &[&str],
    schema: &Arc<dyn DecisionSchema>,
    args: Value,
) -> Vec<BackendEvent> {
    let mut events: Vec<BackendEvent> = text_script(chunks)
        .into_iter()
        .filter(|e| {
            !matches!(
                e,
                BackendEvent::RunConcluded { .. } | BackendEvent::FinalResult { .. }
            )
        })
        .collect();
    events.extend(decision_script(schema, args));
    events
}

/// Test decision vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum StepDecision {
    /// Routes to `next`; `None` leaves the target unresolved.
    Advance {
        next: Option<String>,
        #[serde(default)]
        answer: Option<String>,
    },
    Note {
        text: String,
    },
}

impl Decision for StepDecision {
    fn schema_name(&self) -> &str {
        match self {
            Self::Advance { .. } => "Advance",
            Self::Note { .. } => "Note",
        }
    }

    fn route(&self) -> Route {
        match self {
            Self::Advance { next, .. } => Route::Transfer(RoutingTarget::from_id(next.as_deref())),
            Self::Note { .. } => Route::Informational,
        }
    }

    fn fields(&self) -> Map<String, Value> {
        fields_of(self)
    }
}

pub fn advance_schema() -> Arc<dyn DecisionSchema> {
    let params = ToolParameters::from_schema(serde_json::json!({
        "type": "object",
        "properties": {
            "next": { "type": ["string", "null"] },
            "answer": { "type": ["string", "null"] },
        },
        "required": [],
    }));
    TypedSchema::<StepDecision>::variant("Advance", "Finish the step", params).shared()
}

pub fn note_schema() -> Arc<dyn DecisionSchema> {
    let params = ToolParameters::object().string("text", "Note text", true).build();
    TypedSchema::<StepDecision>::variant("Note", "Record a note", params).shared()
}

pub fn hangup_schema() -> Arc<dyn DecisionSchema> {
    HangupDecision::schema().shared()
}

pub fn agent(
    backend: &Arc<ScriptedBackend>,
    name: &str,
    decision: Option<Arc<dyn DecisionSchema>>,
) -> AgentDefinition {
    AgentDefinition::builder()
        .name(name)
        .backend(Arc::clone(backend) as Arc<dyn GenerationBackend>)
        .instruction(format!("You are {name}."))
        .maybe_decision(decision)
        .build()
}

/// `greeting -> question -> hangup`, all driven by one backend.
pub fn three_step_registry(backend: &Arc<ScriptedBackend>) -> AgentRegistry {
    AgentRegistry::new()
        .register(agent(backend, "greeting", Some(advance_schema())))
        .register(agent(backend, "question", Some(advance_schema())))
        .register(AgentDefinition::hangup(Arc::clone(backend) as Arc<dyn GenerationBackend>))
}

pub fn orchestrator(backend: &Arc<ScriptedBackend>, config: FlowConfig) -> Orchestrator {
    Orchestrator::new(three_step_registry(backend), "greeting", config).unwrap()
}

/// Concatenated text deltas.
pub fn collect_text(events: &[AgentEvent]) -> String {
    events.iter().filter_map(AgentEvent::as_text).collect()
}

pub fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
    events.iter().map(AgentEvent::kind).collect()
}
