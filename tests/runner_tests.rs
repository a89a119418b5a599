//! Tests for single-agent turn execution and event classification.

mod common;

use std::sync::Arc;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;

use callflow::agent::{AgentRegistry, EventClassifier, TurnRunner};
use callflow::error::FlowError;
use callflow::types::*;
use common::*;

async fn run_agent(
    backend: &Arc<ScriptedBackend>,
    prompt: Option<&str>,
) -> Vec<callflow::error::Result<AgentEvent>> {
    let mut registry =
        AgentRegistry::new().register(agent(backend, "greeting", Some(advance_schema())));
    let runner = TurnRunner::new(registry.get("greeting").unwrap());
    runner.run(prompt.map(str::to_string), Vec::new()).collect().await
}

#[tokio::test]
async fn text_parts_become_text_deltas_in_order() {
    let backend = ScriptedBackend::new();
    backend.push(text_script(&["您好", "，请问", "是张先生吗？"]));

    let events: Vec<AgentEvent> = run_agent(&backend, None)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(kinds(&events), vec!["text_delta", "text_delta", "text_delta"]);
    assert_eq!(collect_text(&events), "您好，请问是张先生吗？");
}

#[tokio::test]
async fn tool_traffic_is_reported() {
    let backend = ScriptedBackend::new();
    let mut script = tool_script("lookup", json!({"q": "x"}), "call_1", json!("found"));
    script.extend(text_script(&["好的"]));
    backend.push(script);

    let events: Vec<AgentEvent> = run_agent(&backend, None)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(
        kinds(&events),
        vec!["tool_call_started", "tool_invoked", "tool_result", "text_delta"]
    );
    match &events[2] {
        AgentEvent::ToolResult { result } => {
            assert_eq!(result.tool_call_id, "call_1");
            assert_eq!(result.content, json!("found"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn decision_conclusion_is_surfaced_with_agent_name() {
    let backend = ScriptedBackend::new();
    backend.push(decision_script(&advance_schema(), json!({"next": "question"})));

    let events: Vec<AgentEvent> = run_agent(&backend, None)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    match events.last() {
        Some(AgentEvent::Decision { agent, decision }) => {
            assert_eq!(agent, "greeting");
            assert_eq!(decision.schema_name(), "Advance");
        }
        other => panic!("expected a decision, got {other:?}"),
    }
}

#[tokio::test]
async fn hangup_route_becomes_hangup_event() {
    let backend = ScriptedBackend::new();
    backend.push(decision_script(&hangup_schema(), json!({"decision": "DoHangUp"})));

    let events: Vec<AgentEvent> = run_agent(&backend, None)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert!(matches!(events.last(), Some(AgentEvent::Hangup { .. })));
}

#[tokio::test]
async fn request_carries_instructions_prompt_and_schema() {
    let backend = ScriptedBackend::new();
    backend.push(text_script(&["嗯"]));

    run_agent(&backend, Some("喂")).await;

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].agent, "greeting");
    assert_eq!(requests[0].instructions, "You are greeting.");
    assert_eq!(requests[0].prompt.as_deref(), Some("喂"));
    assert_eq!(
        requests[0].output_schema.as_ref().map(|s| s.output_tool_name()),
        Some("final_result_Advance".to_string())
    );
}

#[tokio::test]
async fn backend_failure_ends_the_stream_with_the_error() {
    let backend = ScriptedBackend::new();
    let partial = text_script(&["您好"])[..1].to_vec();
    backend.push_script(Script::FailAfter(partial, "socket closed".into()));

    let results = run_agent(&backend, None).await;

    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(&results[1], Err(FlowError::Backend(m)) if m == "socket closed"));
}

#[tokio::test]
async fn failure_to_open_the_stream_is_an_error() {
    let backend = ScriptedBackend::new();
    backend.push_script(Script::Fail("unreachable".into()));

    let results = run_agent(&backend, None).await;

    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
}

#[test]
fn classifier_drops_non_text_deltas_and_part_ends() {
    let mut classifier = EventClassifier::new("greeting");
    assert!(classifier
        .classify(BackendEvent::PartDelta {
            index: 0,
            delta: PartDelta::ToolCallArgs {
                args_delta: "{\"a\"".into(),
            },
        })
        .is_none());
    assert!(classifier
        .classify(BackendEvent::PartDelta {
            index: 0,
            delta: PartDelta::Thinking {
                content: "hmm".into(),
            },
        })
        .is_none());
    assert!(classifier.classify(BackendEvent::PartEnd { index: 0 }).is_none());
    assert!(classifier
        .classify(BackendEvent::RunConcluded {
            output: RunOutput::Text("done".into()),
        })
        .is_none());
}

#[test]
fn classifier_tracks_final_result_announcement() {
    let mut classifier = EventClassifier::new("greeting");
    assert!(!classifier.final_result());
    assert!(classifier
        .classify(BackendEvent::FinalResult { tool_name: None })
        .is_none());
    assert!(classifier.final_result());
}
