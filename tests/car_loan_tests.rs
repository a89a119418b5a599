//! End-to-end tests of the auto-finance call flow with a scripted backend.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use callflow::agent::AgentDefinition;
use callflow::apps::car_loan::{self, CarLoanCall, ADD_WECHAT_TOOL, ENDING_MESSAGE, ENTRY_AGENT};
use callflow::backend::GenerationBackend;
use callflow::tools::{Tool, ToolArguments, ToolContext};
use callflow::types::*;
use common::*;

fn call() -> CarLoanCall {
    CarLoanCall::new("李老三", "15001395923")
}

fn definitions(backend: &Arc<ScriptedBackend>) -> Vec<AgentDefinition> {
    car_loan::agents(Arc::clone(backend) as Arc<dyn GenerationBackend>, &call())
}

fn schema_of(backend: &Arc<ScriptedBackend>, agent: &str) -> Arc<dyn DecisionSchema> {
    definitions(backend)
        .into_iter()
        .find(|d| d.name == agent)
        .and_then(|d| d.decision)
        .unwrap()
}

#[test]
fn every_step_and_the_closing_agent_are_registered() {
    let backend = ScriptedBackend::new();
    let names: Vec<String> = definitions(&backend).into_iter().map(|d| d.name).collect();
    assert_eq!(
        names,
        vec![
            "customer_name_inquiry",
            "financial_support_inquiry",
            "vehicle_payment_status",
            "vehicle_liscence_under_control",
            "wechat_account_confirm",
            "wechat_add_request",
            "wechat_guide",
            "hangup",
        ]
    );
}

#[test]
fn step_instructions_carry_call_facts() {
    let backend = ScriptedBackend::new();
    let defs = definitions(&backend);
    let name_step = defs.iter().find(|d| d.name == ENTRY_AGENT).unwrap();
    assert!(name_step.full_instruction().contains("Current Customer Name: 李老三"));

    let wechat_step = defs.iter().find(|d| d.name == "wechat_account_confirm").unwrap();
    let instruction = wechat_step.full_instruction();
    assert!(instruction.contains("尾号5923"));
    assert!(instruction.contains("## Example Interaction:"));
    assert_eq!(wechat_step.tools[0].name(), "check_wechat_account_validity");
}

#[tokio::test]
async fn denied_identity_hands_off_to_hangup_and_finishes() {
    let backend = ScriptedBackend::new();
    backend.push(text_script(&["您好，", "请问是李老三吗？"]));
    let denied = json!({"name_checked": false});
    backend.push(decision_script(&schema_of(&backend, ENTRY_AGENT), denied));
    backend.push(text_then_decision(
        &["不好意思打扰了，再见"],
        &hangup_schema(),
        json!({"decision": "DoHangUp"}),
    ));
    let mut session = car_loan::session(backend.clone(), &call()).unwrap();

    let greeting = session.chat("喂").await.unwrap();
    assert_eq!(greeting.output_text, "您好，请问是李老三吗？");

    let outcome = session.chat("不是，你打错了").await.unwrap();

    assert_eq!(
        outcome.handoffs,
        vec![Handoff {
            source_agent: ENTRY_AGENT.into(),
            target_agent: "hangup".into(),
        }]
    );
    assert_eq!(outcome.output_text, "不好意思打扰了，再见");
    assert!(outcome.finished);
    assert_eq!(session.agent_state().get("name_checked"), Some(&json!(false)));
}

#[tokio::test]
async fn confirmed_answers_walk_the_flow_step_by_step() {
    let backend = ScriptedBackend::new();
    let steps = [
        (
            ENTRY_AGENT,
            json!({"customer_name": "李老三", "name_checked": true}),
            "您最近是有资金需求吗？",
        ),
        (
            "financial_support_inquiry",
            json!({"require_financial_support": true}),
            "您的车是全款买的还是按揭买的？",
        ),
        (
            "vehicle_payment_status",
            json!({"is_not_under_repayment": true}),
            "那这个绿本现在是在您本人手上吗？",
        ),
        (
            "vehicle_liscence_under_control",
            json!({"green_book_available": true}),
            "方便用您尾号5923的手机号加您的微信么？",
        ),
    ];
    for (agent, args, question) in &steps {
        backend.push(decision_script(&schema_of(&backend, agent), args.clone()));
        backend.push(text_script(&[*question]));
    }
    let mut session = car_loan::session(backend.clone(), &call()).unwrap();

    for (_, _, question) in &steps {
        let outcome = session.chat("嗯").await.unwrap();
        assert_eq!(outcome.output_text, *question);
        assert_eq!(outcome.handoffs.len(), 1);
    }

    assert_eq!(session.current_agent(), "wechat_account_confirm");
    let state = session.agent_state();
    assert_eq!(state.get("customer_name"), Some(&json!("李老三")));
    assert_eq!(state.get("require_financial_support"), Some(&json!(true)));
    assert_eq!(state.get("green_book_available"), Some(&json!(true)));
    assert!(!session.is_finished());
}

#[tokio::test]
async fn confirmed_account_moves_to_the_add_request_step() {
    let backend = ScriptedBackend::new();
    backend.push(decision_script(
        &schema_of(&backend, "wechat_account_confirm"),
        json!({"wechat_account": "15001395923"}),
    ));
    backend.push(text_script(&["您先别挂，我现在加您一下，稍等哈。"]));
    let mut session = car_loan::session(backend.clone(), &call()).unwrap();
    session.set_agent("wechat_account_confirm").unwrap();

    let outcome = session.chat("可以").await.unwrap();

    assert_eq!(session.current_agent(), "wechat_add_request");
    assert_eq!(outcome.output_text, "您先别挂，我现在加您一下，稍等哈。");
    let request = &backend.requests()[1];
    assert_eq!(request.tool_names(), vec![ADD_WECHAT_TOOL]);
}

#[tokio::test]
async fn accepted_request_closes_the_call() {
    let backend = ScriptedBackend::new();
    backend.push(decision_script(&schema_of(&backend, "wechat_guide"), json!({"accepted": true})));
    backend.push(text_then_decision(
        &["好的，再见！"],
        &hangup_schema(),
        json!({"decision": "DoHangUp"}),
    ));
    let mut session = car_loan::session(backend.clone(), &call()).unwrap();
    session.set_agent("wechat_guide").unwrap();

    let outcome = session.chat("加上了").await.unwrap();

    assert!(outcome.finished);
    assert_eq!(outcome.handoffs[0].target_agent, "hangup");
}

#[tokio::test]
async fn add_wechat_tool_reports_the_request() {
    let tool = car_loan::add_wechat_account_tool();
    let result = tool
        .execute(&ToolArguments::new(json!({"account": "15001395923"})), &ToolContext::default())
        .await
        .unwrap();
    assert!(result.as_str().unwrap().contains("wechat account: 15001395923"));
}

#[test]
fn flow_config_uses_the_flow_ending_message() {
    assert_eq!(car_loan::flow_config().ending_message(), ENDING_MESSAGE);
}
