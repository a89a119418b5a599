//! Auto-finance outbound call flow.
//!
//! The agent confirms the customer's identity, checks whether they need
//! financing and own a paid-off vehicle with its registration book at hand,
//! then collects a WeChat account and walks them through accepting a
//! business WeChat request. Every "no" exits to the `hangup` agent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strum::IntoStaticStr;

use crate::agent::{AgentDefinition, AgentRegistry, AgentSession, Orchestrator};
use crate::backend::GenerationBackend;
use crate::config::FlowConfig;
use crate::error::Result;
use crate::tools::{phone_check_tool, FnTool, Tool, ToolParameters};
use crate::types::{
    fields_of, Decision, DecisionSchema, Route, RoutingTarget, TypedSchema, HANGUP_AGENT,
};

pub const ENTRY_AGENT: &str = "customer_name_inquiry";

pub const ENDING_MESSAGE: &str = "好的，我们稍后会加您的微信，请你注意在服务通知后查看我们的企业微信请求，再见！";

pub const ADD_WECHAT_TOOL: &str = "add_wechat_account";

const INSTRUCTION: &str = r#"
## SYSTEM ROLE & OBJECTIVE
You are a customer service representative for an auto finance company (易鑫集团). You conduct telephone conversations to collect customer information according to predefined schemas. You speak in Chinese and focus on efficiently gathering required data.

## CORE PRINCIPLES

### Conversation Flow
- Do NOT add greetings, explanations, or closing statements; you are part of a multi-agent system
- Only generate structured output after collecting all required schema fields
- Create schema output as soon as possible to move the conversation forward

### Information Collection
- Output minimal text per response
- In each step you may collect the step's information and briefly handle customer questions
- Only ask for information defined in the current step's schema

### Re-ask Policy
- If the customer does NOT answer the current step question, re-ask it with different wording
- Re-asks must be brief and must not introduce new questions

### Yes/No Question Policy
- If a response is NOT an explicit rejection, assume agreement and create the schema immediately
- Ambiguous responses like "嗯", "呃", "哪里", "你说" count as confirmation

## RESPONSE STYLE
Colloquial, action-oriented, concise. Answer customer questions first, then return to the step objective.
"#;

/// Per-call facts plugged into the step instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarLoanCall {
    pub customer_name: String,
    /// Number the call is placed to.
    pub caller_phone: String,
}

impl CarLoanCall {
    pub fn new(customer_name: impl Into<String>, caller_phone: impl Into<String>) -> Self {
        Self {
            customer_name: customer_name.into(),
            caller_phone: caller_phone.into(),
        }
    }

    fn phone_tail(&self) -> &str {
        let len = self.caller_phone.len();
        self.caller_phone.get(len.saturating_sub(4)..).unwrap_or(&self.caller_phone)
    }
}

fn name_confirmed_by_default() -> Option<bool> {
    Some(true)
}

/// Every structured result of the flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "schema")]
pub enum CarLoanDecision {
    CustomerName {
        #[serde(default)]
        customer_name: Option<String>,
        /// Only an explicit denial counts as unconfirmed.
        #[serde(default = "name_confirmed_by_default")]
        name_checked: Option<bool>,
    },
    FinancialSupportStatus {
        require_financial_support: bool,
    },
    PaymentMethod {
        is_not_under_repayment: bool,
    },
    VehicleLiscenceUnderControl {
        green_book_available: bool,
    },
    WeChatAccount {
        wechat_account: String,
    },
    WeChatRequestReceived {
        received: bool,
    },
    WeChatAccpeted {
        accepted: bool,
    },
}

impl CarLoanDecision {
    /// Agent id this decision routes to.
    pub fn next(&self) -> &'static str {
        let (proceed, target) = match self {
            Self::CustomerName { name_checked, .. } => {
                (name_checked.unwrap_or(true), "financial_support_inquiry")
            }
            Self::FinancialSupportStatus {
                require_financial_support,
            } => (*require_financial_support, "vehicle_payment_status"),
            Self::PaymentMethod {
                is_not_under_repayment,
            } => (*is_not_under_repayment, "vehicle_liscence_under_control"),
            Self::VehicleLiscenceUnderControl {
                green_book_available,
            } => (*green_book_available, "wechat_account_confirm"),
            Self::WeChatAccount { .. } => (true, "wechat_add_request"),
            Self::WeChatRequestReceived { received } => (*received, "wechat_guide"),
            Self::WeChatAccpeted { .. } => (false, HANGUP_AGENT),
        };
        if proceed {
            target
        } else {
            HANGUP_AGENT
        }
    }
}

impl Decision for CarLoanDecision {
    fn schema_name(&self) -> &str {
        let name: &'static str = self.into();
        name
    }

    fn route(&self) -> Route {
        Route::Transfer(RoutingTarget::agent(self.next()))
    }

    fn fields(&self) -> Map<String, Value> {
        fields_of(self)
    }
}

fn schema(name: &str, description: &str, parameters: ToolParameters) -> Arc<dyn DecisionSchema> {
    TypedSchema::<CarLoanDecision>::variant(name, description, parameters).shared()
}

fn customer_name_schema() -> Arc<dyn DecisionSchema> {
    let params = ToolParameters::from_schema(json!({
        "type": "object",
        "properties": {
            "customer_name": {
                "type": ["string", "null"],
                "description": "The name of the customer",
            },
            "name_checked": {
                "type": ["boolean", "null"],
                "description": "Whether the customer name is confirmed (not explicitly rejected)",
            },
        },
        "required": [],
    }));
    schema(
        "CustomerName",
        "Greet the customer by name. Unless told the name is wrong or the number was misdialed, assume the name is confirmed. \
         '不是/打错了/我不是' or a voicemail greeting means name_checked=false.",
        params,
    )
}

fn boolean_schema(
    name: &str,
    field: &str,
    field_description: &str,
    description: &str,
) -> Arc<dyn DecisionSchema> {
    let params = ToolParameters::object().boolean(field, field_description, true).build();
    schema(name, description, params)
}

/// `add_wechat_account`: sends a business WeChat request to the account.
pub fn add_wechat_account_tool() -> FnTool {
    let params = ToolParameters::object()
        .string(
            "account",
            "11-digit phone number confirmed by the customer",
            true,
        )
        .build();
    FnTool::from_fn(
        ADD_WECHAT_TOOL,
        "Add customer wechat account, account should be a 11 digits phone number string, \
         confirmed by customer as well.",
        params,
        |args, _ctx| {
            let account = args.get_str("account")?;
            Ok(Value::String(format!(
                "Sent a wechat add request to customer [Success]. \
                 [not guaranteed to be accepted by customer], wechat account: {account}."
            )))
        },
    )
}

/// Agent definitions for one call. Tools are stateful, so build per call.
pub fn agents(backend: Arc<dyn GenerationBackend>, call: &CarLoanCall) -> Vec<AgentDefinition> {
    vec![
        step_agent(
            &backend,
            "customer_name_inquiry",
            customer_name_schema(),
            format!(
                "Confirm the customer's name with a greeting that includes it. Current Customer Name: {}. \
                 Any response counts as confirmation unless the customer explicitly says they are not the person or the number was dialed wrong. \
                 Even a simple '嗯', '呃', '哪里', '你说' is a confirmation; create the schema immediately.",
                call.customer_name
            ),
            &["您好，请问是xxx(plug customer name here)吗？"],
            Vec::new(),
        ),
        step_agent(
            &backend,
            "financial_support_inquiry",
            boolean_schema(
                "FinancialSupportStatus",
                "require_financial_support",
                "Whether the customer need financial support",
                "Whether the customer needs financial support. Asking about product details or showing interest means true; only a confirmed refusal means false.",
            ),
            "Briefly introduce yourself (您好，这边是易鑫集团的金融顾问) and ask whether the customer needs financial support. \
             '是', '嗯', '有', '有的' or anything short of an explicit refusal means require_financial_support=true. \
             On refusal ask once more; if the refusal is confirmed, require_financial_support=false."
                .to_string(),
            &["您好，这边是易鑫集团的金融顾问，看到你的申请的资金方案，您最近是有资金需求吗？"],
            Vec::new(),
        ),
        step_agent(
            &backend,
            "vehicle_payment_status",
            boolean_schema(
                "PaymentMethod",
                "is_not_under_repayment",
                "Whether the vehicle is not under repayment",
                "Whether the vehicle is fully paid off (true) or still has ongoing installments (false).",
            ),
            "Ask whether the vehicle was bought outright or on finance (您的车是全款买的还是按揭买的？). \
             Fully paid (全款) means is_not_under_repayment=true. If bought on a loan, ask '那您的分期现在还完了么'. \
             '还清了' means true; '还没有/还在贷款/还有几期' means false."
                .to_string(),
            &["您名下的车目前是已经还清贷款了吗？"],
            Vec::new(),
        ),
        step_agent(
            &backend,
            "vehicle_liscence_under_control",
            boolean_schema(
                "VehicleLiscenceUnderControl",
                "green_book_available",
                "Whether the vehicle liscence is under the customer's control",
                "Whether the vehicle registration book (绿本, 机动车行驶证) is held by the customer or their family (true) or by a company (false).",
            ),
            "Ask whether the vehicle registration book (绿本, 大本) is in the customer's hands. \
             '在手里', '在家里', '嗯' or held by a spouse or family member means green_book_available=true; held by a company means false."
                .to_string(),
            &["那这个绿本现在是在您本人手上吗？"],
            Vec::new(),
        ),
        step_agent(
            &backend,
            "wechat_account_confirm",
            schema(
                "WeChatAccount",
                "Wechat Account confirmed by user, only accept phone number based wechat account. 11 digits number string",
                ToolParameters::object()
                    .string(
                        "wechat_account",
                        "The WeChat account provided by the customer, should be 11 digits phone number based wechat account",
                        true,
                    )
                    .build(),
            ),
            format!(
                "Ask whether the phone you are calling can be used to add the customer on WeChat (方便用您尾号{}的手机号加您的微信么？). \
                 If yes, create WeChatAccount with the current talking phone. Otherwise persuade the customer to dictate a phone number linked to WeChat, \
                 calling `check_wechat_account_validity` with every new part and answering with very short prompts like '您继续', '嗯嗯'. \
                 Current Talking Phone Number: {}",
                call.phone_tail(),
                call.caller_phone
            ),
            &[
                "Customer: 150 Assistant: 您继续 Customer: 0123 Assistant: 嗯嗯 Customer: 0245 -> check with `check_wechat_account_validity` -> Assistant: 好的，确认一下是，15001230245吗？",
                "Customer: 不方便，加微信干嘛？ Assistant: 加微信是后续办理业务方便，咱们在微信上提供一些资料，最快当天就能放款，您请放心",
            ],
            vec![Arc::new(phone_check_tool(5)) as Arc<dyn Tool>],
        ),
        step_agent(
            &backend,
            "wechat_add_request",
            boolean_schema(
                "WeChatRequestReceived",
                "received",
                "Whether the customer receive the wechat add request",
                "The customer received the wechat add request. '看到了', '收到了' or any positive response means received=true.",
            ),
            "Tell the customer you are sending a WeChat request (您先别挂，我现在加您一下，稍等哈。), \
             then call `add_wechat_account` with the confirmed account. If they cannot find it, suggest refreshing (可能是网络有延迟，您下拉刷新看下有没新的消息) \
             and resend. If it never arrives, received=false."
                .to_string(),
            &[
                "Customer: 好的 Assistant: call add_wechat_account(...), then '我加您了，是企业微信加的。麻烦您在微信消息列表找一下‘服务通知’，您看下有没有收到？'",
                "Customer: 没收到 Assistant: 可能是网络有延迟，您下拉刷新看下有没新的消息",
            ],
            vec![Arc::new(add_wechat_account_tool()) as Arc<dyn Tool>],
        ),
        step_agent(
            &backend,
            "wechat_guide",
            boolean_schema(
                "WeChatAccpeted",
                "accepted",
                "Whether the customer accepted the wechat add request",
                "The customer accepted the wechat add request. '接受了', '同意了' or any positive response means accepted=true.",
            ),
            "Guide the customer through accepting the request, one step at a time: \
             A) in 服务通知 open '企业微信加好友'; B) long-press the QR code; C) choose '打开对方企业微信名片'; D) tap '添加到通讯录'. \
             Only give the immediate next step. If the customer complains, gently encourage them to finish."
                .to_string(),
            &[
                "User: '看到二维码了' -> Agent: '好，长按这个二维码别松手。'",
                "User: '太麻烦了' -> Agent: '马上就完成了呢，你稍微操作几个步骤就好了，很快的。'",
            ],
            Vec::new(),
        ),
        AgentDefinition::hangup(Arc::clone(&backend)),
    ]
}

fn step_agent(
    backend: &Arc<dyn GenerationBackend>,
    name: &str,
    decision: Arc<dyn DecisionSchema>,
    step_instruction: String,
    examples: &[&str],
    tools: Vec<Arc<dyn Tool>>,
) -> AgentDefinition {
    AgentDefinition::builder()
        .name(name)
        .backend(Arc::clone(backend))
        .instruction(INSTRUCTION)
        .step_instruction(step_instruction)
        .examples(examples.iter().map(|e| e.to_string()).collect())
        .decision(decision)
        .tools(tools)
        .build()
}

/// Orchestration settings for this flow.
pub fn flow_config() -> FlowConfig {
    FlowConfig::default().with_ending_message(ENDING_MESSAGE)
}

/// A ready-to-use session for one outbound call.
pub fn session(backend: Arc<dyn GenerationBackend>, call: &CarLoanCall) -> Result<AgentSession> {
    let registry: AgentRegistry = agents(backend, call).into_iter().collect();
    let orchestrator = Orchestrator::new(registry, ENTRY_AGENT, flow_config())?;
    Ok(AgentSession::new(orchestrator))
}
