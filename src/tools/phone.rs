//! Spoken phone-number integrity check.
//!
//! Callers dictate WeChat accounts (almost always mobile numbers) a few
//! digits at a time. The checker normalizes what has been collected so far and
//! tells the agent whether to keep listening, confirm, or give up.

use std::sync::{LazyLock, Mutex};

use regex::Regex;
use serde_json::Value;

use super::tool::FnTool;
use super::types::ToolParameters;

/// Name the tool is exposed under.
pub const PHONE_CHECK_TOOL: &str = "check_wechat_account_validity";

const DEFAULT_MAX_CALL_COUNT: usize = 5;
const PHONE_NUMBER_LEN: usize = 11;

const TOOL_DESCRIPTION: &str = "Check the integrity of the provided wechat account (can be a phone number). \
Call this tool each time the customer tells a full or partial wechat account. \
Pass every digit collected so far, without punctuation or spaces, with spoken numbers converted to digits \
(1 for \"一\", 2 for \"二\", 3 for \"三\" ...).";

const INVALID_INPUT_RESPONSE: &str = "The provided phone number contains non-numeric characters.
Inform the user that they must provide a phone number using digits only to add WeChat.
Example:
    您的微信号手机号么？ 我这边只能加手机号呢。
";

const INCOMPLETE_RESPONSE: &str = "The customer has not finished stating their phone number.
Prompt them briefly to finish providing their phone number. **You should continue listen until full number.**
Example:
嗯嗯
嗯，您继续
";

const TRANSFER_TO_HUMAN_RESPONSE: &str = "The system detected multiple invalid phone number inputs.
Inform the user that adding WeChat is currently not possible and a human agent will follow up later.
Example:
    抱歉，我这边现在加不上您微信呢，稍后我们专员会联系您，添加个联系方式哈。
";

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhoneCheck {
    /// Too many attempts in this call.
    TransferToHuman,
    InvalidInput,
    Incomplete,
    Complete(String),
    TooLong(String),
}

impl PhoneCheck {
    /// Instruction text handed back to the agent.
    pub fn guidance(&self) -> String {
        match self {
            Self::TransferToHuman => TRANSFER_TO_HUMAN_RESPONSE.to_string(),
            Self::InvalidInput => INVALID_INPUT_RESPONSE.to_string(),
            Self::Incomplete => INCOMPLETE_RESPONSE.to_string(),
            Self::Complete(number) => format!(
                "The user provided an 11-digit phone number: {number}.\n\
                 Confirm with the user whether this number is correct. **Confirm the final number with user.**\n\
                 Example:\n    嗯，确认一下是 {number}对么？\n"
            ),
            Self::TooLong(number) => format!(
                "The provided Phone number is longer than 11 digits.\n\
                 Confirm with the user to provide a valid 11-digit phone number.\n\
                 Example:\n    {number} 这个是手机号么？ 好像多了几位呢，您再确认一下哈？\n"
            ),
        }
    }
}

#[derive(Debug, Default)]
struct CheckerState {
    call_count: usize,
    current: String,
}

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\s\-()（）,，、.。+]").expect("separator regex must compile")
});

/// Per-call checker. One instance must not be shared across phone calls.
#[derive(Debug)]
pub struct PhoneNumberChecker {
    max_call_count: usize,
    state: Mutex<CheckerState>,
}

impl Default for PhoneNumberChecker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CALL_COUNT)
    }
}

impl PhoneNumberChecker {
    pub fn new(max_call_count: usize) -> Self {
        Self {
            max_call_count,
            state: Mutex::new(CheckerState::default()),
        }
    }

    /// Map spoken digits to ASCII and drop whitespace and separators.
    pub fn normalize(raw: &str) -> String {
        let mapped: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '零' => '0',
                '一' | '幺' => '1',
                '二' => '2',
                '三' => '3',
                '四' => '4',
                '五' => '5',
                '六' => '6',
                '七' => '7',
                '八' => '8',
                '九' => '9',
                other => other,
            })
            .collect();
        SEPARATORS.replace_all(&mapped, "").into_owned()
    }

    /// Check the digits collected so far. Every call counts toward the limit.
    pub fn check(&self, raw: &str) -> PhoneCheck {
        let number = Self::normalize(raw);
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.call_count += 1;
        state.current = number.clone();

        if state.call_count > self.max_call_count {
            return PhoneCheck::TransferToHuman;
        }
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            return PhoneCheck::InvalidInput;
        }
        match number.chars().count() {
            n if n < PHONE_NUMBER_LEN => PhoneCheck::Incomplete,
            PHONE_NUMBER_LEN => PhoneCheck::Complete(number),
            _ => PhoneCheck::TooLong(number),
        }
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).call_count
    }

    /// The last normalized input.
    pub fn current(&self) -> String {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).current.clone()
    }
}

/// Build the `check_wechat_account_validity` tool around a fresh checker.
pub fn phone_check_tool(max_call_count: usize) -> FnTool {
    let checker = PhoneNumberChecker::new(max_call_count);
    let params = ToolParameters::object()
        .string(
            "account_name",
            "Full wechat account collected so far, digits only",
            true,
        )
        .build();

    FnTool::from_fn(PHONE_CHECK_TOOL, TOOL_DESCRIPTION, params, move |args, _ctx| {
        let account = args.get_str("account_name")?;
        Ok(Value::String(checker.check(account).guidance()))
    })
}
