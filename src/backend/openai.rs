//! OpenAI-compatible Chat Completions backend.
//!
//! Streams `/chat/completions` with `stream: true`, turns SSE chunks into
//! [`BackendEvent`]s, executes agent tools locally and loops until the model
//! settles on free text or calls the decision output tool.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::{FlowError, Result};
use crate::tools::{validate_arguments, Tool, ToolArguments, ToolContext};
use crate::types::*;
use crate::util::RetryPolicy;

use super::http::{bearer_headers, build_client, parse_sse_data, status_to_error, SseLineBuffer};
use super::{BackendEventStream, GenerationBackend, GenerationRequest};

/// Streaming chat-completions backend.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    config: BackendConfig,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAiBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = build_client(config.request_timeout_secs)?;
        Ok(Self {
            config,
            client,
            retry: RetryPolicy::default(),
        })
    }

    /// Build from `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `CALLFLOW_MODEL`.
    pub fn from_env() -> Result<Self> {
        let config = BackendConfig::from_env();
        if config.api_key.is_none() {
            return Err(FlowError::Configuration(
                "OPENAI_API_KEY is not set".to_string(),
            ));
        }
        Self::new(config)
    }

    /// Replace the retry policy used when opening a stream.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn build_request_body(&self, request: &GenerationRequest, messages: &[Value]) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": true,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(max) = self.config.max_tokens {
                obj.insert("max_tokens".into(), max.into());
            }
            if let Some(temp) = self.config.temperature {
                obj.insert("temperature".into(), temp.into());
            }

            let mut tool_defs: Vec<Value> = request
                .tools
                .iter()
                .map(|t| function_def(t.name(), t.description(), &t.parameters().schema))
                .collect();
            if let Some(schema) = &request.output_schema {
                tool_defs.push(function_def(
                    &schema.output_tool_name(),
                    schema.description(),
                    &schema.parameters().schema,
                ));
            }
            if !tool_defs.is_empty() {
                obj.insert("tools".into(), tool_defs.into());
            }
        }

        body
    }

    async fn open_stream(&self, body: &Value) -> Result<reqwest::Response> {
        let url = self.config.chat_completions_url();
        self.retry
            .execute(|| async {
                let resp = self
                    .client
                    .post(&url)
                    .headers(bearer_headers(self.config.api_key.as_deref()))
                    .json(body)
                    .send()
                    .await?;

                let status = resp.status().as_u16();
                if status != 200 {
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(status_to_error(status, &body_text));
                }
                Ok(resp)
            })
            .await
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn stream(&self, request: GenerationRequest) -> Result<BackendEventStream> {
        let backend = self.clone();
        let max_rounds = self.config.max_tool_rounds;

        let stream = async_stream::try_stream! {
            let mut messages = request_messages(&request);
            let output_tool = request.output_schema.as_ref().map(|s| s.output_tool_name());

            for round in 0..=max_rounds {
                let body = backend.build_request_body(&request, &messages);
                debug!(
                    agent = %request.agent,
                    model = %backend.config.model,
                    round,
                    "chat completions stream"
                );
                let resp = backend.open_stream(&body).await?;

                let mut state = RoundState::new(output_tool.clone());
                let mut lines = SseLineBuffer::new();
                let mut bytes = resp.bytes_stream();

                while let Some(chunk) = bytes.next().await {
                    let chunk = chunk?;
                    for line in lines.push(&chunk) {
                        for event in state.apply_line(&line) {
                            yield event;
                        }
                    }
                }
                if let Some(line) = lines.finish() {
                    for event in state.apply_line(&line) {
                        yield event;
                    }
                }
                for event in state.close_parts() {
                    yield event;
                }

                let turn = state.into_turn();

                if let (Some(schema), Some(call)) = (&request.output_schema, &turn.output_call) {
                    match schema.parse(&call.args) {
                        Ok(decision) => {
                            yield BackendEvent::RunConcluded {
                                output: RunOutput::Decision(decision),
                            };
                            return;
                        }
                        Err(e) if round < max_rounds => {
                            warn!(
                                agent = %request.agent,
                                error = %e,
                                "decision arguments rejected, asking model to retry"
                            );
                            let feedback = format!(
                                "Validation error: {e}. Fix the arguments and call the tool again."
                            );
                            let rejected = std::slice::from_ref(call);
                            messages.push(assistant_message(&turn.text, rejected));
                            messages.push(tool_message(&call.tool_call_id, &feedback));
                            continue;
                        }
                        Err(e) => Err::<(), _>(e)?,
                    }
                }

                if turn.calls.is_empty() {
                    yield BackendEvent::RunConcluded { output: RunOutput::Text(turn.text) };
                    return;
                }

                messages.push(assistant_message(&turn.text, &turn.calls));
                for call in &turn.calls {
                    let invoked = ToolCallPart::new(
                        &call.tool_name,
                        decode_args(&call.args),
                        &call.tool_call_id,
                    );
                    yield BackendEvent::ToolInvoked { call: invoked.clone() };

                    let result = execute_tool(&request, &invoked).await?;
                    messages.push(tool_message(&result.tool_call_id, &result.content_text()));
                    yield BackendEvent::ToolReturned { result };
                }
            }

            Err::<(), _>(FlowError::Backend(format!(
                "agent '{}' exceeded {max_rounds} tool rounds without settling",
                request.agent
            )))?;
        };

        Ok(Box::pin(stream))
    }
}

fn function_def(name: &str, description: &str, parameters: &Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

/// Instructions, merged history, then the immediate prompt.
fn request_messages(request: &GenerationRequest) -> Vec<Value> {
    let mut messages = vec![json!({ "role": "system", "content": request.instructions })];
    for turn in &request.history {
        match turn {
            ModelTurn::Request { parts } => {
                for part in parts {
                    messages.push(match part {
                        RequestPart::SystemPrompt { content, .. } => {
                            json!({ "role": "system", "content": content })
                        }
                        RequestPart::UserPrompt { content, .. } => {
                            json!({ "role": "user", "content": content })
                        }
                        RequestPart::ToolReturn(ret) => {
                            tool_message(&ret.tool_call_id, &ret.content_text())
                        }
                    });
                }
            }
            ModelTurn::Response { parts, .. } => {
                let mut text = String::new();
                let mut calls = Vec::new();
                for part in parts {
                    match part {
                        ResponsePart::Text { content } => text.push_str(content),
                        ResponsePart::ToolCall(call) => calls.push(call.clone()),
                    }
                }
                messages.push(assistant_message(&text, &calls));
            }
        }
    }
    if let Some(prompt) = &request.prompt {
        messages.push(json!({ "role": "user", "content": prompt }));
    }
    messages
}

fn assistant_message(text: &str, calls: &[ToolCallPart]) -> Value {
    if calls.is_empty() {
        return json!({ "role": "assistant", "content": text });
    }
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|c| {
            json!({
                "id": c.tool_call_id,
                "type": "function",
                "function": { "name": c.tool_name, "arguments": c.args_json() },
            })
        })
        .collect();
    json!({
        "role": "assistant",
        "content": if text.is_empty() { Value::Null } else { Value::String(text.to_string()) },
        "tool_calls": tool_calls,
    })
}

fn tool_message(tool_call_id: &str, content: &str) -> Value {
    json!({ "role": "tool", "tool_call_id": tool_call_id, "content": content })
}

fn decode_args(args: &Value) -> Value {
    ToolArguments::new(args.clone())
        .normalized()
        .unwrap_or_else(|_| args.clone())
}

/// Run one agent tool. Model mistakes (unknown tool, bad arguments) are
/// returned to the model as text; failures inside the tool are errors.
async fn execute_tool(request: &GenerationRequest, call: &ToolCallPart) -> Result<ToolReturnPart> {
    let Some(tool) = request.find_tool(&call.tool_name) else {
        warn!(agent = %request.agent, tool = %call.tool_name, "model called an unknown tool");
        let content = format!(
            "Unknown tool '{}'. Available tools: {}",
            call.tool_name,
            request.tool_names().join(", ")
        );
        return Ok(ToolReturnPart::new(&call.tool_name, Value::String(content), &call.tool_call_id));
    };

    let args = ToolArguments::new(call.args.clone());
    if let Err(reason) = validate_arguments(args.raw(), &tool.parameters().schema) {
        let content = format!("Invalid arguments for '{}': {reason}", call.tool_name);
        return Ok(ToolReturnPart::new(&call.tool_name, Value::String(content), &call.tool_call_id));
    }

    let ctx = ToolContext {
        agent: request.agent.clone(),
        tool_call_id: call.tool_call_id.clone(),
    };
    let value = run(tool, &args, &ctx).await?;
    Ok(ToolReturnPart::new(&call.tool_name, value, &call.tool_call_id))
}

async fn run(tool: &Arc<dyn Tool>, args: &ToolArguments, ctx: &ToolContext) -> Result<Value> {
    tool.execute(args, ctx).await.map_err(|e| match e {
        FlowError::ToolExecution { .. } => e,
        other => FlowError::ToolExecution {
            tool_name: tool.name().to_string(),
            message: other.to_string(),
        },
    })
}

#[derive(Debug)]
struct PendingCall {
    part_index: usize,
    id: String,
    name: String,
    args: String,
}

/// What one streamed response settled on.
#[derive(Debug, Default)]
struct RoundOutcome {
    text: String,
    /// Agent tool calls, in stream order.
    calls: Vec<ToolCallPart>,
    output_call: Option<ToolCallPart>,
}

/// Incremental SSE chunk to event translation for one response.
#[derive(Debug)]
struct RoundState {
    output_tool: Option<String>,
    next_index: usize,
    text_index: Option<usize>,
    text: String,
    calls: BTreeMap<usize, PendingCall>,
    final_announced: bool,
    closed: bool,
}

impl RoundState {
    fn new(output_tool: Option<String>) -> Self {
        Self {
            output_tool,
            next_index: 0,
            text_index: None,
            text: String::new(),
            calls: BTreeMap::new(),
            final_announced: false,
            closed: false,
        }
    }

    fn apply_line(&mut self, line: &str) -> Vec<BackendEvent> {
        let Some(data) = parse_sse_data(line) else {
            return Vec::new();
        };
        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => self.apply(chunk),
            Err(e) => {
                debug!(error = %e, "skipping unparseable stream chunk");
                Vec::new()
            }
        }
    }

    fn apply(&mut self, chunk: StreamChunk) -> Vec<BackendEvent> {
        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.text.push_str(&content);
                match self.text_index {
                    Some(index) => events.push(BackendEvent::PartDelta {
                        index,
                        delta: PartDelta::Text { content },
                    }),
                    None => {
                        let index = self.allocate();
                        self.text_index = Some(index);
                        events.push(BackendEvent::PartStart {
                            index,
                            part: ResponsePart::Text { content },
                        });
                        if self.calls.is_empty() {
                            self.announce(None, &mut events);
                        }
                    }
                }
            }

            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let function = delta.function.unwrap_or_default();
                let args_delta = function.arguments.unwrap_or_default();
                if let Some(pending) = self.calls.get_mut(&delta.index) {
                    if !args_delta.is_empty() {
                        pending.args.push_str(&args_delta);
                        events.push(BackendEvent::PartDelta {
                            index: pending.part_index,
                            delta: PartDelta::ToolCallArgs { args_delta },
                        });
                    }
                    continue;
                }

                let name = function.name.unwrap_or_default();
                let id = delta.id.unwrap_or_else(generate_tool_call_id);
                let part_index = self.allocate();
                events.push(BackendEvent::PartStart {
                    index: part_index,
                    part: ResponsePart::ToolCall(ToolCallPart::new(
                        &name,
                        Value::String(args_delta.clone()),
                        &id,
                    )),
                });
                if self.output_tool.as_deref() == Some(name.as_str()) {
                    self.announce(Some(name.clone()), &mut events);
                }
                self.calls.insert(
                    delta.index,
                    PendingCall {
                        part_index,
                        id,
                        name,
                        args: args_delta,
                    },
                );
            }

            if choice.finish_reason.is_some() {
                events.extend(self.close_parts());
            }
        }
        events
    }

    fn allocate(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn announce(&mut self, tool_name: Option<String>, events: &mut Vec<BackendEvent>) {
        if !self.final_announced {
            self.final_announced = true;
            events.push(BackendEvent::FinalResult { tool_name });
        }
    }

    /// End markers for every open part, once.
    fn close_parts(&mut self) -> Vec<BackendEvent> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        let mut indices: Vec<usize> = self.text_index.into_iter().collect();
        indices.extend(self.calls.values().map(|c| c.part_index));
        indices.sort_unstable();
        indices.into_iter().map(|index| BackendEvent::PartEnd { index }).collect()
    }

    fn into_turn(self) -> RoundOutcome {
        let mut outcome = RoundOutcome {
            text: self.text,
            ..RoundOutcome::default()
        };
        for pending in self.calls.into_values() {
            let call = ToolCallPart::new(pending.name, Value::String(pending.args), pending.id);
            if self.output_tool.as_deref() == Some(call.tool_name.as_str()) {
                outcome.output_call.get_or_insert(call);
            } else {
                outcome.calls.push(call);
            }
        }
        outcome
    }
}

// Chat Completions stream types (internal)

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(value: Value) -> String {
        format!("data: {value}")
    }

    #[test]
    fn text_chunks_become_part_start_then_deltas() {
        let mut state = RoundState::new(None);
        let first = state.apply_line(&line(json!({"choices": [{"delta": {"content": "您好"}}]})));
        let second =
            state.apply_line(&line(json!({"choices": [{"delta": {"content": "，请问"}}]})));

        assert!(matches!(
            &first[0],
            BackendEvent::PartStart { index: 0, part: ResponsePart::Text { content } } if content == "您好"
        ));
        assert!(matches!(first[1], BackendEvent::FinalResult { tool_name: None }));
        assert!(matches!(
            &second[0],
            BackendEvent::PartDelta { index: 0, delta: PartDelta::Text { content } } if content == "，请问"
        ));
        assert_eq!(state.into_turn().text, "您好，请问");
    }

    #[test]
    fn output_tool_call_is_announced_and_split_out() {
        let mut state = RoundState::new(Some("final_result_CustomerName".into()));
        let start = state.apply_line(&line(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "call_1", "function": {"name": "final_result_CustomerName", "arguments": ""}}
        ]}}]})));
        state.apply_line(&line(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "{\"name_checked\": false}"}}
        ]}, "finish_reason": "tool_calls"}]})));

        assert!(matches!(start[0], BackendEvent::PartStart { .. }));
        assert!(matches!(
            &start[1],
            BackendEvent::FinalResult { tool_name: Some(name) } if name == "final_result_CustomerName"
        ));

        let turn = state.into_turn();
        assert!(turn.calls.is_empty());
        let call = turn.output_call.unwrap();
        assert_eq!(call.args, Value::String("{\"name_checked\": false}".into()));
    }

    #[test]
    fn parts_close_once() {
        let mut state = RoundState::new(None);
        let chunk = json!({"choices": [{"delta": {"content": "好"}, "finish_reason": "stop"}]});
        let events = state.apply_line(&line(chunk));
        assert!(matches!(events.last(), Some(BackendEvent::PartEnd { index: 0 })));
        assert!(state.close_parts().is_empty());
    }

    #[test]
    fn unparseable_chunks_are_skipped() {
        let mut state = RoundState::new(None);
        assert!(state.apply_line("data: {not json").is_empty());
        assert!(state.apply_line("data: [DONE]").is_empty());
    }
}
