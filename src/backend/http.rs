//! HTTP client, SSE parsing, and auth utilities.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::{FlowError, Result};

/// Build a client with the given overall request timeout.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .pool_max_idle_per_host(10)
        .build()?)
}

/// Build default headers for a Bearer-token API.
pub fn bearer_headers(api_key: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(key) = api_key {
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {key}")) {
            headers.insert(AUTHORIZATION, val);
        }
    }
    headers
}

/// Parse an SSE "data:" line, returning None for "[DONE]" and non-data lines.
pub fn parse_sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Split a byte stream into lines without breaking multi-byte characters.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every complete, non-empty, non-comment line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            lines.push(line);
        }
        lines
    }

    /// Whatever remains after the stream closed without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer))
            .trim()
            .to_string();
        (!rest.is_empty() && !rest.starts_with(':')).then_some(rest)
    }
}

/// Map a non-success HTTP status to an error.
pub fn status_to_error(status: u16, body: &str) -> FlowError {
    match status {
        401 | 403 => FlowError::Authentication(body.to_string()),
        429 => FlowError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => FlowError::api(status, body),
    }
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_lines_are_extracted() {
        assert_eq!(parse_sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(parse_sse_data("data:{}"), Some("{}"));
        assert_eq!(parse_sse_data("data: [DONE]"), None);
        assert_eq!(parse_sse_data("event: ping"), None);
    }

    #[test]
    fn split_multibyte_characters_survive_chunking() {
        let bytes = "data: 您好\n".as_bytes();
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(&bytes[..8]).is_empty());
        assert_eq!(buffer.push(&bytes[8..]), vec!["data: 您好".to_string()]);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let mut buffer = SseLineBuffer::new();
        let lines = buffer.push(b": keep-alive\n\ndata: x\n");
        assert_eq!(lines, vec!["data: x".to_string()]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn rate_limit_body_carries_retry_hint() {
        let err = status_to_error(429, r#"{"error":{"retry_after":1.5}}"#);
        assert!(matches!(err, FlowError::RateLimited { retry_after_ms: Some(1500) }));
    }

    #[test]
    fn auth_statuses_map_to_authentication() {
        assert!(matches!(status_to_error(401, "bad key"), FlowError::Authentication(_)));
        assert!(matches!(status_to_error(500, "boom"), FlowError::Api { status: 500, .. }));
    }
}
