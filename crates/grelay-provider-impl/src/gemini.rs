use std::time::Instant;

use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use grelay_protocol::gemini::generate_content::{GenerateContentRequest, GenerateContentResponse};
use grelay_provider_core::{CallError, ModelCaller, UpstreamCall};

use crate::client::shared_client;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OP: &str = "gemini.generate";

/// `generateContent` over HTTP. Performs exactly one request per call.
#[derive(Debug, Clone)]
pub struct GeminiCaller {
    base_url: String,
}

impl Default for GeminiCaller {
    fn default() -> Self {
        Self::new(None)
    }
}

impl GeminiCaller {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

#[async_trait]
impl ModelCaller for GeminiCaller {
    async fn call(&self, call: UpstreamCall<'_>) -> Result<GenerateContentResponse, CallError> {
        let model = call.model.trim_start_matches("models/");
        let path = format!("/v1beta/models/{model}:generateContent");
        let url = build_url(&self.base_url, &path);
        let proxy = call.egress.and_then(|egress| egress.proxy_url());
        let client = shared_client(proxy.as_deref())
            .map_err(|err| CallError::new(format!("connection setup failed: {err}")))?;
        let headers = build_gemini_headers(call.credential.secret())?;
        let body = GenerateContentRequest::from_prompt(
            call.prompt,
            call.system_instruction,
            call.config,
        );
        let egress = call
            .egress
            .map(ToString::to_string)
            .unwrap_or_else(|| "direct".to_string());

        let started_at = Instant::now();
        info!(
            event = "upstream_request",
            op = OP,
            method = "POST",
            path = %path,
            model = %model,
            credential = %call.credential.masked(),
            egress = %egress
        );
        let response = client
            .post(url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                warn!(
                    event = "upstream_response",
                    op = OP,
                    status = "error",
                    elapsed_ms = started_at.elapsed().as_millis(),
                    error = %err
                );
                CallError::new(format!("connection error: {err}"))
            })?;
        let status = response.status();
        info!(
            event = "upstream_response",
            op = OP,
            status = %status.as_u16(),
            elapsed_ms = started_at.elapsed().as_millis()
        );
        let bytes = response
            .bytes()
            .await
            .map_err(|err| CallError::new(format!("connection error reading body: {err}")))?;
        if !status.is_success() {
            return Err(status_error(status, &bytes));
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| CallError::new(format!("invalid upstream response body: {err}")))
    }
}

fn build_gemini_headers(api_key: &str) -> Result<HeaderMap, CallError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-goog-api-key",
        HeaderValue::from_str(api_key)
            .map_err(|err| CallError::new(format!("API key not valid as a header: {err}")))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

fn build_url(base: &str, path: &str) -> String {
    let mut path = path.trim_start_matches('/');
    if base.ends_with("/v1beta") && (path == "v1beta" || path.starts_with("v1beta/")) {
        path = path.trim_start_matches("v1beta/").trim_start_matches("v1beta");
    }
    format!("{base}/{path}")
}

/// Keeps the upstream `error.status` and `error.message` so the classifier
/// sees markers such as `RESOURCE_EXHAUSTED` or `API key not valid`.
fn status_error(status: StatusCode, body: &[u8]) -> CallError {
    let detail = serde_json::from_slice::<JsonValue>(body)
        .ok()
        .and_then(|value| {
            let error = value.get("error")?;
            let message = error.get("message").and_then(JsonValue::as_str);
            let code = error.get("status").and_then(JsonValue::as_str);
            match (code, message) {
                (Some(code), Some(message)) => Some(format!("{code}: {message}")),
                (None, Some(message)) => Some(message.to_string()),
                (Some(code), None) => Some(code.to_string()),
                (None, None) => None,
            }
        })
        .unwrap_or_else(|| {
            let text = String::from_utf8_lossy(body);
            let text = text.trim();
            if text.is_empty() {
                status.canonical_reason().unwrap_or("error").to_string()
            } else {
                text.chars().take(512).collect()
            }
        });
    CallError::with_status(status.as_u16(), detail)
}
