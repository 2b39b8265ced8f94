use grelay_protocol::gemini::generate_content::{is_json_mime, GenerateContentResponse};
use serde_json::Value as JsonValue;

use crate::error::{CallError, ErrorKind};

/// Usable output of a successful call.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Structured { text: String, data: JsonValue },
}

impl Payload {
    pub fn text(&self) -> &str {
        match self {
            Payload::Text(text) | Payload::Structured { text, .. } => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Success(Payload),
    SafetyBlocked { reason: String },
    ParseFailure { raw_text: String, error: String },
    /// Failed call; `kind` is fixed when the error is classified.
    Unknown { kind: ErrorKind, error: String },
}

impl Classification {
    pub fn is_success(&self) -> bool {
        matches!(self, Classification::Success(_))
    }

    /// `None` on success.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Classification::Success(_) => None,
            Classification::SafetyBlocked { .. } => Some(ErrorKind::SafetyBlocked),
            Classification::ParseFailure { .. } => Some(ErrorKind::ParseFailure),
            Classification::Unknown { kind, .. } => Some(*kind),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            Classification::Success(_) => None,
            Classification::SafetyBlocked { reason } => {
                Some(format!("response blocked by safety filter: {reason}"))
            }
            Classification::ParseFailure { error, .. } => {
                Some(format!("structured output is not valid JSON: {error}"))
            }
            Classification::Unknown { error, .. } => Some(error.clone()),
        }
    }
}

/// Classifies a received response. A policy finish reason wins over any text
/// present; an empty or missing text is treated as a block.
pub fn classify(response: &GenerateContentResponse, response_mime_type: &str) -> Classification {
    if let Some(reason) = response
        .first_finish_reason()
        .filter(|reason| reason.is_policy_stop())
    {
        return Classification::SafetyBlocked {
            reason: reason.as_str().to_string(),
        };
    }

    let text = match response.text() {
        Ok(text) if !text.trim().is_empty() => text,
        _ => {
            let reason = response
                .block_reason()
                .map(|reason| reason.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Classification::SafetyBlocked { reason };
        }
    };

    if !is_json_mime(response_mime_type) {
        return Classification::Success(Payload::Text(text));
    }
    match serde_json::from_str::<JsonValue>(&text) {
        Ok(data) => Classification::Success(Payload::Structured { text, data }),
        Err(err) => Classification::ParseFailure {
            raw_text: text,
            error: err.to_string(),
        },
    }
}

pub fn classify_call(
    outcome: Result<&GenerateContentResponse, &CallError>,
    response_mime_type: &str,
) -> Classification {
    match outcome {
        Ok(response) => classify(response, response_mime_type),
        Err(err) => Classification::Unknown {
            kind: err.kind(),
            error: err.to_string(),
        },
    }
}

/// Kind of a failure that carried an HTTP status. Only the status itself
/// and Google's named error states count; digits or words elsewhere in the
/// message (request ids, project names) are ignored.
pub fn kind_from_status(status: u16, message: &str) -> ErrorKind {
    match status {
        429 => ErrorKind::RateLimited,
        401 | 403 => ErrorKind::AuthPermission,
        408 | 502 | 503 | 504 => ErrorKind::Connection,
        _ => {
            let markers = Markers::new(message);
            if markers.token("resource_exhausted") {
                ErrorKind::RateLimited
            } else if markers.any_token(&["api_key_invalid", "permission_denied", "unauthenticated"])
                || markers.phrase("api key not valid")
            {
                ErrorKind::AuthPermission
            } else if markers.any_token(&["unavailable", "deadline_exceeded"]) {
                ErrorKind::Connection
            } else {
                ErrorKind::Unknown
            }
        }
    }
}

/// Kind of a status-less failure (transport errors, proxy failures) by
/// case-insensitive whole-token markers.
pub fn kind_from_message(message: &str) -> ErrorKind {
    let markers = Markers::new(message);
    if markers.any_token(&["429", "resource_exhausted", "quota"])
        || markers.any_phrase(&["rate limit", "resource exhausted", "too many requests"])
    {
        ErrorKind::RateLimited
    } else if markers.any_token(&[
        "401",
        "403",
        "api_key_invalid",
        "permission_denied",
        "unauthenticated",
        "unauthorized",
        "authentication",
    ]) || markers.any_phrase(&["api key not valid", "permission denied"])
    {
        ErrorKind::AuthPermission
    } else if markers.any_token(&[
        "proxy",
        "connection",
        "connect",
        "timeout",
        "502",
        "503",
        "504",
    ]) || markers.phrase("timed out")
    {
        ErrorKind::Connection
    } else {
        ErrorKind::Unknown
    }
}

struct Markers {
    lowered: String,
    tokens: Vec<String>,
}

impl Markers {
    fn new(message: &str) -> Self {
        let lowered = message.to_lowercase();
        let tokens = lowered
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|token| !token.is_empty())
            .map(String::from)
            .collect();
        Self { lowered, tokens }
    }

    fn token(&self, marker: &str) -> bool {
        self.tokens.iter().any(|token| token == marker)
    }

    fn any_token(&self, markers: &[&str]) -> bool {
        markers.iter().any(|marker| self.token(marker))
    }

    fn phrase(&self, marker: &str) -> bool {
        self.lowered.contains(marker)
    }

    fn any_phrase(&self, markers: &[&str]) -> bool {
        markers.iter().any(|marker| self.phrase(marker))
    }
}

#[cfg(test)]
mod tests {
    use grelay_protocol::gemini::generate_content::{
        BlockReason, Candidate, Content, FinishReason, Part, PromptFeedback, APPLICATION_JSON,
        TEXT_PLAIN,
    };

    use super::*;

    fn finished_with(reason: FinishReason, text: &str) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: None,
                    parts: vec![Part::text(text)],
                }),
                finish_reason: Some(reason),
                ..Candidate::default()
            }],
            ..GenerateContentResponse::default()
        }
    }

    #[test]
    fn policy_finish_reason_blocks_even_with_text() {
        let response = finished_with(FinishReason::Safety, "partial answer");
        assert_eq!(
            classify(&response, TEXT_PLAIN),
            Classification::SafetyBlocked {
                reason: "SAFETY".to_string()
            }
        );
    }

    #[test]
    fn missing_text_uses_prompt_block_reason() {
        let response = GenerateContentResponse {
            prompt_feedback: Some(PromptFeedback {
                block_reason: Some(BlockReason::Safety),
                safety_ratings: Vec::new(),
            }),
            ..GenerateContentResponse::default()
        };
        let classification = classify(&response, TEXT_PLAIN);
        assert_eq!(classification.error_kind(), Some(ErrorKind::SafetyBlocked));
        assert_eq!(
            classify(&GenerateContentResponse::default(), TEXT_PLAIN),
            Classification::SafetyBlocked {
                reason: "unknown".to_string()
            }
        );
    }

    #[test]
    fn json_mime_parses_or_reports_parse_failure() {
        let ok = GenerateContentResponse::text_response(r#"{"a": 1}"#);
        match classify(&ok, APPLICATION_JSON) {
            Classification::Success(Payload::Structured { data, .. }) => {
                assert_eq!(data, serde_json::json!({"a": 1}));
            }
            other => panic!("unexpected classification: {other:?}"),
        }

        let broken = GenerateContentResponse::text_response("not json");
        let classification = classify(&broken, APPLICATION_JSON);
        assert_eq!(classification.error_kind(), Some(ErrorKind::ParseFailure));
        assert!(matches!(
            classification,
            Classification::ParseFailure { ref raw_text, .. } if raw_text == "not json"
        ));
    }

    #[test]
    fn plain_text_is_not_parsed() {
        let response = GenerateContentResponse::text_response("not json");
        assert_eq!(
            classify(&response, TEXT_PLAIN),
            Classification::Success(Payload::Text("not json".to_string()))
        );
    }

    #[test]
    fn call_errors_map_by_marker() {
        let cases = [
            (CallError::with_status(429, "Resource has been exhausted"), ErrorKind::RateLimited),
            (CallError::new("API key not valid. Please pass a valid API key."), ErrorKind::AuthPermission),
            (CallError::with_status(403, "forbidden"), ErrorKind::AuthPermission),
            (CallError::new("proxy handshake failed"), ErrorKind::Connection),
            (CallError::with_status(503, "overloaded"), ErrorKind::Connection),
            (CallError::new("something odd"), ErrorKind::Unknown),
            (
                CallError::with_status(400, "INVALID_ARGUMENT: API key not valid."),
                ErrorKind::AuthPermission,
            ),
        ];
        for (err, expected) in cases {
            let classification = classify_call(Err(&err), TEXT_PLAIN);
            assert_eq!(classification.error_kind(), Some(expected), "{err}");
        }
    }

    #[test]
    fn status_wins_over_digits_in_the_message() {
        let err = CallError::with_status(500, "INTERNAL: Internal error encountered. request 7f4290ab 429");
        assert_eq!(err.kind(), ErrorKind::Unknown);
        let err = CallError::with_status(500, "INTERNAL: quota-project billing lookup failed (403)");
        assert_eq!(err.kind(), ErrorKind::Unknown);
        let err = CallError::with_status(400, "RESOURCE_EXHAUSTED: Quota exceeded");
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }

    #[test]
    fn markers_match_whole_tokens_only() {
        assert_eq!(kind_from_message("peer disconnected unexpectedly"), ErrorKind::Unknown);
        assert_eq!(kind_from_message("id 4291 not found"), ErrorKind::Unknown);
        assert_eq!(kind_from_message("connect: connection refused"), ErrorKind::Connection);
        assert_eq!(kind_from_message("HTTP 429 Too Many Requests"), ErrorKind::RateLimited);
    }

    #[test]
    fn abandoned_call_is_unknown_not_connection() {
        let err = CallError::timeout(std::time::Duration::from_secs(5));
        assert!(err.is_timeout());
        let classification = classify_call(Err(&err), TEXT_PLAIN);
        assert_eq!(classification.error_kind(), Some(ErrorKind::Unknown));
    }
}
