use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::classify::{Classification, Payload};
use crate::credential_pool::CredentialStatsView;
use crate::egress::EgressDescriptor;
use crate::error::ErrorKind;

/// Record of one upstream attempt, or the terminal record of a strategy run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelAttemptResult {
    pub success: bool,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs_f64")]
    pub elapsed: Duration,
    pub credential_index: Option<usize>,
    /// 1-based position of this attempt within the strategy run.
    pub attempt_number: u32,
    /// Attempts made so far in the run.
    pub attempts: u32,
    pub egress: Option<EgressDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_stats: Option<Vec<CredentialStatsView>>,
}

impl ModelAttemptResult {
    pub fn from_classification(
        model: &str,
        classification: Classification,
        elapsed: Duration,
        credential_index: usize,
        egress: Option<EgressDescriptor>,
    ) -> Self {
        let error_kind = classification.error_kind();
        let error_message = classification.error_message();
        let (text, structured_data) = match classification {
            Classification::Success(Payload::Text(text)) => (Some(text), None),
            Classification::Success(Payload::Structured { text, data }) => {
                (Some(text), Some(data))
            }
            Classification::ParseFailure { raw_text, .. } => (Some(raw_text), None),
            Classification::SafetyBlocked { .. } | Classification::Unknown { .. } => (None, None),
        };
        Self {
            success: error_kind.is_none(),
            model: model.to_string(),
            text,
            structured_data,
            error_kind,
            error_message,
            elapsed,
            credential_index: Some(credential_index),
            attempt_number: 1,
            attempts: 1,
            egress,
            credential_stats: None,
        }
    }

    /// An attempt that never reached the upstream.
    pub fn failed(model: &str, kind: ErrorKind, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            model: model.to_string(),
            text: None,
            structured_data: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            elapsed,
            credential_index: None,
            attempt_number: 1,
            attempts: 1,
            egress: None,
            credential_stats: None,
        }
    }

    pub fn with_attempt(mut self, attempt_number: u32) -> Self {
        self.attempt_number = attempt_number;
        self.attempts = attempt_number;
        self
    }

    pub fn with_egress(mut self, egress: Option<EgressDescriptor>) -> Self {
        self.egress = egress;
        self
    }

    /// Terminal record of a run: total elapsed time and attempt count, with
    /// the error message prefixed by `summary`.
    pub fn exhausted(mut self, summary: &str, attempts: u32, elapsed: Duration) -> Self {
        self.attempts = attempts;
        self.elapsed = elapsed;
        let detail = self.error_message.take().unwrap_or_else(|| "unknown error".to_string());
        self.error_message = Some(format!("{summary}: {detail}"));
        self
    }

    /// Terminal record of a run that ended on this attempt.
    pub fn finished(mut self, attempts: u32, elapsed: Duration) -> Self {
        self.attempts = attempts;
        self.elapsed = elapsed;
        self
    }

    pub fn with_credential_stats(mut self, stats: Vec<CredentialStatsView>) -> Self {
        self.credential_stats = Some(stats);
        self
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }
}

fn as_secs_f64<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}
