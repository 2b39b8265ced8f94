use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy shared by the pools, the classifier and the strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    RateLimited,
    SafetyBlocked,
    AuthPermission,
    ParseFailure,
    Connection,
    Unknown,
    AllCredentialsBusy,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::SafetyBlocked => "safety_blocked",
            ErrorKind::AuthPermission => "auth_permission",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::Connection => "connection",
            ErrorKind::Unknown => "unknown",
            ErrorKind::AllCredentialsBusy => "all_credentials_busy",
        }
    }

    /// Ends a walk over the model list (round-robin, fallback).
    pub fn stops_model_chain(self) -> bool {
        matches!(self, ErrorKind::SafetyBlocked | ErrorKind::ParseFailure)
    }

    /// Ends repeated attempts against one model.
    pub fn stops_retry(self) -> bool {
        matches!(
            self,
            ErrorKind::SafetyBlocked | ErrorKind::AuthPermission | ErrorKind::ParseFailure
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("at least one credential must be provided")]
    NoCredentials,
    #[error("at least one model must be configured")]
    NoModels,
    #[error("default model `{0}` is not in the configured model list")]
    UnknownDefaultModel(String),
    #[error("egress mode `{mode}` requires `{field}`")]
    MissingEgressField { mode: &'static str, field: &'static str },
    #[error("invalid egress descriptor: {0}")]
    InvalidEgress(#[from] EgressError),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("unknown credential index {index} (pool has {len})")]
    UnknownCredential { index: usize, len: usize },
    #[error("all credentials busy after {scans} scans ({waited:?} waited)")]
    AllCredentialsBusy { scans: u32, waited: Duration },
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::UnknownCredential { .. } => ErrorKind::Configuration,
            PoolError::AllCredentialsBusy { .. } => ErrorKind::AllCredentialsBusy,
        }
    }
}

/// Failure of one upstream call. `status` is the HTTP status when one was
/// received. [`CallError::kind`] maps the status first and falls back to
/// message markers only for status-less failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub struct CallError {
    pub status: Option<u16>,
    pub message: String,
    timed_out: bool,
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "upstream status {status}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl CallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            timed_out: false,
        }
    }

    /// The call was abandoned by the caller's deadline. Always classified as
    /// [`ErrorKind::Unknown`].
    pub fn timeout(after: Duration) -> Self {
        Self {
            status: None,
            message: format!("upstream call abandoned after {after:?}"),
            timed_out: true,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }

    pub fn kind(&self) -> ErrorKind {
        if self.timed_out {
            return ErrorKind::Unknown;
        }
        match self.status {
            Some(status) => crate::classify::kind_from_status(status, &self.message),
            None => crate::classify::kind_from_message(&self.message),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EgressError {
    #[error("cannot parse egress descriptor `{input}`: {reason}")]
    Parse { input: String, reason: String },
    #[error("unsupported egress scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("egress provider fetch failed: {0}")]
    Fetch(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe returned status {0}")]
    Status(u16),
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("probe failed: {0}")]
    Transport(String),
}
