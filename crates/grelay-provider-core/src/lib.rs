pub mod classify;
pub mod credential_pool;
pub mod egress;
pub mod error;
pub mod provider;
pub mod result;

pub use classify::{classify, classify_call, kind_from_message, kind_from_status, Classification, Payload};
pub use credential_pool::{
    Credential, CredentialPool, CredentialStats, CredentialStatsView, KeySelection, PoolSettings,
};
pub use egress::{
    Discovery, EgressDescriptor, EgressMode, EgressPool, EgressRecord, EgressSource, EgressStats,
    HealthCheck, HealthCheckSettings, HealthReport, ProxyAuth, ProxyProtocol,
};
pub use error::{CallError, ConfigurationError, EgressError, ErrorKind, PoolError, ProbeError};
pub use provider::{EgressProber, EgressProvider, ModelCaller, StaticEgressProvider, UpstreamCall};
pub use result::ModelAttemptResult;
