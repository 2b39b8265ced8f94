mod descriptor;
mod health;
mod pool;

pub use descriptor::{EgressDescriptor, ProxyAuth, ProxyProtocol};
pub use health::{HealthCheckSettings, HealthReport};
pub use pool::{
    DEFAULT_HISTORY_CAPACITY, Discovery, EgressMode, EgressPool, EgressRecord, EgressSource,
    EgressStats, HealthCheck, REFRESH_BACKOFF,
};
