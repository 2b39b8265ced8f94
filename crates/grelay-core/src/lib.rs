pub mod config;
pub mod gateway;
pub mod strategy;

pub use config::{
    ContentStrategy, EgressConfig, EgressModeName, GatewayConfig, HealthCheckConfig,
};
pub use gateway::Gateway;
pub use strategy::{
    attempt, build_strategy, FallbackStrategy, GenerationStrategy, RetryStrategy,
    RoundRobinStrategy, StrategyContext,
};
