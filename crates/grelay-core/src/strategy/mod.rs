mod attempt;
mod fallback;
mod retry;
mod round_robin;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grelay_protocol::gemini::generate_content::GenerationConfig;
use grelay_provider_core::{CredentialPool, EgressPool, ModelAttemptResult, ModelCaller};

pub use attempt::attempt;
pub use fallback::FallbackStrategy;
pub use retry::RetryStrategy;
pub use round_robin::RoundRobinStrategy;

use crate::config::ContentStrategy;

/// Shared collaborators and read-only policy handed to every strategy run.
pub struct StrategyContext {
    pub credentials: Arc<CredentialPool>,
    pub egress: Arc<EgressPool>,
    pub caller: Arc<dyn ModelCaller>,
    pub models: Vec<String>,
    pub default_model: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Bound on one upstream call; expiry counts as a failed attempt.
    pub call_timeout: Duration,
    pub system_instruction: Option<String>,
}

impl StrategyContext {
    pub fn knows_model(&self, model: &str) -> bool {
        self.models.iter().any(|known| known == model)
    }
}

/// One logical generate request across one or more model attempts. The
/// returned record is terminal: either the first success, the first
/// attempt that must not be retried, or an exhaustion summary.
#[async_trait]
pub trait GenerationStrategy: Send + Sync {
    fn kind(&self) -> ContentStrategy;

    async fn generate(
        &self,
        ctx: &StrategyContext,
        prompt: &str,
        model: &str,
        config: &GenerationConfig,
    ) -> ModelAttemptResult;
}

pub fn build_strategy(kind: ContentStrategy) -> Box<dyn GenerationStrategy> {
    match kind {
        ContentStrategy::RoundRobin => Box::new(RoundRobinStrategy::default()),
        ContentStrategy::Fallback => Box::new(FallbackStrategy),
        ContentStrategy::Retry => Box::new(RetryStrategy),
    }
}
