use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use grelay_protocol::gemini::generate_content::GenerationConfig;
use grelay_provider_core::{ErrorKind, ModelAttemptResult};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{attempt, GenerationStrategy, StrategyContext};
use crate::config::ContentStrategy;

/// Walks the configured models from a shared cursor, ignoring the requested
/// model. Each run tries every model at most once.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    cursor: AtomicUsize,
}

#[async_trait]
impl GenerationStrategy for RoundRobinStrategy {
    fn kind(&self) -> ContentStrategy {
        ContentStrategy::RoundRobin
    }

    async fn generate(
        &self,
        ctx: &StrategyContext,
        prompt: &str,
        _model: &str,
        config: &GenerationConfig,
    ) -> ModelAttemptResult {
        let started_at = Instant::now();
        let total = ctx.models.len();
        if total == 0 {
            return ModelAttemptResult::failed(
                "",
                ErrorKind::Configuration,
                "no models configured",
                started_at.elapsed(),
            );
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        let mut attempts = 0u32;
        let mut touched = 0usize;
        let mut first_failure: Option<ModelAttemptResult> = None;
        let mut terminal = None;
        for offset in 0..total {
            let model = &ctx.models[(start % total + offset) % total];
            attempts += 1;
            touched += 1;
            debug!(event = "round_robin_attempt", model = %model, attempt = attempts);
            let result = attempt(ctx, model, prompt, config).await.with_attempt(attempts);
            if result.success || result.kind().is_some_and(ErrorKind::stops_model_chain) {
                terminal = Some(result);
                break;
            }
            if first_failure.is_none() {
                first_failure = Some(result);
            }
        }
        // Later runs continue after the last model this run touched.
        if touched > 1 {
            self.cursor.fetch_add(touched - 1, Ordering::Relaxed);
        }

        if let Some(result) = terminal {
            return result.finished(attempts, started_at.elapsed());
        }
        match first_failure {
            Some(first) => {
                warn!(event = "models_exhausted", strategy = "round_robin", attempts = attempts);
                let summary = format!("all models failed, first error ({})", first.model);
                first.exhausted(&summary, attempts, started_at.elapsed())
            }
            None => ModelAttemptResult::failed(
                "",
                ErrorKind::Unknown,
                "no model was attempted",
                started_at.elapsed(),
            ),
        }
    }
}
