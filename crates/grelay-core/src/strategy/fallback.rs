use async_trait::async_trait;
use grelay_protocol::gemini::generate_content::GenerationConfig;
use grelay_provider_core::{ErrorKind, ModelAttemptResult};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{attempt, GenerationStrategy, StrategyContext};
use crate::config::ContentStrategy;

/// Tries the requested model, then every model configured after it.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackStrategy;

#[async_trait]
impl GenerationStrategy for FallbackStrategy {
    fn kind(&self) -> ContentStrategy {
        ContentStrategy::Fallback
    }

    async fn generate(
        &self,
        ctx: &StrategyContext,
        prompt: &str,
        model: &str,
        config: &GenerationConfig,
    ) -> ModelAttemptResult {
        let started_at = Instant::now();
        let start = match ctx.models.iter().position(|known| known == model) {
            Some(start) => start,
            None => {
                // Unknown start model: walk the whole list instead.
                warn!(
                    event = "fallback_unknown_model",
                    model = %model,
                    using = ctx.models.first().map(String::as_str).unwrap_or_default()
                );
                0
            }
        };
        let Some(chain) = ctx.models.get(start..).filter(|chain| !chain.is_empty()) else {
            return ModelAttemptResult::failed(
                model,
                ErrorKind::Configuration,
                "no models configured",
                started_at.elapsed(),
            );
        };
        let start_model = &chain[0];

        let mut attempts = 0u32;
        let mut first_failure: Option<ModelAttemptResult> = None;
        for candidate in chain {
            attempts += 1;
            debug!(event = "fallback_attempt", model = %candidate, attempt = attempts);
            let result = attempt(ctx, candidate, prompt, config).await.with_attempt(attempts);
            if result.success || result.kind().is_some_and(ErrorKind::stops_model_chain) {
                return result.finished(attempts, started_at.elapsed());
            }
            if first_failure.is_none() {
                first_failure = Some(result);
            }
        }

        warn!(event = "models_exhausted", strategy = "fallback", attempts = attempts);
        match first_failure {
            Some(first) => {
                let summary = format!(
                    "all models failed starting from {start_model}, first error ({})",
                    first.model
                );
                first.exhausted(&summary, attempts, started_at.elapsed())
            }
            None => ModelAttemptResult::failed(
                model,
                ErrorKind::Unknown,
                "no model was attempted",
                started_at.elapsed(),
            ),
        }
    }
}
