use async_trait::async_trait;
use grelay_protocol::gemini::generate_content::GenerationConfig;
use grelay_provider_core::{ErrorKind, ModelAttemptResult};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{attempt, GenerationStrategy, StrategyContext};
use crate::config::ContentStrategy;

/// Repeats one model up to `max_retries` times with `retry_delay` between
/// attempts. Unknown models are replaced by the default model.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryStrategy;

#[async_trait]
impl GenerationStrategy for RetryStrategy {
    fn kind(&self) -> ContentStrategy {
        ContentStrategy::Retry
    }

    async fn generate(
        &self,
        ctx: &StrategyContext,
        prompt: &str,
        model: &str,
        config: &GenerationConfig,
    ) -> ModelAttemptResult {
        let started_at = Instant::now();
        let model = if ctx.knows_model(model) {
            model
        } else {
            warn!(
                event = "retry_unknown_model",
                model = %model,
                using = %ctx.default_model
            );
            ctx.default_model.as_str()
        };
        let max_retries = ctx.max_retries.max(1);

        let mut last_failure: Option<ModelAttemptResult> = None;
        for attempt_number in 1..=max_retries {
            debug!(
                event = "retry_attempt",
                model = %model,
                attempt = attempt_number,
                max_retries = max_retries
            );
            let result = attempt(ctx, model, prompt, config)
                .await
                .with_attempt(attempt_number);
            if result.success || result.kind().is_some_and(ErrorKind::stops_retry) {
                return result.finished(attempt_number, started_at.elapsed());
            }
            last_failure = Some(result);
            if attempt_number < max_retries {
                tokio::time::sleep(ctx.retry_delay).await;
            }
        }

        warn!(event = "retries_exhausted", model = %model, attempts = max_retries);
        let summary = format!("max retries ({max_retries}) exceeded for model '{model}', last error");
        match last_failure {
            Some(last) => last.exhausted(&summary, max_retries, started_at.elapsed()),
            None => ModelAttemptResult::failed(
                model,
                ErrorKind::Unknown,
                summary,
                started_at.elapsed(),
            ),
        }
    }
}
