use std::sync::Arc;

use grelay_protocol::gemini::generate_content::GenerationConfig;
use grelay_provider_core::{
    ConfigurationError, CredentialPool, CredentialStatsView, EgressDescriptor, EgressPool,
    EgressProber, EgressProvider, EgressRecord, EgressStats, HealthReport, ModelAttemptResult,
    ModelCaller, PoolError,
};
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::{ContentStrategy, GatewayConfig};
use crate::strategy::{build_strategy, GenerationStrategy, StrategyContext};

/// Entry point for front-ends. Owns the pools and the selected strategy;
/// expected failures come back as unsuccessful results, never as errors.
pub struct Gateway {
    ctx: StrategyContext,
    strategy: Box<dyn GenerationStrategy>,
    generation: GenerationConfig,
    rotate_per_request: bool,
}

impl Gateway {
    /// `egress_provider` serves a configured `list_url`; `prober` backs
    /// health checking. Both are ignored by modes that do not need them.
    pub fn new(
        config: GatewayConfig,
        caller: Arc<dyn ModelCaller>,
        egress_provider: Option<Arc<dyn EgressProvider>>,
        prober: Option<Arc<dyn EgressProber>>,
    ) -> Result<Self, ConfigurationError> {
        config.check()?;
        let credentials = CredentialPool::new(config.credentials(), config.pool_settings())?;
        let mode = config.egress.to_mode(egress_provider, prober)?;
        let egress = EgressPool::new(mode, config.egress.history_capacity);
        info!(
            event = "gateway_ready",
            credentials = credentials.len(),
            key_selection = ?config.key_selection,
            strategy = config.content_strategy.as_str(),
            models = config.models.len(),
            egress = egress.mode().name()
        );
        let ctx = StrategyContext {
            credentials: Arc::new(credentials),
            egress: Arc::new(egress),
            caller,
            default_model: config.default_model().to_string(),
            models: config.models,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            call_timeout: config.call_timeout,
            system_instruction: config.system_instruction,
        };
        Ok(Self {
            ctx,
            strategy: build_strategy(config.content_strategy),
            generation: config.generation,
            rotate_per_request: config.egress.rotate_per_request,
        })
    }

    pub fn strategy(&self) -> ContentStrategy {
        self.strategy.kind()
    }

    pub fn models(&self) -> &[String] {
        &self.ctx.models
    }

    pub fn default_model(&self) -> &str {
        &self.ctx.default_model
    }

    /// Plain-text generation with the configured parameters. `None` uses the
    /// default model.
    pub async fn generate(&self, prompt: &str, model: Option<&str>) -> ModelAttemptResult {
        self.run(prompt, model, &self.generation).await
    }

    /// JSON generation constrained by `schema`. The per-call parameters are
    /// derived from the configured ones, which stay untouched.
    pub async fn generate_structured(
        &self,
        prompt: &str,
        schema: JsonValue,
        model: Option<&str>,
    ) -> ModelAttemptResult {
        let config = self.generation.structured(schema);
        self.run(prompt, model, &config).await
    }

    pub fn credential_stats(&self, index: Option<usize>) -> Result<Vec<CredentialStatsView>, PoolError> {
        self.ctx.credentials.stats(index)
    }

    /// Attaches the full credential table to a result.
    pub fn with_stats(&self, result: ModelAttemptResult) -> ModelAttemptResult {
        match self.ctx.credentials.stats(None) {
            Ok(stats) => result.with_credential_stats(stats),
            Err(_) => result,
        }
    }

    pub fn egress_current(&self) -> Option<EgressDescriptor> {
        self.ctx.egress.current()
    }

    pub fn rotate_egress(&self) -> Option<EgressDescriptor> {
        self.ctx.egress.rotate()
    }

    pub fn egress_history(&self) -> Vec<EgressRecord> {
        self.ctx.egress.history()
    }

    pub fn egress_stats(&self) -> EgressStats {
        self.ctx.egress.stats()
    }

    /// First egress refresh and health cycle, for callers that generate
    /// before the maintenance loops have run.
    pub async fn warm_up(&self) -> HealthReport {
        if let Err(err) = self.ctx.egress.refresh_once().await {
            warn!(event = "egress_warm_up_failed", error = %err);
        }
        self.ctx.egress.check_once().await
    }

    /// Background egress refresh and health loops; stop them by sending
    /// `true` on the paired sender.
    pub fn spawn_maintenance(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.ctx.egress.spawn_maintenance(shutdown)
    }

    async fn run(
        &self,
        prompt: &str,
        model: Option<&str>,
        config: &GenerationConfig,
    ) -> ModelAttemptResult {
        let trace_id = Uuid::new_v4();
        let model = model
            .filter(|model| !model.trim().is_empty())
            .unwrap_or(self.ctx.default_model.as_str());
        let span = tracing::info_span!(
            "generate",
            trace_id = %trace_id,
            strategy = self.strategy.kind().as_str()
        );
        async {
            if self.rotate_per_request {
                self.ctx.egress.rotate();
            }
            let result = self.strategy.generate(&self.ctx, prompt, model, config).await;
            info!(
                event = "generate_finished",
                success = result.success,
                model = %result.model,
                attempts = result.attempts,
                kind = result.error_kind.map(|kind| kind.as_str()).unwrap_or("none"),
                elapsed_ms = result.elapsed.as_millis()
            );
            result
        }
        .instrument(span)
        .await
    }
}
