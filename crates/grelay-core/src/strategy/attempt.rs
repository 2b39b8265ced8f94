use grelay_protocol::gemini::generate_content::GenerationConfig;
use grelay_provider_core::{
    classify_call, CallError, CredentialPool, ErrorKind, ModelAttemptResult, UpstreamCall,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::StrategyContext;

/// Books a failure for the credential if the attempt is dropped before its
/// outcome was reported.
struct Unsettled<'a> {
    pool: &'a CredentialPool,
    index: usize,
    settled: bool,
}

impl Drop for Unsettled<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let _ = self.pool.report_failure(self.index);
            debug!(event = "attempt_cancelled", credential_index = self.index);
        }
    }
}

/// One upstream call: credential, egress, call, classify, book.
pub async fn attempt(
    ctx: &StrategyContext,
    model: &str,
    prompt: &str,
    config: &GenerationConfig,
) -> ModelAttemptResult {
    let started_at = Instant::now();
    let (credential, index) = match ctx.credentials.next().await {
        Ok(pair) => pair,
        Err(err) => {
            warn!(event = "attempt_skipped", model = %model, error = %err);
            return ModelAttemptResult::failed(model, err.kind(), err.to_string(), started_at.elapsed());
        }
    };
    let mut unsettled = Unsettled {
        pool: &ctx.credentials,
        index,
        settled: false,
    };
    let egress = ctx.egress.current();

    let call = UpstreamCall {
        credential: &credential,
        model,
        prompt,
        system_instruction: ctx.system_instruction.as_deref(),
        config,
        egress: egress.as_ref(),
    };
    let outcome = match tokio::time::timeout(ctx.call_timeout, ctx.caller.call(call)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(CallError::timeout(ctx.call_timeout)),
    };
    let classification = classify_call(outcome.as_ref(), &config.response_mime_type);

    let kind = classification.error_kind();
    let booked = match kind {
        None => ctx.credentials.report_success(index),
        Some(ErrorKind::RateLimited) => ctx.credentials.report_rate_limited(index),
        Some(_) => ctx.credentials.report_failure(index),
    };
    unsettled.settled = true;
    if let Err(err) = booked {
        warn!(event = "credential_report_failed", credential_index = index, error = %err);
    }

    let result = ModelAttemptResult::from_classification(
        model,
        classification,
        started_at.elapsed(),
        index,
        egress,
    );
    match kind {
        None => info!(
            event = "attempt_succeeded",
            model = %model,
            credential = %credential.masked(),
            elapsed_ms = result.elapsed.as_millis()
        ),
        Some(kind) => warn!(
            event = "attempt_failed",
            model = %model,
            credential = %credential.masked(),
            kind = %kind,
            error = result.error_message.as_deref().unwrap_or_default(),
            elapsed_ms = result.elapsed.as_millis()
        ),
    }
    result
}
