mod common;

use std::time::Duration;

use grelay_core::{ContentStrategy, GatewayConfig};
use grelay_provider_core::{CallError, ErrorKind, KeySelection};
use tokio::time::Instant;

use common::{config, gateway, rate_limited, safety_blocked, text, unavailable, Reply, ScriptedCaller};

#[tokio::test(start_paused = true)]
async fn retry_makes_three_attempts_with_two_delays() -> anyhow::Result<()> {
    let caller = ScriptedCaller::new(|_, _| unavailable());
    let gateway = gateway(config(ContentStrategy::Retry, 3, &["m1", "m2"]), caller.clone());

    let started = Instant::now();
    let result = gateway.generate("hello", Some("m1")).await;

    assert!(!result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.error_kind, Some(ErrorKind::Connection));
    assert_eq!(caller.models_called(), vec!["m1", "m1", "m1"]);
    assert_eq!(started.elapsed(), Duration::from_secs(60));
    let message = result.error_message.unwrap_or_default();
    assert!(
        message.starts_with("max retries (3) exceeded for model 'm1', last error:"),
        "{message}"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn retry_stops_on_auth_failure() -> anyhow::Result<()> {
    let caller = ScriptedCaller::new(|_, _| {
        Reply::Err(CallError::with_status(
            400,
            "INVALID_ARGUMENT: API key not valid. Please pass a valid API key.",
        ))
    });
    let gateway = gateway(config(ContentStrategy::Retry, 2, &["m1"]), caller.clone());

    let result = gateway.generate("hello", Some("m1")).await;

    assert_eq!(result.error_kind, Some(ErrorKind::AuthPermission));
    assert_eq!(result.attempts, 1);
    assert_eq!(caller.calls().len(), 1);
    // No cooldown for auth failures, only failure bookkeeping.
    let stats = gateway.credential_stats(Some(0))?;
    assert_eq!(stats[0].consecutive_failures, 1);
    assert_eq!(stats[0].cooldown_remaining_secs, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn retry_substitutes_default_model_for_unknown_one() -> anyhow::Result<()> {
    let caller = ScriptedCaller::new(|_, _| text("ok"));
    let mut config = config(ContentStrategy::Retry, 1, &["m1", "m2"]);
    config.default_model = Some("m2".to_string());
    let gateway = gateway(config, caller.clone());

    let result = gateway.generate("hello", Some("not-configured")).await;

    assert!(result.success);
    assert_eq!(result.model, "m2");
    assert_eq!(caller.models_called(), vec!["m2"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rate_limited_attempt_moves_to_another_credential() -> anyhow::Result<()> {
    let caller = ScriptedCaller::new(|_, number| if number == 1 { rate_limited() } else { text("ok") });
    let mut config = config(ContentStrategy::Retry, 2, &["m1"]);
    config.key_selection = KeySelection::Sequential;
    config.retry_delay = Duration::from_secs(1);
    let gateway = gateway(config, caller.clone());

    let result = gateway.generate("hello", Some("m1")).await;

    assert!(result.success);
    assert_eq!(result.attempts, 2);
    let calls = caller.calls();
    assert_eq!(calls.len(), 2);
    assert_ne!(calls[0].credential_index, calls[1].credential_index);
    let limited = &gateway.credential_stats(Some(calls[0].credential_index))?[0];
    assert_eq!(limited.uses, 60);
    assert_eq!(limited.total_rate_limited, 1);
    assert!(!limited.available);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fallback_starts_at_requested_model() -> anyhow::Result<()> {
    let caller = ScriptedCaller::new(|_, _| unavailable());
    let gateway = gateway(config(ContentStrategy::Fallback, 2, &["a", "b", "c"]), caller.clone());

    let result = gateway.generate("hello", Some("b")).await;

    assert_eq!(caller.models_called(), vec!["b", "c"]);
    assert!(!result.success);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.model, "b");
    let message = result.error_message.unwrap_or_default();
    assert!(message.contains("starting from b, first error (b)"), "{message}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fallback_with_unknown_model_walks_the_whole_list() -> anyhow::Result<()> {
    let caller = ScriptedCaller::new(|call, _| if call.model == "c" { text("from c") } else { unavailable() });
    let gateway = gateway(config(ContentStrategy::Fallback, 1, &["a", "b", "c"]), caller.clone());

    let result = gateway.generate("hello", Some("zzz")).await;

    assert!(result.success);
    assert_eq!(result.text.as_deref(), Some("from c"));
    assert_eq!(result.attempts, 3);
    assert_eq!(caller.models_called(), vec!["a", "b", "c"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn round_robin_stops_on_safety_block() -> anyhow::Result<()> {
    let caller = ScriptedCaller::new(|_, _| safety_blocked());
    let gateway = gateway(config(ContentStrategy::RoundRobin, 2, &["a", "b", "c"]), caller.clone());

    let result = gateway.generate("hello", None).await;

    assert_eq!(caller.calls().len(), 1);
    assert_eq!(result.error_kind, Some(ErrorKind::SafetyBlocked));
    assert_eq!(result.model, "a");
    assert_eq!(result.attempts, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn round_robin_moves_through_models_across_requests() -> anyhow::Result<()> {
    let caller = ScriptedCaller::new(|_, _| text("ok"));
    let gateway = gateway(config(ContentStrategy::RoundRobin, 2, &["a", "b", "c"]), caller.clone());

    for _ in 0..4 {
        let result = gateway.generate("hello", Some("ignored")).await;
        assert!(result.success);
    }

    assert_eq!(caller.models_called(), vec!["a", "b", "c", "a"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn round_robin_exhaustion_reports_first_failure() -> anyhow::Result<()> {
    let caller = ScriptedCaller::new(|call, _| match call.model.as_str() {
        "a" => unavailable(),
        _ => Reply::Err(CallError::new("something odd happened")),
    });
    let gateway = gateway(config(ContentStrategy::RoundRobin, 3, &["a", "b", "c"]), caller.clone());

    let result = gateway.generate("hello", None).await;

    assert_eq!(caller.calls().len(), 3);
    assert!(!result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.error_kind, Some(ErrorKind::Connection));
    let message = result.error_message.unwrap_or_default();
    assert!(message.starts_with("all models failed, first error (a):"), "{message}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn parse_failure_is_surfaced_without_retry() -> anyhow::Result<()> {
    let caller = ScriptedCaller::new(|_, _| text("definitely not json"));
    let gateway = gateway(config(ContentStrategy::Retry, 1, &["m1"]), caller.clone());

    let result = gateway
        .generate_structured("list", serde_json::json!({"type": "object"}), Some("m1"))
        .await;

    assert_eq!(result.error_kind, Some(ErrorKind::ParseFailure));
    assert_eq!(result.text.as_deref(), Some("definitely not json"));
    assert_eq!(caller.calls().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timed_out_call_is_booked_as_failure() -> anyhow::Result<()> {
    let caller = ScriptedCaller::new(|_, _| Reply::Hang);
    let config = GatewayConfig {
        call_timeout: Duration::from_secs(5),
        max_retries: 1,
        ..config(ContentStrategy::Retry, 1, &["m1"])
    };
    let gateway = gateway(config, caller);

    let result = gateway.generate("hello", None).await;

    assert_eq!(result.error_kind, Some(ErrorKind::Unknown));
    assert_eq!(result.credential_index, Some(0));
    let stats = gateway.credential_stats(Some(0))?;
    assert_eq!(stats[0].consecutive_failures, 1);
    assert_eq!(stats[0].total_failures, 1);
    assert!(stats[0].available);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dropped_request_still_books_the_credential() -> anyhow::Result<()> {
    let caller = ScriptedCaller::new(|_, _| Reply::Hang);
    let config = GatewayConfig {
        max_retries: 1,
        ..config(ContentStrategy::Retry, 1, &["m1"])
    };
    let gateway = gateway(config, caller);

    let outcome = tokio::time::timeout(Duration::from_secs(1), gateway.generate("hello", None)).await;

    assert!(outcome.is_err());
    let stats = gateway.credential_stats(Some(0))?;
    assert_eq!(stats[0].total_failures, 1);
    assert_eq!(stats[0].consecutive_failures, 1);
    assert_eq!(stats[0].uses, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exhausted_credentials_become_a_failed_attempt() -> anyhow::Result<()> {
    let caller = ScriptedCaller::new(|_, _| unavailable());
    let config = GatewayConfig {
        rate_limit: 1,
        max_busy_scans: 2,
        max_retries: 2,
        retry_delay: Duration::ZERO,
        ..config(ContentStrategy::Retry, 1, &["m1"])
    };
    let gateway = gateway(config, caller.clone());

    let result = gateway.generate("hello", None).await;

    assert_eq!(caller.calls().len(), 1);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.error_kind, Some(ErrorKind::AllCredentialsBusy));
    assert_eq!(result.credential_index, None);
    Ok(())
}
