use std::path::Path;

use anyhow::Context;
use grelay_core::Gateway;
use serde_json::Value as JsonValue;

use crate::cli::{GenerateArgs, StatsArgs};

/// One-shot generation. Warms the egress pool first since no maintenance
/// loop runs for a single call.
pub async fn generate(gateway: &Gateway, args: GenerateArgs) -> anyhow::Result<bool> {
    let report = gateway.warm_up().await;
    tracing::debug!(event = "warm_up", probed = report.probed, healthy = report.healthy);

    let result = match args.schema.as_deref() {
        Some(schema) => {
            let schema = read_schema(schema)?;
            gateway
                .generate_structured(&args.prompt, schema, args.model.as_deref())
                .await
        }
        None => gateway.generate(&args.prompt, args.model.as_deref()).await,
    };
    let result = if args.return_stats {
        gateway.with_stats(result)
    } else {
        result
    };
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.success)
}

pub fn stats(gateway: &Gateway, args: StatsArgs) -> anyhow::Result<()> {
    let table = gateway.credential_stats(args.index)?;
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}

/// Inline JSON, or `@path` to read it from a file.
fn read_schema(raw: &str) -> anyhow::Result<JsonValue> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("reading schema file {path}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("schema is not valid JSON")
}

#[cfg(test)]
mod tests {
    use super::read_schema;

    #[test]
    fn inline_schema_is_parsed() {
        let schema = read_schema(r#"{"type": "array"}"#).expect("valid schema");
        assert_eq!(schema["type"], "array");
        assert!(read_schema("{nope").is_err());
        assert!(read_schema("@/definitely/missing/schema.json").is_err());
    }
}
