use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use config::{Config, ConfigError, Environment, File};
use grelay_core::{Gateway, GatewayConfig};
use grelay_provider_core::{ConfigurationError, EgressProber, EgressProvider};
use grelay_provider_impl::{GeminiCaller, HttpListProvider, HttpProber};
use tracing::info;

pub const ENV_PREFIX: &str = "GRELAY";
const SINGLE_KEY_VAR: &str = "GRELAY_API_KEY";

/// Reads the optional file, then `GRELAY_*` variables from the process
/// environment (nested keys use `__`, e.g. `GRELAY_EGRESS__MODE`).
pub fn load(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    load_with_env(path, std::env::vars().collect())
}

pub fn load_with_env(
    path: Option<&Path>,
    vars: HashMap<String, String>,
) -> Result<GatewayConfig, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path));
    }
    let environment = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("api_keys")
        .with_list_parse_key("models")
        .with_list_parse_key("egress.proxies")
        .source(Some(vars.clone()));

    let mut gateway: GatewayConfig = builder.add_source(environment).build()?.try_deserialize()?;
    if gateway.api_keys.is_empty()
        && let Some(key) = vars.get(SINGLE_KEY_VAR)
    {
        gateway.api_keys = vec![key.clone()];
    }
    Ok(gateway)
}

/// Wires the HTTP-backed collaborators the configuration asks for.
pub fn build_gateway(config: GatewayConfig) -> Result<Gateway, ConfigurationError> {
    let caller = Arc::new(GeminiCaller::new(config.upstream_base_url.as_deref()));
    let provider = config
        .egress
        .list_url
        .as_deref()
        .map(|url| Arc::new(HttpListProvider::new(url)) as Arc<dyn EgressProvider>);
    let prober = config.egress.health_check.enabled.then(|| {
        let prober = match config.egress.health_check.probe_url.as_deref() {
            Some(url) => HttpProber::new(url),
            None => HttpProber::default(),
        };
        Arc::new(prober) as Arc<dyn EgressProber>
    });
    info!(
        event = "settings_loaded",
        list_url = config.egress.list_url.is_some(),
        health_check = config.egress.health_check.enabled,
        custom_upstream = config.upstream_base_url.is_some()
    );
    Gateway::new(config, caller, provider, prober)
}
