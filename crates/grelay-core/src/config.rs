use std::sync::Arc;
use std::time::Duration;

use grelay_protocol::gemini::generate_content::GenerationConfig;
use grelay_provider_core::{
    ConfigurationError, Discovery, EgressDescriptor, EgressMode, EgressProber, EgressProvider,
    HealthCheck, HealthCheckSettings, KeySelection, PoolSettings, StaticEgressProvider,
};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;

/// Which generation strategy drives a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStrategy {
    #[default]
    RoundRobin,
    Fallback,
    Retry,
}

impl ContentStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentStrategy::RoundRobin => "round_robin",
            ContentStrategy::Fallback => "fallback",
            ContentStrategy::Retry => "retry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EgressModeName {
    #[default]
    Direct,
    Static,
    Discovered,
}

/// Construction-time policy for a [`crate::Gateway`]. Read once; never
/// mutated by calls.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GatewayConfig {
    pub api_keys: Vec<String>,
    pub key_selection: KeySelection,
    #[validate(minimum = 1)]
    pub rate_limit: u32,
    #[serde(with = "duration_secs")]
    pub reset_window: Duration,
    #[serde(with = "duration_secs")]
    pub busy_backoff: Duration,
    #[validate(minimum = 1)]
    pub max_busy_scans: u32,

    pub content_strategy: ContentStrategy,
    pub models: Vec<String>,
    /// First configured model when unset.
    pub default_model: Option<String>,
    #[validate(minimum = 1)]
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub retry_delay: Duration,
    #[serde(with = "duration_secs")]
    pub call_timeout: Duration,

    pub generation: GenerationConfig,
    pub system_instruction: Option<String>,
    pub upstream_base_url: Option<String>,

    #[validate]
    pub egress: EgressConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            key_selection: KeySelection::RoundRobin,
            rate_limit: 60,
            reset_window: Duration::from_secs(60),
            busy_backoff: Duration::from_secs(1),
            max_busy_scans: 30,
            content_strategy: ContentStrategy::RoundRobin,
            models: default_models(),
            default_model: None,
            max_retries: 3,
            retry_delay: Duration::from_secs(30),
            call_timeout: Duration::from_secs(120),
            generation: GenerationConfig::default(),
            system_instruction: None,
            upstream_base_url: None,
            egress: EgressConfig::default(),
        }
    }
}

fn default_models() -> Vec<String> {
    [
        "gemini-2.0-flash",
        "gemini-2.0-flash-lite",
        "gemini-1.5-flash",
        "gemini-1.5-flash-8b",
        "gemini-1.5-pro",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl GatewayConfig {
    /// Full construction-time check: required lists, cross-field rules and
    /// the declarative bounds.
    pub fn check(&self) -> Result<(), ConfigurationError> {
        if self.credentials().is_empty() {
            return Err(ConfigurationError::NoCredentials);
        }
        if self.models.is_empty() {
            return Err(ConfigurationError::NoModels);
        }
        if let Some(default_model) = &self.default_model {
            if !self.models.contains(default_model) {
                return Err(ConfigurationError::UnknownDefaultModel(default_model.clone()));
            }
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigurationError::Invalid(
                "call_timeout must be greater than zero".to_string(),
            ));
        }
        self.validate()
            .map_err(|errors| ConfigurationError::Invalid(errors.to_string()))?;
        self.egress.check()
    }

    /// Non-blank credentials, trimmed, in configured order.
    pub fn credentials(&self) -> Vec<String> {
        self.api_keys
            .iter()
            .map(|key| key.trim())
            .filter(|key| !key.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn default_model(&self) -> &str {
        self.default_model
            .as_deref()
            .or_else(|| self.models.first().map(String::as_str))
            .unwrap_or_default()
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            selection: self.key_selection,
            rate_limit: self.rate_limit,
            reset_window: self.reset_window,
            busy_backoff: self.busy_backoff,
            max_busy_scans: self.max_busy_scans,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EgressConfig {
    pub mode: EgressModeName,
    /// Static mode: the single descriptor.
    pub proxy: Option<String>,
    /// Discovered mode: plain-text list endpoint.
    pub list_url: Option<String>,
    /// Discovered mode without a list endpoint: a fixed candidate list.
    pub proxies: Vec<String>,
    #[serde(with = "duration_secs")]
    pub update_interval: Duration,
    #[validate(minimum = 1)]
    pub history_capacity: usize,
    /// Rotate before every request instead of only on demand.
    pub rotate_per_request: bool,
    #[validate]
    pub health_check: HealthCheckConfig,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            mode: EgressModeName::Direct,
            proxy: None,
            list_url: None,
            proxies: Vec::new(),
            update_interval: Duration::from_secs(15),
            history_capacity: 10,
            rotate_per_request: false,
            health_check: HealthCheckConfig::default(),
        }
    }
}

impl EgressConfig {
    pub fn check(&self) -> Result<(), ConfigurationError> {
        match self.mode {
            EgressModeName::Direct => Ok(()),
            EgressModeName::Static => {
                let proxy = self.proxy.as_deref().ok_or(ConfigurationError::MissingEgressField {
                    mode: "static",
                    field: "proxy",
                })?;
                proxy.parse::<EgressDescriptor>()?;
                Ok(())
            }
            EgressModeName::Discovered => {
                if self.list_url.is_none() && self.proxies.is_empty() {
                    return Err(ConfigurationError::MissingEgressField {
                        mode: "discovered",
                        field: "list_url",
                    });
                }
                for proxy in &self.proxies {
                    proxy.parse::<EgressDescriptor>()?;
                }
                if self.update_interval.is_zero() {
                    return Err(ConfigurationError::Invalid(
                        "egress.update_interval must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Builds the pool mode. `provider` serves `list_url`; without it the
    /// fixed `proxies` list is used. `prober` is required only when health
    /// checking is enabled.
    pub fn to_mode(
        &self,
        provider: Option<Arc<dyn EgressProvider>>,
        prober: Option<Arc<dyn EgressProber>>,
    ) -> Result<EgressMode, ConfigurationError> {
        self.check()?;
        match self.mode {
            EgressModeName::Direct => Ok(EgressMode::Direct),
            EgressModeName::Static => {
                let proxy = self.proxy.as_deref().unwrap_or("direct");
                Ok(EgressMode::Static(proxy.parse()?))
            }
            EgressModeName::Discovered => {
                let provider = match provider {
                    Some(provider) => provider,
                    None if !self.proxies.is_empty() => {
                        let descriptors = self
                            .proxies
                            .iter()
                            .map(|proxy| proxy.parse::<EgressDescriptor>())
                            .collect::<Result<Vec<_>, _>>()?;
                        Arc::new(StaticEgressProvider::new(descriptors))
                    }
                    None => {
                        return Err(ConfigurationError::MissingEgressField {
                            mode: "discovered",
                            field: "list_url",
                        });
                    }
                };
                let health_check = if self.health_check.enabled {
                    let prober = prober.ok_or(ConfigurationError::MissingEgressField {
                        mode: "discovered",
                        field: "health_check.probe_url",
                    })?;
                    Some(HealthCheck {
                        prober,
                        settings: self.health_check.settings(),
                    })
                } else {
                    None
                };
                Ok(EgressMode::Discovered(Discovery {
                    provider,
                    update_interval: self.update_interval,
                    health_check,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    /// Low-cost endpoint fetched through each candidate.
    pub probe_url: Option<String>,
    #[validate(minimum = 1)]
    pub probe_concurrency: usize,
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,
    #[serde(with = "duration_secs")]
    pub recheck_interval: Duration,
    #[validate(minimum = 1)]
    pub blacklist_limit: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        let settings = HealthCheckSettings::default();
        Self {
            enabled: false,
            probe_url: None,
            probe_concurrency: settings.probe_concurrency,
            probe_timeout: settings.probe_timeout,
            check_interval: settings.check_interval,
            recheck_interval: settings.recheck_interval,
            blacklist_limit: settings.blacklist_limit,
        }
    }
}

impl HealthCheckConfig {
    pub fn settings(&self) -> HealthCheckSettings {
        HealthCheckSettings {
            probe_concurrency: self.probe_concurrency,
            probe_timeout: self.probe_timeout,
            check_interval: self.check_interval,
            recheck_interval: self.recheck_interval,
            blacklist_limit: self.blacklist_limit,
        }
    }
}

/// Durations as (fractional) seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            de::Error::custom(format!("invalid duration {secs}: expected non-negative seconds"))
        })
    }
}
