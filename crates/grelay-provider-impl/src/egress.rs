use async_trait::async_trait;
use tracing::{info, warn};

use grelay_provider_core::{EgressDescriptor, EgressError, EgressProvider};

use crate::client::shared_client;

/// Fetches a plain-text proxy list, one descriptor per line. Blank lines and
/// `#` comments are ignored; unparsable lines are skipped with a warning.
#[derive(Debug, Clone)]
pub struct HttpListProvider {
    url: String,
}

impl HttpListProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl EgressProvider for HttpListProvider {
    async fn fetch(&self) -> Result<Vec<EgressDescriptor>, EgressError> {
        let client = shared_client(None).map_err(|err| EgressError::Fetch(err.to_string()))?;
        let response = client
            .get(self.url.as_str())
            .send()
            .await
            .map_err(|err| EgressError::Fetch(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EgressError::Fetch(format!(
                "list endpoint returned status {}",
                status.as_u16()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|err| EgressError::Fetch(err.to_string()))?;
        let descriptors = parse_list(&body);
        info!(event = "egress_list_fetched", descriptors = descriptors.len());
        Ok(descriptors)
    }
}

fn parse_list(body: &str) -> Vec<EgressDescriptor> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match line.parse::<EgressDescriptor>() {
            Ok(EgressDescriptor::Direct) => None,
            Ok(descriptor) => Some(descriptor),
            Err(err) => {
                warn!(event = "egress_list_entry_skipped", error = %err);
                None
            }
        })
        .collect()
}
