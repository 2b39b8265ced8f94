use async_trait::async_trait;

use grelay_provider_core::{EgressDescriptor, EgressProber, ProbeError};

use crate::client::build_client;

pub const DEFAULT_PROBE_URL: &str = "https://www.google.com/generate_204";

/// GETs a fixed low-cost endpoint through the descriptor; any 2xx is healthy.
#[derive(Debug, Clone)]
pub struct HttpProber {
    target: String,
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_URL)
    }
}

impl HttpProber {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

#[async_trait]
impl EgressProber for HttpProber {
    async fn probe(&self, descriptor: &EgressDescriptor) -> Result<(), ProbeError> {
        let proxy = descriptor.proxy_url();
        // Probed descriptors are mostly candidates that may never be used,
        // so they do not take a slot in the shared client cache.
        let client =
            build_client(proxy.as_deref()).map_err(|err| ProbeError::Transport(err.to_string()))?;
        let response = client
            .get(self.target.as_str())
            .send()
            .await
            .map_err(|err| ProbeError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }
}
