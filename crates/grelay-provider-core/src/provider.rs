use async_trait::async_trait;
use grelay_protocol::gemini::generate_content::{GenerateContentResponse, GenerationConfig};

use crate::credential_pool::Credential;
use crate::egress::EgressDescriptor;
use crate::error::{CallError, EgressError, ProbeError};

/// Everything one upstream call needs. `egress == None` means connect directly.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamCall<'a> {
    pub credential: &'a Credential,
    pub model: &'a str,
    pub prompt: &'a str,
    pub system_instruction: Option<&'a str>,
    pub config: &'a GenerationConfig,
    pub egress: Option<&'a EgressDescriptor>,
}

/// The model-calling capability. Implementations perform exactly one request
/// and never retry; retries belong to the strategies.
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn call(&self, call: UpstreamCall<'_>) -> Result<GenerateContentResponse, CallError>;
}

/// Source of egress descriptors for discovered mode.
#[async_trait]
pub trait EgressProvider: Send + Sync {
    async fn fetch(&self) -> Result<Vec<EgressDescriptor>, EgressError>;
}

/// Connectivity check for a single descriptor. The caller bounds it with a
/// timeout.
#[async_trait]
pub trait EgressProber: Send + Sync {
    async fn probe(&self, descriptor: &EgressDescriptor) -> Result<(), ProbeError>;
}

/// Provider returning a fixed list; useful for pinned proxy sets and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticEgressProvider {
    descriptors: Vec<EgressDescriptor>,
}

impl StaticEgressProvider {
    pub fn new(descriptors: Vec<EgressDescriptor>) -> Self {
        Self { descriptors }
    }
}

#[async_trait]
impl EgressProvider for StaticEgressProvider {
    async fn fetch(&self) -> Result<Vec<EgressDescriptor>, EgressError> {
        Ok(self.descriptors.clone())
    }
}
