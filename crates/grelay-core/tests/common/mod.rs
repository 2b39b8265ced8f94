#![allow(dead_code)]

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use grelay_core::{ContentStrategy, Gateway, GatewayConfig};
use grelay_protocol::gemini::generate_content::{
    Candidate, Content, FinishReason, GenerateContentResponse, Part,
};
use grelay_provider_core::{CallError, EgressDescriptor, ModelCaller, UpstreamCall};

/// What one upstream call observed.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub model: String,
    pub credential_index: usize,
    pub mime: String,
    pub egress: Option<EgressDescriptor>,
    pub system_instruction: Option<String>,
}

pub enum Reply {
    Ok(GenerateContentResponse),
    Err(CallError),
    /// Never answers within any sane call timeout.
    Hang,
}

type Script = Box<dyn Fn(&CallRecord, usize) -> Reply + Send + Sync>;

/// In-memory upstream driven by a closure over (call, call number).
pub struct ScriptedCaller {
    script: Script,
    calls: Mutex<Vec<CallRecord>>,
}

impl ScriptedCaller {
    pub fn new(script: impl Fn(&CallRecord, usize) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn models_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.model).collect()
    }
}

#[async_trait]
impl ModelCaller for ScriptedCaller {
    async fn call(&self, call: UpstreamCall<'_>) -> Result<GenerateContentResponse, CallError> {
        let record = CallRecord {
            model: call.model.to_string(),
            credential_index: call.credential.index(),
            mime: call.config.response_mime_type.clone(),
            egress: call.egress.cloned(),
            system_instruction: call.system_instruction.map(String::from),
        };
        let number = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            calls.push(record.clone());
            calls.len()
        };
        match (self.script)(&record, number) {
            Reply::Ok(response) => Ok(response),
            Reply::Err(err) => Err(err),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(CallError::new("hung call returned"))
            }
        }
    }
}

pub fn text(body: &str) -> Reply {
    Reply::Ok(GenerateContentResponse::text_response(body))
}

pub fn unavailable() -> Reply {
    Reply::Err(CallError::with_status(503, "UNAVAILABLE: model overloaded"))
}

pub fn rate_limited() -> Reply {
    Reply::Err(CallError::with_status(429, "RESOURCE_EXHAUSTED: quota exceeded"))
}

pub fn safety_blocked() -> Reply {
    Reply::Ok(GenerateContentResponse {
        candidates: vec![Candidate {
            content: Some(Content {
                role: None,
                parts: vec![Part::text("partial")],
            }),
            finish_reason: Some(FinishReason::Safety),
            ..Candidate::default()
        }],
        ..GenerateContentResponse::default()
    })
}

pub fn config(strategy: ContentStrategy, keys: usize, models: &[&str]) -> GatewayConfig {
    GatewayConfig {
        api_keys: (0..keys).map(|index| format!("AIza-test-{index}")).collect(),
        content_strategy: strategy,
        models: models.iter().map(|model| model.to_string()).collect(),
        retry_delay: Duration::from_secs(30),
        ..GatewayConfig::default()
    }
}

pub fn gateway(config: GatewayConfig, caller: Arc<ScriptedCaller>) -> Gateway {
    match Gateway::new(config, caller, None, None) {
        Ok(gateway) => gateway,
        Err(err) => panic!("gateway config rejected: {err}"),
    }
}
