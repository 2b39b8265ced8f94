use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::types::Content;

pub const TEXT_PLAIN: &str = "text/plain";
pub const APPLICATION_JSON: &str = "application/json";

/// Sampling and output-shape parameters attached to every upstream call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub stop_sequences: Option<Vec<String>>,
    pub response_mime_type: String,
    pub response_schema: Option<JsonValue>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            top_k: 40,
            max_output_tokens: 8192,
            stop_sequences: None,
            response_mime_type: TEXT_PLAIN.to_string(),
            response_schema: None,
        }
    }
}

impl GenerationConfig {
    /// Same sampling parameters, JSON output constrained by `schema`.
    pub fn structured(&self, schema: JsonValue) -> Self {
        Self {
            response_mime_type: APPLICATION_JSON.to_string(),
            response_schema: Some(schema),
            ..self.clone()
        }
    }

    pub fn wants_json(&self) -> bool {
        is_json_mime(&self.response_mime_type)
    }

    pub fn to_body(&self) -> GenerationConfigBody {
        GenerationConfigBody {
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
            top_k: Some(self.top_k),
            max_output_tokens: Some(self.max_output_tokens),
            stop_sequences: self.stop_sequences.clone(),
            response_mime_type: Some(self.response_mime_type.clone()),
            response_schema: self.response_schema.clone(),
        }
    }
}

pub fn is_json_mime(mime: &str) -> bool {
    mime.trim().eq_ignore_ascii_case(APPLICATION_JSON)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfigBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfigBody>,
}

impl GenerateContentRequest {
    pub fn from_prompt(
        prompt: &str,
        system_instruction: Option<&str>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            contents: vec![Content::user_text(prompt)],
            system_instruction: system_instruction.map(Content::system_text),
            generation_config: Some(config.to_body()),
        }
    }
}
