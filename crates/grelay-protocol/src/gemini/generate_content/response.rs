use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{BlockReason, Candidate, FinishReason, PromptFeedback, UsageMetadata};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

/// Returned by [`GenerateContentResponse::text`] when the first candidate
/// carries no text part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoValidPart;

impl fmt::Display for NoValidPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("response contains no valid text part")
    }
}

impl std::error::Error for NoValidPart {}

impl GenerateContentResponse {
    pub fn text_response(text: impl Into<String>) -> Self {
        Self {
            candidates: vec![Candidate {
                content: Some(super::types::Content {
                    role: Some(super::types::Role::Model),
                    parts: vec![super::types::Part::text(text)],
                }),
                finish_reason: Some(FinishReason::Stop),
                ..Candidate::default()
            }],
            ..Self::default()
        }
    }

    pub fn first_finish_reason(&self) -> Option<FinishReason> {
        self.candidates.first().and_then(|candidate| candidate.finish_reason)
    }

    pub fn block_reason(&self) -> Option<BlockReason> {
        self.prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason)
    }

    /// Concatenated non-thought text of the first candidate.
    pub fn text(&self) -> Result<String, NoValidPart> {
        let content = self
            .candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .ok_or(NoValidPart)?;
        let mut out = String::new();
        let mut found = false;
        for part in &content.parts {
            if part.thought == Some(true) {
                continue;
            }
            if let Some(text) = part.text.as_deref() {
                out.push_str(text);
                found = true;
            }
        }
        if found { Ok(out) } else { Err(NoValidPart) }
    }
}
