//! Generative-AI providers and the cleanup applied to their answers.

mod gemini;
mod openai;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode upstream response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("upstream returned no candidates")]
    NoCandidates,
}

/// The three prompt pieces sent with every inference call.
#[derive(Debug, Clone, Copy)]
pub struct Prompt<'a> {
    pub system: &'a str,
    pub context: &'a str,
    pub response: &'a str,
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Run one completion. `image` holds JPEG bytes when present.
    async fn generate(&self, prompt: Prompt<'_>, image: Option<&[u8]>) -> Result<String, UpstreamError>;
}

/// Strip a code fence (and a `json` tag) from model output.
///
/// Only one leading fence, one leading `json` and one trailing fence are
/// removed, in that order, before trimming whitespace.
pub fn clean_llm_json(input: &str) -> &str {
    let input = input.strip_prefix("```").unwrap_or(input);
    let input = input.strip_prefix("json").unwrap_or(input);
    let input = input.strip_suffix("```").unwrap_or(input);
    input.trim()
}

// Clean model output and parse it as a JSON object
pub fn parse_llm_object(raw: &str) -> Result<Map<String, Value>, serde_json::Error> {
    serde_json::from_str(clean_llm_json(raw))
}
