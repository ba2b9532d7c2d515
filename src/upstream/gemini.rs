use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::{InferenceClient, Prompt, UpstreamError};
use crate::metrics::UPSTREAM_LATENCY;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// generateContent request body
#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    InlineData { inline_data: Blob },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct Blob {
    mime_type: &'static str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

// Image first, then all three prompts joined into one text part
fn build_request(prompt: Prompt<'_>, image: Option<&[u8]>) -> GenerateContentRequest {
    let mut parts = Vec::with_capacity(2);
    if let Some(bytes) = image {
        parts.push(Part::InlineData {
            inline_data: Blob {
                mime_type: "image/jpeg",
                data: STANDARD.encode(bytes),
            },
        });
    }
    parts.push(Part::Text {
        text: format!("{}\n{}\n{}", prompt.system, prompt.context, prompt.response),
    });

    GenerateContentRequest {
        contents: vec![Content { role: "user", parts }],
    }
}

fn collect_text(response: GenerateContentResponse) -> Result<String, UpstreamError> {
    if response.candidates.is_empty() {
        return Err(UpstreamError::NoCandidates);
    }
    Ok(response
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .map(|p| p.text)
        .collect())
}

pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn generate(&self, prompt: Prompt<'_>, image: Option<&[u8]>) -> Result<String, UpstreamError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request(prompt, image))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: GenerateContentResponse = response.json().await?;
        UPSTREAM_LATENCY
            .with_label_values(&["gemini"])
            .observe(start.elapsed().as_secs_f64());
        debug!(model = %self.model, candidates = body.candidates.len(), "gemini responded");

        collect_text(body)
    }
}
