use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

use super::{InferenceClient, Prompt, UpstreamError};
use crate::metrics::UPSTREAM_LATENCY;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

fn text_message(role: &'static str, text: &str) -> Message {
    Message {
        role,
        content: vec![ContentPart::Text { text: text.to_string() }],
    }
}

// system prompt, user turn (image then context), trailing response prompt
fn build_messages(prompt: Prompt<'_>, image: Option<&[u8]>) -> Vec<Message> {
    let mut messages = Vec::with_capacity(3);

    if !prompt.system.is_empty() {
        messages.push(text_message("system", prompt.system));
    }

    let mut user = Vec::with_capacity(2);
    if let Some(bytes) = image {
        user.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes)),
            },
        });
    }
    user.push(ContentPart::Text {
        text: prompt.context.to_string(),
    });
    messages.push(Message {
        role: "user",
        content: user,
    });

    if !prompt.response.is_empty() {
        messages.push(text_message("system", prompt.response));
    }
    messages
}

pub struct OpenAiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(client: reqwest::Client, api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key,
            model,
            max_tokens,
        }
    }
}

#[async_trait]
impl InferenceClient for OpenAiClient {
    async fn generate(&self, prompt: Prompt<'_>, image: Option<&[u8]>) -> Result<String, UpstreamError> {
        let request = ChatRequest {
            model: &self.model,
            messages: build_messages(prompt, image),
            max_tokens: self.max_tokens,
        };
        let start = Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let raw = response.text().await?;
        UPSTREAM_LATENCY
            .with_label_values(&["openai"])
            .observe(start.elapsed().as_secs_f64());

        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: raw,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&raw)?;
        match parsed.choices.into_iter().next() {
            Some(choice) => {
                debug!(model = %self.model, "openai responded");
                Ok(choice.message.content)
            }
            // hand back the raw body so the caller's JSON cleanup decides
            None => {
                warn!(model = %self.model, "openai response had no choices");
                Ok(raw)
            }
        }
    }
}
