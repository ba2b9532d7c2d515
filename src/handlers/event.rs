use axum::{
    Form, Json,
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::header::CONTENT_TYPE,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::EventPrompts;
use crate::error::{AppError, GENERIC_BAD_REQUEST_ERROR};
use crate::state::AppState;
use crate::upstream::{Prompt, parse_llm_object};

pub const FORM_PHOTO: &str = "timemachine-photo";
pub const FORM_MESSAGE: &str = "timemachine-message";
pub const FORM_DATE: &str = "timemachine-date";
pub const FORM_TIMELINE_SUMMARY: &str = "timeline-summary";
pub const FORM_HISTORY: &str = "timemachine-history";
pub const FORM_SEARCH_TEXT: &str = "timemachine-search-text";

const URLENCODED: &str = "application/x-www-form-urlencoded";

/// Text fields plus the optional photo of a posted form. Accepts
/// `multipart/form-data` and url-encoded bodies; only multipart can carry
/// the photo.
#[derive(Debug, Default)]
pub struct FormFields {
    text: HashMap<String, String>,
    photo: Option<Bytes>,
}

impl FormFields {
    fn get(&self, name: &str) -> &str {
        self.text.get(name).map(String::as_str).unwrap_or_default()
    }
}

fn bad_request() -> AppError {
    AppError::BadRequest(GENERIC_BAD_REQUEST_ERROR)
}

async fn read_multipart(mut multipart: Multipart) -> Result<FormFields, AppError> {
    let mut fields = FormFields::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!(error = %e, "malformed multipart body");
        bad_request()
    })? {
        let name = field.name().unwrap_or_default().to_string();
        if name == FORM_PHOTO {
            let bytes = field.bytes().await.map_err(|_| bad_request())?;
            if !bytes.is_empty() {
                fields.photo = Some(bytes);
            }
        } else {
            let value = field.text().await.map_err(|_| bad_request())?;
            fields.text.insert(name, value);
        }
    }
    Ok(fields)
}

impl<S> FromRequest<S> for FormFields
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let urlencoded = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with(URLENCODED));

        if urlencoded {
            let Form(text) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| {
                    warn!(error = %e, "malformed url-encoded body");
                    bad_request()
                })?;
            return Ok(FormFields { text, photo: None });
        }

        let multipart = Multipart::from_request(req, state)
            .await
            .map_err(|_| bad_request())?;
        read_multipart(multipart).await
    }
}

fn push_fragment(context: &mut String, label: &str, value: &str) {
    context.push_str(label);
    context.push_str(": ");
    context.push_str(value);
    context.push_str(". ");
}

// summary (optional), date (required), note (optional)
fn event_context(prompts: &EventPrompts, form: &FormFields) -> Result<String, AppError> {
    let mut context = String::new();

    let summary = form.get(FORM_TIMELINE_SUMMARY);
    if !summary.is_empty() {
        push_fragment(&mut context, &prompts.event_timeline_details, summary);
    }

    let date = form.get(FORM_DATE);
    if date.is_empty() {
        return Err(bad_request());
    }
    push_fragment(&mut context, &prompts.event_time, date);

    let message = form.get(FORM_MESSAGE);
    if !message.is_empty() {
        push_fragment(&mut context, &prompts.event_input_message, message);
    }
    Ok(context)
}

// history and search text, both required
fn search_context(prompts: &EventPrompts, form: &FormFields) -> Result<String, AppError> {
    let history = form.get(FORM_HISTORY);
    let text = form.get(FORM_SEARCH_TEXT);
    if history.is_empty() || text.is_empty() {
        return Err(bad_request());
    }

    let mut context = String::new();
    push_fragment(&mut context, &prompts.search_history, history);
    push_fragment(&mut context, &prompts.search_text, text);
    Ok(context)
}

/// Turn a dated note and optional photo into a timeline entry.
pub async fn process_event(
    State(state): State<Arc<AppState>>,
    form: FormFields,
) -> Result<Json<Map<String, Value>>, AppError> {
    let context = event_context(&state.prompts, &form)?;

    let prompt = Prompt {
        system: &state.prompts.event_system_instruction,
        context: &context,
        response: &state.prompts.event_system_response,
    };
    let raw = state.event_model.generate(prompt, form.photo.as_deref()).await?;
    debug!(has_photo = form.photo.is_some(), "event answered");

    Ok(Json(parse_llm_object(&raw)?))
}

/// Search a timeline history for entries matching free text.
pub async fn search(
    State(state): State<Arc<AppState>>,
    form: FormFields,
) -> Result<Json<Map<String, Value>>, AppError> {
    let context = search_context(&state.prompts, &form)?;

    let prompt = Prompt {
        system: &state.prompts.search_system_instruction,
        context: &context,
        response: &state.prompts.search_system_response,
    };
    let raw = state.search_model.generate(prompt, None).await?;

    Ok(Json(parse_llm_object(&raw)?))
}
