//! Fakes and request helpers shared by the router tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response},
};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use timemachine_gateway::admission::Admission;
use timemachine_gateway::apple::{AppleError, AppleTokens, IdentityProvider};
use timemachine_gateway::auth::TokenVerifier;
use timemachine_gateway::clock::ManualClock;
use timemachine_gateway::config::{DEFAULT_MAX_UPLOAD_BYTES, EventPrompts};
use timemachine_gateway::rate_limit::SlidingWindowLimiter;
use timemachine_gateway::state::AppState;
use timemachine_gateway::supabase::{AccountStore, StoreError, User};
use timemachine_gateway::upstream::{InferenceClient, Prompt, UpstreamError};
use timemachine_gateway::usage::{StoreUsageSink, UsageEvent};

pub const SECRET: &[u8] = b"router-test-secret-router-test-secret";
pub const GOOD_CODE: &str = "good-code";
pub const BOUNDARY: &str = "XyZtestBoundary";

/// In-memory account store keyed by external id.
pub struct FakeStore {
    users: Mutex<HashMap<String, User>>,
    deleted: Mutex<Vec<String>>,
    next_id: Mutex<u32>,
    usage_tx: mpsc::UnboundedSender<UsageEvent>,
    fail_usage: bool,
}

impl FakeStore {
    pub fn new(fail_usage: bool) -> (Self, mpsc::UnboundedReceiver<UsageEvent>) {
        let (usage_tx, usage_rx) = mpsc::unbounded_channel();
        let store = Self {
            users: Mutex::new(HashMap::new()),
            deleted: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
            usage_tx,
            fail_usage,
        };
        (store, usage_rx)
    }

    pub fn insert(&self, user: User) {
        self.users
            .lock()
            .unwrap()
            .insert(user.external_user_id.clone(), user);
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountStore for FakeStore {
    async fn get_user(&self, external_user_id: &str) -> Result<User, StoreError> {
        self.users
            .lock()
            .unwrap()
            .get(external_user_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn add_user(&self, user: &User) -> Result<String, StoreError> {
        let mut next = self.next_id.lock().unwrap();
        let id = format!("user-{}", *next);
        *next += 1;
        self.insert(User {
            user_id: id.clone(),
            ..user.clone()
        });
        Ok(id)
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), StoreError> {
        self.deleted.lock().unwrap().push(user_id.to_string());
        Ok(())
    }

    async fn add_usage_event(&self, event: &UsageEvent) -> Result<(), StoreError> {
        // the channel sees every attempt, failed or not
        let _ = self.usage_tx.send(event.clone());
        if self.fail_usage {
            return Err(StoreError::Status {
                operation: "add usage event",
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}

pub struct FakeApple;

#[async_trait]
impl IdentityProvider for FakeApple {
    async fn exchange_code(&self, code: &str) -> Result<AppleTokens, AppleError> {
        if code == GOOD_CODE {
            Ok(AppleTokens {
                access_token: "apple-access".into(),
                id_token: "apple-id".into(),
            })
        } else {
            Err(AppleError::Status {
                status: 400,
                body: r#"{"error":"invalid_grant"}"#.into(),
            })
        }
    }
}

/// Returns a canned answer and remembers what it was asked.
pub struct FakeModel {
    answer: Result<String, u16>,
    calls: Mutex<Vec<(String, Option<Vec<u8>>)>>,
}

impl FakeModel {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Ok(answer.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            answer: Err(status),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Option<Vec<u8>>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceClient for FakeModel {
    async fn generate(&self, prompt: Prompt<'_>, image: Option<&[u8]>) -> Result<String, UpstreamError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.context.to_string(), image.map(<[u8]>::to_vec)));
        match &self.answer {
            Ok(text) => Ok(text.clone()),
            Err(status) => Err(UpstreamError::Status {
                status: *status,
                body: "upstream exploded".into(),
            }),
        }
    }
}

pub struct Harness {
    pub app: Router,
    pub clock: ManualClock,
    pub store: Arc<FakeStore>,
    pub usage_rx: mpsc::UnboundedReceiver<UsageEvent>,
    pub event_model: Arc<FakeModel>,
    pub search_model: Arc<FakeModel>,
}

pub struct HarnessBuilder {
    limit: u32,
    window: u64,
    fail_usage: bool,
    max_upload_bytes: usize,
    event_model: FakeModel,
    search_model: FakeModel,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            limit: 100,
            window: 60,
            fail_usage: false,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            event_model: FakeModel::answering("```json\n{\"title\": \"Coffee\"}\n```"),
            search_model: FakeModel::answering("{\"matches\": [3, 7]}"),
        }
    }
}

impl HarnessBuilder {
    pub fn limit(mut self, limit: u32, window: u64) -> Self {
        self.limit = limit;
        self.window = window;
        self
    }

    pub fn failing_usage(mut self) -> Self {
        self.fail_usage = true;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn event_model(mut self, model: FakeModel) -> Self {
        self.event_model = model;
        self
    }

    pub fn search_model(mut self, model: FakeModel) -> Self {
        self.search_model = model;
        self
    }

    pub fn build(self) -> Harness {
        let clock = ManualClock::new(1_700_000_000);
        let (store, usage_rx) = FakeStore::new(self.fail_usage);
        let store = Arc::new(store);
        let tokens = Arc::new(TokenVerifier::new(SECRET));
        let event_model = Arc::new(self.event_model);
        let search_model = Arc::new(self.search_model);

        let limiter = Arc::new(SlidingWindowLimiter::new(
            self.limit,
            Duration::from_secs(self.window),
            Arc::new(clock.clone()),
        ));
        let admission = Arc::new(Admission::new(
            Arc::clone(&tokens),
            limiter,
            Arc::new(StoreUsageSink::new(store.clone())),
            vec!["/health".into(), "/metrics".into()],
        ));

        let state = Arc::new(AppState {
            store: store.clone(),
            identity_provider: Arc::new(FakeApple),
            event_model: event_model.clone(),
            search_model: search_model.clone(),
            prompts: EventPrompts::default(),
            tokens,
            max_upload_bytes: self.max_upload_bytes,
        });

        Harness {
            app: timemachine_gateway::app(state, admission),
            clock,
            store,
            usage_rx,
            event_model,
            search_model,
        }
    }
}

pub fn harness() -> HarnessBuilder {
    HarnessBuilder::default()
}

pub fn peer(ip: &str) -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::new(ip.parse().unwrap(), 50_000))
}

pub fn token_for(user_id: &str) -> String {
    TokenVerifier::new(SECRET)
        .issue(user_id, chrono::Utc::now().timestamp())
        .unwrap()
}

/// Build a multipart body from text fields and an optional JPEG photo.
pub fn multipart_body(fields: &[(&str, &str)], photo: Option<&[u8]>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(bytes) = photo {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"timemachine-photo\"; filename=\"photo.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_request(path: &str, ip: &str, bearer: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .extension(peer(ip));
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

pub fn urlencoded_request(path: &str, ip: &str, bearer: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/x-www-form-urlencoded")
        .extension(peer(ip));
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn json_request(path: &str, ip: &str, bearer: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .extension(peer(ip));
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(path: &str, ip: &str, authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path).extension(peer(ip));
    if let Some(value) = authorization {
        builder = builder.header("authorization", value);
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    serde_json::from_slice(&body).expect("Failed to parse JSON")
}
