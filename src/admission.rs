//! Request admission: authentication, per-identity rate limiting and usage
//! telemetry, decided before any handler runs.
//!
//! For every request that is not on an exempt path:
//! 1. a bearer credential that fails verification is rejected with 401;
//! 2. a verified credential makes its subject the identity and emits a usage
//!    event for the request path;
//! 3. without a credential the peer IP address is the identity;
//! 4. the identity's sliding window is touched and the request is rejected
//!    with 429 when it holds more entries than the limit.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::auth::{Credential, TokenVerifier};
use crate::error::AppError;
use crate::metrics::{ADMITTED_TOTAL, RATE_LIMITED_TOTAL, REQUEST_TOTAL, UNAUTHORIZED_TOTAL};
use crate::rate_limit::{RateDecision, SlidingWindowLimiter};
use crate::usage::{UsageEvent, UsageSink};

const UNKNOWN_ADDRESS: &str = "unknown";

/// Who a request is counted against. Inserted into request extensions for
/// admitted requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User(String),
    Address(String),
}

impl Identity {
    pub fn key(&self) -> &str {
        match self {
            Identity::User(id) | Identity::Address(id) => id,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::User(id) => Some(id),
            Identity::Address(_) => None,
        }
    }
}

pub struct Admission {
    verifier: Arc<TokenVerifier>,
    limiter: Arc<SlidingWindowLimiter>,
    usage: Arc<dyn UsageSink>,
    exempt_prefixes: Vec<String>,
}

impl Admission {
    pub fn new(
        verifier: Arc<TokenVerifier>,
        limiter: Arc<SlidingWindowLimiter>,
        usage: Arc<dyn UsageSink>,
        exempt_prefixes: Vec<String>,
    ) -> Self {
        Self {
            verifier,
            limiter,
            usage,
            exempt_prefixes,
        }
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Decide whether a request may proceed.
    ///
    /// `authorization` is the raw header value and `peer` the caller's
    /// network address, used when no credential is supplied.
    pub fn admit(&self, path: &str, authorization: Option<&str>, peer: &str) -> Result<Identity, AppError> {
        let identity = match self.verifier.resolve(authorization) {
            Credential::Invalid(_) => {
                UNAUTHORIZED_TOTAL.inc();
                return Err(AppError::Unauthorized);
            }
            Credential::Verified(user_id) => {
                self.usage.notify(UsageEvent {
                    user_id: user_id.clone(),
                    event_type: path.to_string(),
                });
                Identity::User(user_id)
            }
            Credential::Absent => Identity::Address(peer.to_string()),
        };

        match self.limiter.check(identity.key()) {
            RateDecision::Allowed { .. } => Ok(identity),
            RateDecision::Limited { count } => {
                RATE_LIMITED_TOTAL.inc();
                debug!(identity = identity.key(), count, path, "request rate limited");
                Err(AppError::RateLimited)
            }
        }
    }
}

fn peer_address(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
}

// Axum middleware wrapping `Admission::admit`
pub async fn admission_middleware(
    State(admission): State<Arc<Admission>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if admission.is_exempt(&path) {
        return next.run(request).await;
    }
    REQUEST_TOTAL.inc();

    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let peer = peer_address(&request);

    match admission.admit(&path, authorization.as_deref(), &peer) {
        Ok(identity) => {
            ADMITTED_TOTAL.inc();
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
