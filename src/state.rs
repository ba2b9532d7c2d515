use std::sync::Arc;

use crate::apple::IdentityProvider;
use crate::auth::TokenVerifier;
use crate::config::EventPrompts;
use crate::supabase::AccountStore;
use crate::upstream::InferenceClient;

// app's shared state for the business handlers
pub struct AppState {
    pub store: Arc<dyn AccountStore>,
    pub identity_provider: Arc<dyn IdentityProvider>,
    pub event_model: Arc<dyn InferenceClient>, // photo + note -> timeline entry
    pub search_model: Arc<dyn InferenceClient>, // history + query -> matches
    pub prompts: EventPrompts,
    pub tokens: Arc<TokenVerifier>,
    pub max_upload_bytes: usize,
}
