use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::apple::AppleConfig;
use crate::supabase::SupabaseConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read prompts file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse prompts file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "timemachine-gateway")]
#[command(about = "Admission-controlled relay to generative AI and the account store")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Rate limit max requests per window
    #[arg(long, env = "RATE_LIMIT", default_value_t = 10)]
    pub rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, env = "RATE_WINDOW", default_value_t = 60)]
    pub rate_window: u64,

    // Identities idle for this many windows are forgotten
    #[arg(long, env = "RATE_IDLE_FACTOR", default_value_t = 2)]
    pub idle_factor: u32,

    // Shared secret for session tokens (HS256)
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    // Path prefixes that skip admission entirely
    #[arg(long, env = "EXEMPT_PATHS", value_delimiter = ',', default_value = "/health,/metrics")]
    pub exempt_paths: Vec<String>,

    // Largest accepted request body; photos ride in the /event form
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    // Timeout for every outbound call, in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT", default_value_t = 30)]
    pub upstream_timeout: u64,

    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: String,

    #[arg(long, env = "SUPABASE_KEY", hide_env_values = true)]
    pub supabase_key: String,

    #[arg(long, env = "SUPABASE_ACCOUNT_TABLE", default_value = "accounts")]
    pub account_table: String,

    #[arg(long, env = "SUPABASE_USAGE_TABLE", default_value = "usage")]
    pub usage_table: String,

    #[arg(long, env = "GEMINI_KEY", hide_env_values = true)]
    pub gemini_key: String,

    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-1.5-flash")]
    pub gemini_model: String,

    #[arg(long, env = "OPENAI_KEY", hide_env_values = true)]
    pub openai_key: String,

    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o")]
    pub openai_model: String,

    #[arg(long, env = "OPENAI_MAX_TOKENS", default_value_t = 1000)]
    pub openai_max_tokens: u32,

    #[arg(long, env = "APPLE_CLIENT_ID")]
    pub apple_client_id: String,

    #[arg(long, env = "APPLE_TEAM_ID")]
    pub apple_team_id: String,

    #[arg(long, env = "APPLE_KEY_ID")]
    pub apple_key_id: String,

    // PEM contents of the Sign in with Apple key
    #[arg(long, env = "APPLE_PRIVATE_KEY", hide_env_values = true)]
    pub apple_private_key: String,

    // JSON file with prompt overrides
    #[arg(long, env = "PROMPTS_FILE")]
    pub prompts: Option<PathBuf>,
}

impl Args {
    // never zero, the limiter and the idle sweeper both need a real period
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window.max(1))
    }

    pub fn idle_after(&self) -> Duration {
        self.rate_window() * self.idle_factor.max(1)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn exempt_prefixes(&self) -> Vec<String> {
        self.exempt_paths
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn supabase(&self) -> SupabaseConfig {
        SupabaseConfig {
            url: self.supabase_url.clone(),
            key: self.supabase_key.clone(),
            account_table: self.account_table.clone(),
            usage_table: self.usage_table.clone(),
        }
    }

    pub fn apple(&self) -> AppleConfig {
        AppleConfig {
            client_id: self.apple_client_id.clone(),
            team_id: self.apple_team_id.clone(),
            key_id: self.apple_key_id.clone(),
            private_key: self.apple_private_key.clone(),
        }
    }

    pub fn load_prompts(&self) -> Result<EventPrompts, ConfigError> {
        match &self.prompts {
            Some(path) => EventPrompts::from_file(path),
            None => Ok(EventPrompts::default()),
        }
    }
}

/// Prompt fragments used to build inference requests.
///
/// Missing keys in a prompts file fall back to the built-in text.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventPrompts {
    pub event_timeline_details: String,
    pub event_time: String,
    pub event_input_message: String,
    pub event_system_instruction: String,
    pub event_system_response: String,

    pub search_history: String,
    pub search_text: String,
    pub search_system_instruction: String,
    pub search_system_response: String,
}

impl Default for EventPrompts {
    fn default() -> Self {
        Self {
            event_timeline_details: "Timeline so far".into(),
            event_time: "Event time".into(),
            event_input_message: "User note".into(),
            event_system_instruction: "You turn a photo and a short note into a timeline entry.".into(),
            event_system_response: "Reply with a single JSON object and nothing else.".into(),
            search_history: "Timeline history".into(),
            search_text: "Search query".into(),
            search_system_instruction: "You search a personal timeline for matching events.".into(),
            search_system_response: "Reply with a single JSON object and nothing else.".into(),
        }
    }
}

impl EventPrompts {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
