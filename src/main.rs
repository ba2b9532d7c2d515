use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use timemachine_gateway::admission::Admission;
use timemachine_gateway::apple::AppleSignIn;
use timemachine_gateway::auth::TokenVerifier;
use timemachine_gateway::clock::SystemClock;
use timemachine_gateway::config::{Args, ConfigError};
use timemachine_gateway::rate_limit::{SlidingWindowLimiter, idle_sweeper};
use timemachine_gateway::state::AppState;
use timemachine_gateway::supabase::SupabaseClient;
use timemachine_gateway::upstream::{GeminiClient, OpenAiClient};
use timemachine_gateway::usage::StoreUsageSink;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // parse cli arguments
    let args = Args::parse();
    let prompts = args.load_prompts()?;

    // one client for every outbound call, each bounded by the timeout
    let client = reqwest::Client::builder()
        .timeout(args.upstream_timeout())
        .build()?;

    let tokens = Arc::new(TokenVerifier::new(args.jwt_secret.as_bytes()));
    let store = Arc::new(SupabaseClient::new(client.clone(), args.supabase()));

    let limiter = Arc::new(SlidingWindowLimiter::new(
        args.rate_limit,
        args.rate_window(),
        Arc::new(SystemClock),
    ));
    tokio::spawn(idle_sweeper(Arc::clone(&limiter), args.rate_window(), args.idle_after()));

    let admission = Arc::new(Admission::new(
        Arc::clone(&tokens),
        limiter,
        Arc::new(StoreUsageSink::new(store.clone())),
        args.exempt_prefixes(),
    ));

    let state = Arc::new(AppState {
        store,
        identity_provider: Arc::new(AppleSignIn::new(client.clone(), args.apple())),
        event_model: Arc::new(GeminiClient::new(
            client.clone(),
            args.gemini_key.clone(),
            args.gemini_model.clone(),
        )),
        search_model: Arc::new(OpenAiClient::new(
            client,
            args.openai_key.clone(),
            args.openai_model.clone(),
            args.openai_max_tokens,
        )),
        prompts,
        tokens,
        max_upload_bytes: args.max_upload_bytes,
    });

    let app = timemachine_gateway::app(state, admission);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(port = args.port, "gateway listening");
    info!(
        rate_limit = args.rate_limit,
        rate_window = ?args.rate_window(),
        exempt = ?args.exempt_prefixes(),
        "admission configured"
    );
    info!(gemini = %args.gemini_model, openai = %args.openai_model, "inference models");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
