use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use roomchat::{db::Repository, hub::Hub, AppState, Config};
use tower_http::cors::CorsLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .from_env_lossy()
                .add_directive("roomchat=info".parse()?),
        )
        .init();

    let config = Config::from_env()?;

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(config.session_inactivity_minutes)));

    let cors = match &config.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>().context("CORS_ORIGIN is not a valid header value")?)
            .allow_credentials(true),
        None => CorsLayer::permissive(),
    };

    let repo = Repository::connect(&config.database_url)
        .await
        .with_context(|| format!("cannot open {}", config.database_url))?;
    let app_state = AppState::new(repo, Arc::new(Hub::new()));

    let app = roomchat::router()
        .with_state(app_state)
        .layer(session_layer)
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
