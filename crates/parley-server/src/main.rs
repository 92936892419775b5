mod cleanup;
mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::AppStateInner;
use parley_db::Database;
use parley_gateway::{Dispatcher, GatewayContext, handle_connection};

use crate::config::Config;

const STORY_PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let dispatcher = Dispatcher::new();
    let app_state = Arc::new(AppStateInner::new(
        db.clone(),
        config.jwt_secret.clone(),
        dispatcher.clone(),
        config.upload_dir.clone(),
        config.story_ttl,
    )?);

    let gateway = GatewayContext {
        dispatcher,
        db: db.clone(),
        jwt_secret: config.jwt_secret.clone(),
    };
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway);

    tokio::spawn(cleanup::run_story_purge(db, STORY_PURGE_INTERVAL));

    let app = parley_api::router(app_state)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Parley server listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(ctx): State<GatewayContext>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, ctx))
}
