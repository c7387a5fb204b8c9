use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use tetatet_gateway::connection;
use tetatet_gateway::dispatcher::Dispatcher;
use tetatet_gateway::registry::ConnectionRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tetatet=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("TETATET_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("TETATET_DB_PATH").unwrap_or_else(|_| "tetatet.db".into());
    let host = std::env::var("TETATET_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("TETATET_PORT")
        .unwrap_or_else(|_| "9090".into())
        .parse()?;

    // Init database
    let store = Arc::new(tetatet_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Dispatcher::new(store, registry, &jwt_secret);

    let app = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(dispatcher)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("tetatet server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(dispatcher): State<Dispatcher>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, dispatcher))
}
