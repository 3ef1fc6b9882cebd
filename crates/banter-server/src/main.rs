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

use banter_gateway::broadcast::Broadcaster;
use banter_gateway::connection::{self, Gateway};
use banter_gateway::registry::ConnectionRegistry;
use banter_store::EntityStore;
use banter_types::records::TransportConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "banter=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("BANTER_DB_PATH").unwrap_or_else(|_| "banter.db".into());
    let host = std::env::var("BANTER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("BANTER_PORT")
        .unwrap_or_else(|_| "4000".into())
        .parse()?;
    let default_channel =
        std::env::var("BANTER_DEFAULT_CHANNEL").unwrap_or_else(|_| "General".into());
    let public_url = std::env::var("BANTER_PUBLIC_URL")
        .unwrap_or_else(|_| format!("ws://{host}:{port}/gateway"));

    // Init entity store and change-feed broadcaster
    let store = Arc::new(EntityStore::open(&PathBuf::from(&db_path))?);
    let feed = store.subscribe_feed();

    let registry = ConnectionRegistry::new();
    let gateway = Gateway::new(
        store,
        registry,
        default_channel,
        TransportConfig { endpoint: public_url },
    );

    Broadcaster::new(gateway.subscriptions.clone(), gateway.delivery.clone()).start(feed);

    // Routes
    let app = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("banter server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(gateway): State<Gateway>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway))
}
