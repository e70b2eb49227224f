use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use chat_memory_server::config::Settings;
use chat_memory_server::services::ChatService;
use chat_memory_server::utils::logger::init_logger;
use chat_memory_server::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    init_logger(&settings.logging)?;
    info!("🚀 Starting chat memory server...");
    info!(
        "✅ Configuration loaded (model={}, summarizer={}, memory_enabled={})",
        settings.llm.model, settings.summarizer.model, settings.memory.enabled
    );

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    let ttl_seconds = settings.memory.conversation_ttl_seconds;
    let cleanup_every = Duration::from_secs(settings.memory.cleanup_interval_seconds.max(1));

    let state = AppState::from_settings(settings)?;
    info!("✅ Services initialized");

    if ttl_seconds > 0 {
        spawn_cleanup(state.chat_service.clone(), cleanup_every);
        info!("✅ Conversation cleanup every {:?} (ttl {}s)", cleanup_every, ttl_seconds);
    }

    let app = build_router(state);

    info!("🎯 Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn spawn_cleanup(chat_service: Arc<ChatService>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            chat_service.cleanup_expired();
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
