//! Progression daemon - the main application entry point.
//!
//! Architecture:
//! - Single daemon process with one engine over a shared RocksDB store
//! - HTTP API and WebSocket event stream for clients and feature modules
//! - Unix admin socket for local operator commands (progression-admin CLI)
//! - Background scheduler closing expired voting sessions

use crate::admin_socket::AdminSocket;
use crate::api;
use crate::config::NodeConfig;
use crate::error::Result;
use crate::scheduler;
use crate::storage::RocksStore;
use crate::ws::BroadcastSink;
use progression_engine::{Engine, SystemClock};
use progression_tree::load_tree_file;
use std::sync::Arc;

/// State shared by API handlers, the admin socket and the scheduler.
pub struct NodeState {
    pub engine: Arc<Engine>,
    pub sink: BroadcastSink,
    pub config: NodeConfig,
}

pub type AppState = Arc<NodeState>;

/// A running progression daemon.
pub struct ProgressionDaemon {
    state: AppState,
}

impl ProgressionDaemon {
    /// Load the tree, open storage and restore the engine.
    pub async fn new(config: NodeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let catalog = Arc::new(load_tree_file(&config.tree_file)?);
        let store = Arc::new(RocksStore::open(config.db_path())?);
        let sink = BroadcastSink::new();

        let engine = Engine::builder(catalog, store)
            .clock(Arc::new(SystemClock))
            .event_sink(Arc::new(sink.clone()))
            .config(config.engine.clone())
            .open()
            .await?;

        let state = Arc::new(NodeState {
            engine: Arc::new(engine),
            sink,
            config,
        });
        Ok(Self { state })
    }

    /// Get the shared state (for API handlers).
    pub fn state(&self) -> AppState {
        Arc::clone(&self.state)
    }

    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.state.engine)
    }

    /// Run the daemon (admin socket, scheduler, then the HTTP server).
    pub async fn run(self) -> Result<()> {
        let config = &self.state.config;
        tracing::info!("Progression daemon starting");
        tracing::info!("  API: http://{}", config.api_addr);
        tracing::info!("  Admin: {:?}", config.admin_socket);
        tracing::info!("  Data: {:?}", config.data_dir);
        tracing::info!("  Tree: {:?}", config.tree_file);

        let admin_socket = AdminSocket::new(self.engine(), config.admin_socket.clone());
        tokio::spawn(async move {
            if let Err(e) = admin_socket.run().await {
                tracing::error!("Admin socket error: {}", e);
            }
        });

        scheduler::spawn_session_closer(self.engine(), config.session_check_interval);

        let app = api::build_router(self.state());
        let listener = tokio::net::TcpListener::bind(config.api_addr).await?;
        tracing::info!("HTTP server listening on {}", config.api_addr);

        axum::serve(listener, app).await?;

        Ok(())
    }
}
