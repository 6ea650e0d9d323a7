//! Progression Node - community progression daemon
//!
//! Hosts one [`progression_engine::Engine`] over RocksDB storage and exposes
//! it to feature modules, clients and operators.
//!
//! # Architecture
//!
//! - **Storage**: RocksDB-backed [`progression_engine::Store`]
//! - **API**: HTTP endpoints for the tree, voting, engagement and the gate
//! - **WebSocket**: live stream of committed progression events
//! - **Scheduler**: closes voting sessions when their window ends
//! - **Admin Socket**: Unix socket for operator overrides (progression-admin CLI)
//!
//! # Example
//!
//! ```no_run
//! use progression_node::{NodeConfig, ProgressionDaemon};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     let daemon = ProgressionDaemon::new(config).await?;
//!     daemon.run().await?;
//!     Ok(())
//! }
//! ```

pub mod admin_socket;
pub mod api;
pub mod config;
pub mod error;
pub mod node;
pub mod scheduler;
pub mod storage;
pub mod ws;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::{AppState, NodeState, ProgressionDaemon};
pub use storage::RocksStore;
pub use ws::BroadcastSink;
