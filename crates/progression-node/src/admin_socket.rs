//! Unix socket server for operator commands.
//!
//! Newline-delimited JSON: one [`AdminCommand`] per line in, one
//! [`AdminResponse`] per line out.

use crate::error::Result;
use progression_engine::Engine;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Admin command sent over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Set a node to a level
    Unlock { node_key: String, level: u32 },
    /// Drop a node below a level
    Relock { node_key: String, level: u32 },
    /// Unlock every node to max level
    UnlockAll,
    /// Close the open vote now
    CloseSession,
    /// Unlock the current target (or vote winner) immediately
    InstantUnlock,
    /// Open a vote when none is running
    StartVoting,
    /// Clear all unlocks
    Reset {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Current progression status
    Status,
    /// Ping (health check)
    Ping,
}

/// Response from admin command.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdminResponse {
    Ok { message: String },
    Error { error: String },
    Json { value: serde_json::Value },
    Pong,
}

impl AdminResponse {
    fn ok(message: impl Into<String>) -> Self {
        AdminResponse::Ok {
            message: message.into(),
        }
    }

    fn error(error: impl ToString) -> Self {
        AdminResponse::Error {
            error: error.to_string(),
        }
    }
}

/// Admin socket server.
pub struct AdminSocket {
    engine: Arc<Engine>,
    socket_path: PathBuf,
}

impl AdminSocket {
    /// Create a new admin socket server.
    pub fn new(engine: Arc<Engine>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            socket_path: socket_path.into(),
        }
    }

    /// Run the admin socket server.
    pub async fn run(&self) -> Result<()> {
        // Remove a stale socket file from a previous run
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Admin socket listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let engine = Arc::clone(&self.engine);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, engine).await {
                            tracing::error!("Admin connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept admin connection: {}", e);
                }
            }
        }
    }

    /// Get the socket path.
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }
}

async fn handle_connection(stream: UnixStream, engine: Arc<Engine>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<AdminCommand>(&line) {
            Ok(cmd) => execute_command(cmd, &engine).await,
            Err(e) => AdminResponse::Error {
                error: format!("Invalid command: {}", e),
            },
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_json.as_bytes()).await?;
        line.clear();
    }

    Ok(())
}

async fn execute_command(cmd: AdminCommand, engine: &Engine) -> AdminResponse {
    tracing::debug!(?cmd, "Admin command");
    match cmd {
        AdminCommand::Unlock { node_key, level } => {
            match engine.admin_unlock(&node_key, level).await {
                Ok(()) => AdminResponse::ok(format!("Unlocked {} to level {}", node_key, level)),
                Err(e) => AdminResponse::error(e),
            }
        }

        AdminCommand::Relock { node_key, level } => {
            match engine.admin_relock(&node_key, level).await {
                Ok(now) => AdminResponse::ok(format!("{} is now at level {}", node_key, now)),
                Err(e) => AdminResponse::error(e),
            }
        }

        AdminCommand::UnlockAll => match engine.admin_unlock_all().await {
            Ok(records) => AdminResponse::ok(format!("Unlocked {} node levels", records.len())),
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::CloseSession => match engine.force_close_session().await {
            Ok(resolution) => match resolution.target {
                Some(target) => AdminResponse::ok(format!(
                    "Closed session {}, targeting {} level {}",
                    resolution.session.id, target.node_key, target.level
                )),
                None => AdminResponse::ok(format!(
                    "Closed session {} without a winner",
                    resolution.session.id
                )),
            },
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::InstantUnlock => match engine.force_instant_unlock().await {
            Ok(record) => AdminResponse::ok(format!(
                "Unlocked {} to level {}",
                record.node_key, record.level
            )),
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::StartVoting => match engine.start_voting().await {
            Ok(session) => AdminResponse::ok(format!(
                "Opened session {} with {} options",
                session.id,
                session.options.len()
            )),
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::Reset { reason } => {
            let reason = reason.unwrap_or_else(|| "operator reset".to_string());
            match engine.reset_progression(&reason).await {
                Ok(()) => AdminResponse::ok("Progression reset"),
                Err(e) => AdminResponse::error(e),
            }
        }

        AdminCommand::Status => match serde_json::to_value(engine.status().await) {
            Ok(value) => AdminResponse::Json { value },
            Err(e) => AdminResponse::error(e),
        },

        AdminCommand::Ping => AdminResponse::Pong,
    }
}
