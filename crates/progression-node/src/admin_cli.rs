//! progression-admin CLI tool
//!
//! Operator overrides for a running progression-node.
//!
//! Usage:
//!   progression-admin unlock <node_key> [level]
//!   progression-admin relock <node_key> [level]
//!   progression-admin unlock-all
//!   progression-admin close-session
//!   progression-admin instant-unlock
//!   progression-admin start-voting
//!   progression-admin reset [reason...]
//!   progression-admin status
//!   progression-admin ping

use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

/// Admin command sent over the socket.
#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum AdminCommand {
    Unlock { node_key: String, level: u32 },
    Relock { node_key: String, level: u32 },
    UnlockAll,
    CloseSession,
    InstantUnlock,
    StartVoting,
    Reset { reason: Option<String> },
    Status,
    Ping,
}

/// Response from admin command.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum AdminResponse {
    Ok { message: String },
    Error { error: String },
    Json { value: serde_json::Value },
    Pong,
}

fn print_usage() {
    eprintln!("progression-admin - Operator overrides for the progression engine");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  progression-admin unlock <node_key> [level]   Set a node to a level (default 1)");
    eprintln!("  progression-admin relock <node_key> [level]   Drop a node below a level (default 1)");
    eprintln!("  progression-admin unlock-all                  Unlock every node to max level");
    eprintln!("  progression-admin close-session               Close the open vote now");
    eprintln!("  progression-admin instant-unlock              Unlock the current target now");
    eprintln!("  progression-admin start-voting                Open a vote");
    eprintln!("  progression-admin reset [reason...]           Clear all unlocks");
    eprintln!("  progression-admin status                      Show progression status");
    eprintln!("  progression-admin ping                        Check if daemon is running");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROGRESSION_SOCKET  Path to admin socket (default: ./progression-data/admin.sock)");
}

fn get_socket_path() -> PathBuf {
    std::env::var("PROGRESSION_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./progression-data/admin.sock"))
}

fn send_command(cmd: AdminCommand) -> Result<AdminResponse, String> {
    let socket_path = get_socket_path();

    let mut stream = UnixStream::connect(&socket_path).map_err(|e| {
        format!(
            "Failed to connect to progression-node at {:?}: {}\n\
             Is the progression-node running?",
            socket_path, e
        )
    })?;

    let cmd_json = serde_json::to_string(&cmd).map_err(|e| e.to_string())?;
    writeln!(stream, "{}", cmd_json).map_err(|e| e.to_string())?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .map_err(|e| e.to_string())?;

    serde_json::from_str(&response_line).map_err(|e| format!("Invalid response: {}", e))
}

fn exit_with(message: &str) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

/// `<node_key> [level]` arguments.
fn node_args(args: &[String], command: &str) -> (String, u32) {
    let Some(node_key) = args.get(2) else {
        exit_with(&format!("{} requires a node_key argument", command));
    };
    let level = match args.get(3) {
        Some(raw) => raw
            .parse()
            .unwrap_or_else(|_| exit_with(&format!("invalid level '{}'", raw))),
        None => 1,
    };
    (node_key.clone(), level)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let cmd = match args[1].as_str() {
        "unlock" => {
            let (node_key, level) = node_args(&args, "unlock");
            AdminCommand::Unlock { node_key, level }
        }
        "relock" => {
            let (node_key, level) = node_args(&args, "relock");
            AdminCommand::Relock { node_key, level }
        }
        "unlock-all" => AdminCommand::UnlockAll,
        "close-session" => AdminCommand::CloseSession,
        "instant-unlock" => AdminCommand::InstantUnlock,
        "start-voting" => AdminCommand::StartVoting,
        "reset" => {
            let reason = args[2..].join(" ");
            AdminCommand::Reset {
                reason: (!reason.is_empty()).then_some(reason),
            }
        }
        "status" => AdminCommand::Status,
        "ping" => AdminCommand::Ping,
        "-h" | "--help" | "help" => {
            print_usage();
            std::process::exit(0);
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    };

    match send_command(cmd) {
        Ok(response) => match response {
            AdminResponse::Ok { message } => {
                println!("{}", message);
            }
            AdminResponse::Error { error } => exit_with(&error),
            AdminResponse::Json { value } => {
                let pretty = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                println!("{}", pretty);
            }
            AdminResponse::Pong => {
                println!("pong - progression-node is running");
            }
        },
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
