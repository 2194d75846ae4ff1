//! Command interpreter for payloads delivered by the reliable layer.
//!
//! Each delivered payload is a line of text; dispatch is on its first
//! whitespace-delimited token, case-insensitively. Every reply — success or
//! failure — travels back through the issuing peer's reliable channel, never
//! as a bare datagram. Failures become `ERRO:`-prefixed text replies and are
//! never fatal to the session or to the receiver loop.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info};
use shared::{Direction, Pos};

use crate::network::ServerContext;

/// A parsed peer command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login(String),
    Logout,
    Move(Direction),
    Hint,
    Suggest,
}

/// Why a command was rejected. Each variant maps to one reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    NotOnline,
    NameInUse(String),
    AlreadyOnline,
    HintAlreadyUsed,
    SuggestAlreadyUsed,
    NoActiveRound,
    InvalidDirection(String),
    UnknownCommand,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::NotOnline => write!(f, "you must be online to do that."),
            CommandError::NameInUse(name) => write!(f, "name '{}' is already in use.", name),
            CommandError::AlreadyOnline => write!(f, "you are already logged in."),
            CommandError::HintAlreadyUsed => {
                write!(f, "you already used your hint this round.")
            }
            CommandError::SuggestAlreadyUsed => {
                write!(f, "you already used your suggestion this round.")
            }
            CommandError::NoActiveRound => write!(f, "no round in progress."),
            CommandError::InvalidDirection(dir) => {
                write!(f, "'{}' is not a valid direction.", dir)
            }
            CommandError::UnknownCommand => write!(f, "unknown command or bad format."),
        }
    }
}

impl std::error::Error for CommandError {}

impl CommandError {
    /// The wire reply for this failure.
    pub fn reply(&self) -> String {
        format!("ERRO: {}", self)
    }
}

/// Parse one command line. The caller has already rejected empty input.
pub fn parse(input: &str) -> Result<Command, CommandError> {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    let keyword = match tokens.first() {
        Some(first) => first.to_ascii_lowercase(),
        None => return Err(CommandError::UnknownCommand),
    };
    match keyword.as_str() {
        "login" if tokens.len() >= 2 => Ok(Command::Login(tokens[1..].join(" "))),
        "logout" => Ok(Command::Logout),
        "move" if tokens.len() == 2 => match Direction::parse(tokens[1]) {
            Some(dir) => Ok(Command::Move(dir)),
            None => Err(CommandError::InvalidDirection(tokens[1].to_string())),
        },
        "hint" => Ok(Command::Hint),
        "suggest" => Ok(Command::Suggest),
        _ => Err(CommandError::UnknownCommand),
    }
}

/// One-axis clue pointing at the treasure. When the player is off on both
/// axes only the vertical difference is reported.
pub fn hint_text(pos: Pos, treasure: Pos) -> String {
    if treasure.y > pos.y {
        "The treasure is further up.".to_string()
    } else if treasure.y < pos.y {
        "The treasure is further down.".to_string()
    } else if treasure.x > pos.x {
        "The treasure is further right.".to_string()
    } else if treasure.x < pos.x {
        "The treasure is further left.".to_string()
    } else {
        "The treasure is exactly at your position!".to_string()
    }
}

/// Concrete move recommendation along the dominant axis (vertical first),
/// with the remaining distance on that axis.
pub fn suggest_text(pos: Pos, treasure: Pos) -> String {
    let (dir, distance) = if treasure.y != pos.y {
        let dir = if treasure.y > pos.y {
            Direction::Up
        } else {
            Direction::Down
        };
        (dir, (treasure.y - pos.y).abs())
    } else if treasure.x != pos.x {
        let dir = if treasure.x > pos.x {
            Direction::Right
        } else {
            Direction::Left
        };
        (dir, (treasure.x - pos.x).abs())
    } else {
        return "You are already on the treasure!".to_string();
    };
    let unit = if distance == 1 { "cell" } else { "cells" };
    format!(
        "Suggestion: move {} ({} {} along that axis)",
        dir, distance, unit
    )
}

/// Handle one delivered payload from `addr`.
///
/// Runs in its own task: table access is short and lock-scoped, and the
/// reply send (which may wait on ACKs) happens with no lock held.
pub async fn handle(ctx: &Arc<ServerContext>, addr: SocketAddr, text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    let Some(channel) = ctx.sessions.read().await.channel(addr) else {
        return;
    };

    match parse(trimmed) {
        Ok(Command::Login(name)) => {
            let result = ctx.sessions.write().await.login(addr, &name);
            match result {
                Ok(()) => {
                    info!("'{}' logged in from {}", name, addr);
                    ctx.reply(&channel, "you are online!").await;
                    ctx.broadcast(format!(
                        "[Server] {}:{} joined the game.",
                        name,
                        addr.port()
                    ))
                    .await;
                }
                Err(e) => {
                    debug!("login from {} rejected: {}", addr, e);
                    ctx.reply(&channel, &e.reply()).await;
                }
            }
        }
        Ok(Command::Logout) => {
            let result = ctx.sessions.write().await.logout(addr);
            match result {
                Ok(name) => {
                    info!("'{}' logged out from {}", name, addr);
                    ctx.reply(&channel, "logout complete.").await;
                    ctx.broadcast(format!(
                        "[Server] {}:{} left the game.",
                        name,
                        addr.port()
                    ))
                    .await;
                }
                Err(e) => ctx.reply(&channel, &e.reply()).await,
            }
        }
        Ok(Command::Move(dir)) => {
            let result = ctx.sessions.write().await.record_move(addr, dir);
            let reply = match result {
                Ok(()) => format!("Command received: move {}", dir),
                Err(e) => e.reply(),
            };
            ctx.reply(&channel, &reply).await;
        }
        Ok(Command::Hint) => {
            let treasure = ctx.round.read().await.treasure;
            let result = ctx.sessions.write().await.use_hint(addr, treasure);
            let reply = match result {
                Ok((pos, treasure)) => hint_text(pos, treasure),
                Err(e) => e.reply(),
            };
            ctx.reply(&channel, &reply).await;
        }
        Ok(Command::Suggest) => {
            let treasure = ctx.round.read().await.treasure;
            let result = ctx.sessions.write().await.use_suggest(addr, treasure);
            let reply = match result {
                Ok((pos, treasure)) => suggest_text(pos, treasure),
                Err(e) => e.reply(),
            };
            ctx.reply(&channel, &reply).await;
        }
        Err(e) => {
            debug!("bad command from {}: {:?}", addr, trimmed);
            ctx.reply(&channel, &e.reply()).await;
        }
    }
}
