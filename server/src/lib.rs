//! # Treasure Hunt Server Library
//!
//! Authoritative server for the reliable-UDP treasure hunt. It owns the
//! canonical game state, delivers every peer command exactly once over the
//! alternating-bit transport, and drives the timed round loop that resolves
//! movement and declares winners.
//!
//! ## Core responsibilities
//!
//! ### Reliable delivery per peer
//! Every remote address gets its own stop-and-wait channel
//! (`shared::channel::ReliableChannel`). Replies and broadcasts are
//! retransmitted until acknowledged; duplicate commands are re-acknowledged
//! but never re-executed.
//!
//! ### Session management
//! The [`session`] module tracks every peer ever seen: login/logout with
//! name uniqueness, grid position, per-round assist flags, the pending move
//! for the open round, and the scoreboard. Long-idle offline rows are
//! reclaimed by a background sweep.
//!
//! ### Round progression
//! The [`game`] module runs the single timer-driven loop: open a round,
//! collect commands, resolve movement and wall bounces in one pass, report
//! winners and scores, and redraw the treasure only after a win.
//!
//! ## Architecture
//!
//! One receiver task owns the socket and never blocks on acknowledgment
//! waits; each delivered command and each broadcast leg runs in its own
//! task so an unreachable peer cannot hold anyone else up. The session
//! table sits behind a single table-wide lock; each channel guards its own
//! sequence bits.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     let ctx = server.context();
//!     // `ctx` feeds the operator console; `run` drives everything else.
//!     server.run().await;
//!     drop(ctx);
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod game;
pub mod network;
pub mod session;
