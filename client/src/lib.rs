//! # Treasure Hunt Client Library
//!
//! Console peer for the reliable-UDP treasure hunt. The client keeps one
//! stop-and-wait channel toward the server: commands typed at the prompt are
//! retransmitted until acknowledged, and every server message (reply or
//! round broadcast) is acknowledged and printed exactly once.

pub mod network;
