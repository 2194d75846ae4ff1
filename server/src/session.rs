//! Peer session registry.
//!
//! Every distinct source address that ever reaches the socket gets a
//! [`Session`] row holding its game state and its reliable channel. Rows are
//! created lazily on first contact and survive logout (the protocol never
//! tears a peer down); an idle-eviction sweep reclaims rows that stay
//! offline, see [`SessionTable::evict_idle`].
//!
//! All structural updates go through [`SessionTable`] methods so that the
//! two table invariants hold atomically under the caller's single table-wide
//! lock: at most one *online* session per display name, and an offline
//! session never has a pending round command.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;
use shared::channel::ReliableChannel;
use shared::{Direction, Pos, START_POS};

use crate::commands::CommandError;

/// State for one peer, keyed by its transport address.
#[derive(Debug)]
pub struct Session {
    /// Display name; `None` until the first login from this address.
    pub name: Option<String>,
    /// Whether this peer is currently logged in.
    pub online: bool,
    /// Current cell on the hunt grid.
    pub pos: Pos,
    /// Whether the hint assist was spent this round.
    pub hint_used: bool,
    /// Whether the suggestion assist was spent this round.
    pub suggest_used: bool,
    /// The move submitted for the current round, if any. A later submission
    /// in the same round overwrites an earlier one.
    pub pending_move: Option<Direction>,
    /// Last time any datagram arrived from this address.
    pub last_active: Instant,
    /// The reliable channel toward this peer.
    pub channel: Arc<ReliableChannel>,
}

impl Session {
    fn new(channel: Arc<ReliableChannel>) -> Self {
        Self {
            name: None,
            online: false,
            pos: START_POS,
            hint_used: false,
            suggest_used: false,
            pending_move: None,
            last_active: Instant::now(),
            channel,
        }
    }
}

/// Registry of every peer the server has heard from, plus the scoreboard.
///
/// Scores are keyed by display name rather than address, so a player who
/// logs out and back in (possibly from a different port) keeps their wins.
pub struct SessionTable {
    sessions: HashMap<SocketAddr, Session>,
    scores: HashMap<String, u32>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            scores: HashMap::new(),
        }
    }

    /// Idempotent row creation; also refreshes the activity timestamp.
    ///
    /// Returns the peer's channel either way.
    pub fn ensure(
        &mut self,
        addr: SocketAddr,
        make_channel: impl FnOnce() -> Arc<ReliableChannel>,
    ) -> Arc<ReliableChannel> {
        let session = self.sessions.entry(addr).or_insert_with(|| {
            info!("first contact from {}", addr);
            Session::new(make_channel())
        });
        session.last_active = Instant::now();
        Arc::clone(&session.channel)
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&Session> {
        self.sessions.get(addr)
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut Session> {
        self.sessions.get_mut(addr)
    }

    /// The channel for `addr`, if the peer has ever been seen.
    pub fn channel(&self, addr: SocketAddr) -> Option<Arc<ReliableChannel>> {
        self.sessions.get(&addr).map(|s| Arc::clone(&s.channel))
    }

    /// Log the peer in under `name`, resetting its game state.
    ///
    /// The name must not be held by any online session (serial reuse after a
    /// logout is allowed), and the peer must not already be online.
    pub fn login(&mut self, addr: SocketAddr, name: &str) -> Result<(), CommandError> {
        if self
            .sessions
            .values()
            .any(|s| s.online && s.name.as_deref() == Some(name))
        {
            return Err(CommandError::NameInUse(name.to_string()));
        }
        let session = self.sessions.get_mut(&addr).ok_or(CommandError::NotOnline)?;
        if session.online {
            return Err(CommandError::AlreadyOnline);
        }
        session.name = Some(name.to_string());
        session.online = true;
        session.pos = START_POS;
        session.hint_used = false;
        session.suggest_used = false;
        session.pending_move = None;
        session.last_active = Instant::now();
        self.scores.entry(name.to_string()).or_insert(0);
        Ok(())
    }

    /// Log the peer out. Its name stays reserved in the scoreboard but is
    /// free for other peers to log in under.
    pub fn logout(&mut self, addr: SocketAddr) -> Result<String, CommandError> {
        let session = self.sessions.get_mut(&addr).ok_or(CommandError::NotOnline)?;
        if !session.online {
            return Err(CommandError::NotOnline);
        }
        session.online = false;
        session.pending_move = None;
        Ok(session.name.clone().unwrap_or_else(|| "?".to_string()))
    }

    /// Record the move the peer wants resolved at the end of this round.
    pub fn record_move(&mut self, addr: SocketAddr, dir: Direction) -> Result<(), CommandError> {
        let session = self.sessions.get_mut(&addr).ok_or(CommandError::NotOnline)?;
        if !session.online {
            return Err(CommandError::NotOnline);
        }
        session.pending_move = Some(dir);
        session.last_active = Instant::now();
        Ok(())
    }

    /// Spend the peer's once-per-round hint. Returns the player position and
    /// the treasure cell to compute the clue from.
    ///
    /// When no round is open yet the assist is *not* consumed.
    pub fn use_hint(
        &mut self,
        addr: SocketAddr,
        treasure: Option<Pos>,
    ) -> Result<(Pos, Pos), CommandError> {
        let session = self.sessions.get_mut(&addr).ok_or(CommandError::NotOnline)?;
        if !session.online {
            return Err(CommandError::NotOnline);
        }
        if session.hint_used {
            return Err(CommandError::HintAlreadyUsed);
        }
        let treasure = treasure.ok_or(CommandError::NoActiveRound)?;
        session.hint_used = true;
        Ok((session.pos, treasure))
    }

    /// Spend the peer's once-per-round suggestion. Same contract as
    /// [`use_hint`](Self::use_hint).
    pub fn use_suggest(
        &mut self,
        addr: SocketAddr,
        treasure: Option<Pos>,
    ) -> Result<(Pos, Pos), CommandError> {
        let session = self.sessions.get_mut(&addr).ok_or(CommandError::NotOnline)?;
        if !session.online {
            return Err(CommandError::NotOnline);
        }
        if session.suggest_used {
            return Err(CommandError::SuggestAlreadyUsed);
        }
        let treasure = treasure.ok_or(CommandError::NoActiveRound)?;
        session.suggest_used = true;
        Ok((session.pos, treasure))
    }

    /// Reset every online session's round-scoped state: pending command and
    /// the two assist flags. Called once per round start.
    pub fn begin_round(&mut self) {
        for session in self.sessions.values_mut() {
            if session.online {
                session.pending_move = None;
                session.hint_used = false;
                session.suggest_used = false;
            }
        }
    }

    /// Addresses of all online sessions, ordered by display name so that
    /// round reports come out in a stable order.
    pub fn online_by_name(&self) -> Vec<SocketAddr> {
        let mut online: Vec<(&str, SocketAddr)> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.online)
            .map(|(addr, s)| (s.name.as_deref().unwrap_or(""), *addr))
            .collect();
        online.sort();
        online.into_iter().map(|(_, addr)| addr).collect()
    }

    /// Channels of all online sessions, for broadcast fan-out.
    pub fn online_channels(&self) -> Vec<Arc<ReliableChannel>> {
        self.sessions
            .values()
            .filter(|s| s.online)
            .map(|s| Arc::clone(&s.channel))
            .collect()
    }

    /// Credit a win and return the player's new total.
    pub fn add_score(&mut self, name: &str) -> u32 {
        let score = self.scores.entry(name.to_string()).or_insert(0);
        *score += 1;
        *score
    }

    /// Scoreboard entries, best first, ties by name.
    pub fn scoreboard(&self) -> Vec<(String, u32)> {
        let mut entries: Vec<(String, u32)> = self
            .scores
            .iter()
            .map(|(name, score)| (name.clone(), *score))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    /// Drop sessions that are offline and have been silent longer than
    /// `max_idle`. Online sessions are never evicted here: eviction must not
    /// fabricate a logout.
    pub fn evict_idle(&mut self, max_idle: Duration) -> Vec<SocketAddr> {
        let evicted: Vec<SocketAddr> = self
            .sessions
            .iter()
            .filter(|(_, s)| !s.online && s.last_active.elapsed() > max_idle)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &evicted {
            self.sessions.remove(addr);
        }
        evicted
    }

    /// One line per known peer, for the operator console.
    pub fn console_rows(&self) -> Vec<String> {
        let mut rows: Vec<String> = self
            .sessions
            .iter()
            .map(|(addr, s)| {
                format!(
                    "{} -> name={} online={} pos={} pending={} hint_used={} suggest_used={} idle={}s",
                    addr,
                    s.name.as_deref().unwrap_or("-"),
                    s.online,
                    s.pos,
                    s.pending_move.map(|d| d.as_str()).unwrap_or("-"),
                    s.hint_used,
                    s.suggest_used,
                    s.last_active.elapsed().as_secs(),
                )
            })
            .collect();
        rows.sort();
        rows
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}
