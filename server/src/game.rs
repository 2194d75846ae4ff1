//! Round state machine.
//!
//! A single timer-driven loop advances the game: open a round, sleep out the
//! deadline, resolve every online session's pending move in one pass, report
//! the results, and start over. Peers never drive round transitions — their
//! commands only park state in the session table for the next resolution.
//!
//! The treasure is resampled only between rounds: redrawn after a win,
//! retained across winnerless rounds so the same target stands until someone
//! reaches it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use rand::Rng;
use shared::{Pos, GRID_H, GRID_W, START_POS};
use tokio::time::sleep;

use crate::network::ServerContext;
use crate::session::SessionTable;

/// Process-wide round singleton.
#[derive(Debug, Clone, Copy)]
pub struct RoundState {
    /// Monotonic round counter, starting at 1 for the first open round.
    pub number: u32,
    /// Current target cell; `None` before the first round and right after a
    /// win, which forces a redraw at the next round start.
    pub treasure: Option<Pos>,
}

impl RoundState {
    pub fn new() -> Self {
        Self {
            number: 0,
            treasure: None,
        }
    }
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new()
    }
}

/// Draw a treasure cell uniformly over the grid, excluding the start cell.
pub fn draw_treasure<R: Rng>(rng: &mut R) -> Pos {
    loop {
        let pos = Pos::new(rng.gen_range(1..=GRID_W), rng.gen_range(1..=GRID_H));
        if pos != START_POS {
            return pos;
        }
    }
}

/// Outcome of one resolution pass.
#[derive(Debug)]
pub struct Resolution {
    /// Aggregate "name(x,y)" status of every online peer, post-move.
    pub status: String,
    /// Movement, wall-bounce and elimination report lines.
    pub lines: Vec<String>,
    /// Peers standing on the treasure after their move was applied.
    pub winners: Vec<(SocketAddr, String)>,
}

/// Resolve the round against a consistent view of the table.
///
/// The caller holds the table's write lock, which makes this pass mutually
/// exclusive with concurrent login/logout/move handlers; a move that lands
/// after the pass simply waits for the next round.
pub fn resolve(table: &mut SessionTable, treasure: Pos) -> Resolution {
    let mut lines = Vec::new();
    let mut eliminated = Vec::new();
    let mut winners = Vec::new();

    for addr in table.online_by_name() {
        let Some(session) = table.get_mut(&addr) else {
            continue;
        };
        let name = match &session.name {
            Some(name) => name.clone(),
            None => continue,
        };
        match session.pending_move.take() {
            None => eliminated.push(name.clone()),
            Some(dir) => {
                let next = session.pos.step(dir);
                if next.in_grid() {
                    session.pos = next;
                    lines.push(format!("{} moved to {}.", name, next));
                } else {
                    lines.push(format!(
                        "{}: move {} leaves the grid. Position stays {}.",
                        name, dir, session.pos
                    ));
                }
            }
        }
        if session.pos == treasure {
            winners.push((addr, name));
        }
    }

    if !eliminated.is_empty() {
        lines.push(format!("Eliminated this round: {}.", eliminated.join(", ")));
    }

    let positions: Vec<String> = table
        .online_by_name()
        .into_iter()
        .filter_map(|addr| {
            let session = table.get(&addr)?;
            let name = session.name.as_deref()?;
            Some(format!("{}{}", name, session.pos))
        })
        .collect();
    let status = if positions.is_empty() {
        "Current positions: (none)".to_string()
    } else {
        format!("Current positions: {}", positions.join(", "))
    };

    Resolution {
        status,
        lines,
        winners,
    }
}

/// Scoreboard broadcast line.
pub fn scoreboard_line(entries: &[(String, u32)]) -> String {
    if entries.is_empty() {
        return "Scoreboard: no players yet.".to_string();
    }
    let parts: Vec<String> = entries
        .iter()
        .map(|(name, score)| format!("{}={}", name, score))
        .collect();
    format!("Scoreboard: {}", parts.join(", "))
}

/// Run rounds until shutdown is signalled.
pub async fn run_rounds(ctx: Arc<ServerContext>) {
    let mut shutdown = ctx.shutdown_rx();
    info!("round loop started");
    loop {
        let (number, treasure) = {
            let mut round = ctx.round.write().await;
            round.number += 1;
            let treasure = *round
                .treasure
                .get_or_insert_with(|| draw_treasure(&mut rand::thread_rng()));
            (round.number, treasure)
        };
        ctx.sessions.write().await.begin_round();
        info!("round {} open", number);
        debug!("round {} treasure at {}", number, treasure);
        ctx.broadcast(format!(
            "[Server] Round {} started! Submit your move within {} seconds.",
            number,
            ctx.config.round_time.as_secs()
        ))
        .await;

        tokio::select! {
            _ = sleep(ctx.config.round_time) => {}
            _ = shutdown.changed() => break,
        }

        // Re-read rather than trust the copy from round start; the treasure
        // never changes while a round is open.
        let treasure = match ctx.round.read().await.treasure {
            Some(t) => t,
            None => continue,
        };

        let resolution = {
            let mut table = ctx.sessions.write().await;
            resolve(&mut table, treasure)
        };
        info!(
            "round {} resolved with {} winner(s)",
            number,
            resolution.winners.len()
        );

        ctx.broadcast(format!("[Server] {}", resolution.status)).await;
        for line in &resolution.lines {
            ctx.broadcast(format!("[Server] {}", line)).await;
        }

        let pause = if resolution.winners.is_empty() {
            Duration::from_secs(1)
        } else {
            for (addr, name) in &resolution.winners {
                let total = ctx.sessions.write().await.add_score(name);
                info!("'{}' found the treasure ({} win(s) total)", name, total);
                ctx.broadcast(format!(
                    "[Server] {}:{} found the treasure at {}!",
                    name,
                    addr.port(),
                    treasure
                ))
                .await;
            }
            ctx.round.write().await.treasure = None;
            Duration::from_secs(2)
        };

        let scoreboard = ctx.sessions.read().await.scoreboard();
        ctx.broadcast(format!("[Server] {}", scoreboard_line(&scoreboard)))
            .await;

        tokio::select! {
            _ = sleep(pause) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!("round loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandError;
    use shared::channel::ReliableChannel;
    use shared::Direction;
    use tokio::net::UdpSocket;

    #[test]
    fn test_treasure_never_lands_on_the_start_cell() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let pos = draw_treasure(&mut rng);
            assert_ne!(pos, START_POS);
            assert!(pos.in_grid());
        }
    }

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    async fn table_with_players(names: &[&str]) -> (SessionTable, Vec<SocketAddr>) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let mut table = SessionTable::new();
        let mut addrs = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let a = addr(9100 + i as u16);
            let socket = Arc::clone(&socket);
            table.ensure(a, move || {
                Arc::new(ReliableChannel::new(socket, a, Duration::from_millis(100)))
            });
            table.login(a, name).unwrap();
            addrs.push(a);
        }
        (table, addrs)
    }

    #[tokio::test]
    async fn test_resolve_applies_moves_and_reports_positions() {
        let (mut table, addrs) = table_with_players(&["Ana", "Bob"]).await;
        table.record_move(addrs[0], Direction::Right).unwrap();
        table.record_move(addrs[1], Direction::Up).unwrap();

        let resolution = resolve(&mut table, Pos::new(3, 3));

        assert_eq!(table.get(&addrs[0]).unwrap().pos, Pos::new(2, 1));
        assert_eq!(table.get(&addrs[1]).unwrap().pos, Pos::new(1, 2));
        assert!(resolution.lines.contains(&"Ana moved to (2,1).".to_string()));
        assert!(resolution.lines.contains(&"Bob moved to (1,2).".to_string()));
        assert_eq!(
            resolution.status,
            "Current positions: Ana(2,1), Bob(1,2)"
        );
        assert!(resolution.winners.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_bounces_moves_that_leave_the_grid() {
        let (mut table, addrs) = table_with_players(&["Ana"]).await;
        table.record_move(addrs[0], Direction::Left).unwrap();

        let resolution = resolve(&mut table, Pos::new(3, 3));

        assert_eq!(table.get(&addrs[0]).unwrap().pos, START_POS);
        assert_eq!(
            resolution.lines,
            vec!["Ana: move left leaves the grid. Position stays (1,1).".to_string()]
        );
    }

    #[tokio::test]
    async fn test_resolve_eliminates_silent_players() {
        let (mut table, addrs) = table_with_players(&["Ana", "Bob"]).await;
        table.record_move(addrs[0], Direction::Up).unwrap();
        // Bob submits nothing.

        let resolution = resolve(&mut table, Pos::new(3, 3));

        assert!(resolution
            .lines
            .contains(&"Eliminated this round: Bob.".to_string()));
        assert_eq!(table.get(&addrs[1]).unwrap().pos, START_POS);
    }

    #[tokio::test]
    async fn test_resolve_detects_winners_after_movement() {
        let (mut table, addrs) = table_with_players(&["Ana"]).await;
        table.get_mut(&addrs[0]).unwrap().pos = Pos::new(2, 2);
        table.record_move(addrs[0], Direction::Up).unwrap();

        let resolution = resolve(&mut table, Pos::new(2, 3));

        assert_eq!(resolution.winners, vec![(addrs[0], "Ana".to_string())]);
    }

    #[tokio::test]
    async fn test_resolve_consumes_pending_moves() {
        let (mut table, addrs) = table_with_players(&["Ana"]).await;
        table.record_move(addrs[0], Direction::Up).unwrap();

        resolve(&mut table, Pos::new(3, 3));
        assert_eq!(table.get(&addrs[0]).unwrap().pending_move, None);

        // Without a fresh command the next round eliminates the player.
        let resolution = resolve(&mut table, Pos::new(3, 3));
        assert!(resolution
            .lines
            .contains(&"Eliminated this round: Ana.".to_string()));
    }

    #[tokio::test]
    async fn test_resolve_ignores_offline_sessions() {
        let (mut table, addrs) = table_with_players(&["Ana", "Bob"]).await;
        table.record_move(addrs[1], Direction::Up).unwrap();
        table.logout(addrs[1]).unwrap();

        let resolution = resolve(&mut table, Pos::new(3, 3));

        assert_eq!(resolution.status, "Current positions: Ana(1,1)");
        assert!(!resolution.lines.iter().any(|l| l.contains("Bob")));
        // NotOnline guard stays intact for the logged-out peer.
        assert!(matches!(
            table.record_move(addrs[1], Direction::Up),
            Err(CommandError::NotOnline)
        ));
    }

    #[test]
    fn test_scoreboard_line_formats() {
        assert_eq!(scoreboard_line(&[]), "Scoreboard: no players yet.");
        assert_eq!(
            scoreboard_line(&[("Ana".to_string(), 2), ("Bob".to_string(), 0)]),
            "Scoreboard: Ana=2, Bob=0"
        );
    }
}
