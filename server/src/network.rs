//! Server network layer: socket ownership, the receiver loop, broadcast
//! fan-out, and background task wiring.
//!
//! One long-lived receiver task pulls every inbound datagram off the shared
//! socket and dispatches it: ACK tokens wake the matching channel's sender,
//! fresh payloads spawn a command-handler task. The receiver itself never
//! waits on an acknowledgment, so a slow peer cannot stall other peers'
//! traffic.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use shared::channel::{ReliableChannel, RetryPolicy};
use shared::{codec, DEFAULT_ACK_TIMEOUT, DEFAULT_PORT, DEFAULT_ROUND_TIME, MAX_DATAGRAM};
use tokio::net::UdpSocket;
use tokio::sync::{watch, RwLock};
use tokio::time::interval;

use crate::commands;
use crate::game::{self, RoundState};
use crate::session::SessionTable;

/// Interval between idle-eviction sweeps.
const EVICTION_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Tunables for one server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the UDP socket to.
    pub bind: String,
    /// Length of one game round.
    pub round_time: Duration,
    /// Retransmission timeout for every reliable channel.
    pub ack_timeout: Duration,
    /// Retry policy for direct replies to a peer's command.
    pub reply_policy: RetryPolicy,
    /// Retry policy for broadcast fan-out legs. Bounded, so one unreachable
    /// peer cannot stall the round loop's reporting.
    pub broadcast_policy: RetryPolicy,
    /// Offline sessions silent for longer than this are evicted.
    pub evict_after: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", DEFAULT_PORT),
            round_time: DEFAULT_ROUND_TIME,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            reply_policy: RetryPolicy::Unbounded,
            broadcast_policy: RetryPolicy::Bounded(5),
            evict_after: Duration::from_secs(300),
        }
    }
}

/// Shared state reachable from every task: the socket, the session table,
/// the round singleton, and the shutdown flag.
pub struct ServerContext {
    pub socket: Arc<UdpSocket>,
    pub sessions: RwLock<SessionTable>,
    pub round: RwLock<RoundState>,
    pub config: ServerConfig,
    shutdown: watch::Sender<bool>,
}

impl ServerContext {
    /// A receiver on the shutdown flag, for loops that must exit with the
    /// server.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Flip the shutdown flag; every loop holding a receiver unwinds.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Session row + channel for `addr`, created on first contact.
    pub async fn ensure_channel(&self, addr: SocketAddr) -> Arc<ReliableChannel> {
        let mut sessions = self.sessions.write().await;
        sessions.ensure(addr, || {
            Arc::new(ReliableChannel::new(
                Arc::clone(&self.socket),
                addr,
                self.config.ack_timeout,
            ))
        })
    }

    /// Reliable reply to one peer, using the configured reply policy.
    /// Undeliverable replies are logged, never escalated.
    pub async fn reply(&self, channel: &ReliableChannel, text: &str) {
        if let Err(e) = channel.send(text.as_bytes(), self.config.reply_policy).await {
            warn!("reply to {} undelivered: {}", channel.peer(), e);
        }
    }

    /// Fan `text` out to every online peer.
    ///
    /// The online set is snapshotted under the table lock, then each leg
    /// runs as its own task; this method does not wait for delivery and the
    /// failure of one leg never delays the others.
    pub async fn broadcast(&self, text: String) {
        let channels = self.sessions.read().await.online_channels();
        debug!("broadcasting to {} peer(s): {}", channels.len(), text);
        for channel in channels {
            let text = text.clone();
            let policy = self.config.broadcast_policy;
            tokio::spawn(async move {
                if let Err(e) = channel.send(text.as_bytes(), policy).await {
                    warn!("broadcast to {} failed: {}", channel.peer(), e);
                }
            });
        }
    }
}

/// The game server: binds the socket and runs the receiver loop, the
/// eviction sweep and the round loop until shutdown.
pub struct Server {
    ctx: Arc<ServerContext>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(&config.bind).await?);
        info!("server listening on {}", socket.local_addr()?);

        let (shutdown, _) = watch::channel(false);
        Ok(Server {
            ctx: Arc::new(ServerContext {
                socket,
                sessions: RwLock::new(SessionTable::new()),
                round: RwLock::new(RoundState::new()),
                config,
                shutdown,
            }),
        })
    }

    /// Shared handle for the operator console and for tests.
    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.ctx.socket.local_addr()
    }

    /// Run until shutdown is signalled.
    pub async fn run(self) {
        self.spawn_receiver();
        self.spawn_eviction_sweep();
        game::run_rounds(Arc::clone(&self.ctx)).await;
        info!("server stopped");
    }

    /// Spawns the task that pulls every inbound datagram off the socket.
    fn spawn_receiver(&self) {
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            let mut shutdown = ctx.shutdown_rx();
            let mut buf = [0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    result = ctx.socket.recv_from(&mut buf) => match result {
                        Ok((len, addr)) => handle_datagram(&ctx, addr, &buf[..len]).await,
                        Err(e) => {
                            error!("error receiving datagram: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
            }
            debug!("receiver loop stopped");
        });
    }

    /// Spawns the sweep that reclaims long-idle offline sessions.
    fn spawn_eviction_sweep(&self) {
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            let mut shutdown = ctx.shutdown_rx();
            let mut sweep = interval(EVICTION_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = sweep.tick() => {
                        let evicted = ctx.sessions.write().await.evict_idle(ctx.config.evict_after);
                        for addr in evicted {
                            info!("evicted idle session {}", addr);
                        }
                    }
                }
            }
        });
    }
}

/// Classify and dispatch one inbound datagram.
async fn handle_datagram(ctx: &Arc<ServerContext>, addr: SocketAddr, buf: &[u8]) {
    let channel = ctx.ensure_channel(addr).await;

    // ACK tokens are checked before any data-packet parsing.
    if let Some(bit) = codec::parse_ack(buf) {
        channel.handle_ack(bit);
        return;
    }

    match codec::decode(buf) {
        Err(e) => warn!("dropping packet from {}: {}", addr, e),
        Ok((bit, payload)) => match channel.accept_data(bit, payload).await {
            Ok(Some(payload)) => {
                let text = String::from_utf8_lossy(&payload).into_owned();
                debug!("delivered from {} (seq {}): {}", addr, bit, text);
                let ctx = Arc::clone(ctx);
                tokio::spawn(async move {
                    commands::handle(&ctx, addr, &text).await;
                });
            }
            Ok(None) => {}
            Err(e) => warn!("failed to acknowledge {}: {}", addr, e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_default_config_policies() {
        let config = ServerConfig::default();
        assert_eq!(config.reply_policy, RetryPolicy::Unbounded);
        assert_eq!(config.broadcast_policy, RetryPolicy::Bounded(5));
        assert_eq!(config.ack_timeout, DEFAULT_ACK_TIMEOUT);
    }

    #[tokio::test]
    async fn test_bind_picks_an_ephemeral_port() {
        let server = Server::bind(test_config()).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_ensure_channel_reuses_the_first_contact_row() {
        let server = Server::bind(test_config()).await.unwrap();
        let ctx = server.context();
        let peer: SocketAddr = "127.0.0.1:9300".parse().unwrap();

        let first = ctx.ensure_channel(peer).await;
        let again = ctx.ensure_channel(peer).await;
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(ctx.sessions.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_flag_reaches_subscribers() {
        let server = Server::bind(test_config()).await.unwrap();
        let ctx = server.context();
        let mut rx = ctx.shutdown_rx();

        assert!(!*rx.borrow());
        ctx.signal_shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
