//! Per-peer alternating-bit stop-and-wait engine.
//!
//! One [`ReliableChannel`] exists per remote peer and multiplexes two
//! independent roles on the same socket:
//!
//! - **Sender role** ([`ReliableChannel::send`]): transmits one data packet,
//!   waits for its ACK, retransmits on timeout. At most one payload is ever
//!   in flight per peer per direction; concurrent callers queue on the
//!   channel's send lock.
//! - **Receiver role** ([`ReliableChannel::handle_ack`] /
//!   [`ReliableChannel::accept_data`]): invoked by the owning socket's
//!   receive loop for every inbound datagram from this peer. ACK tokens wake
//!   the sender; data packets are acknowledged and delivered exactly once,
//!   with duplicates re-acknowledged but suppressed.
//!
//! The send and receive sequence bits are independent one-bit spaces. The
//! receive loop itself never waits on an acknowledgment — only sender tasks
//! do, and each runs as its own unit of work.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;

use crate::codec::{self, SeqBit};

/// How often a send is retried before the peer is declared unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retransmit forever. An unreachable peer blocks its sender task
    /// indefinitely, so this is only appropriate where that task is
    /// expendable (direct replies running in their own task).
    Unbounded,
    /// Give up after this many transmissions and report the peer
    /// unreachable. Broadcast fan-out uses this so one dead peer cannot
    /// stall a round.
    Bounded(u32),
}

/// Failure of a reliable send.
#[derive(Debug)]
pub enum SendError {
    /// A bounded-policy send exhausted its transmissions without an ACK.
    Unacknowledged { attempts: u32 },
    /// The socket itself failed.
    Io(std::io::Error),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Unacknowledged { attempts } => {
                write!(f, "no acknowledgment after {} transmissions", attempts)
            }
            SendError::Io(e) => write!(f, "socket error: {}", e),
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SendError::Io(e) => Some(e),
            SendError::Unacknowledged { .. } => None,
        }
    }
}

impl From<std::io::Error> for SendError {
    fn from(e: std::io::Error) -> Self {
        SendError::Io(e)
    }
}

/// Send-side state: the next bit to use and the ack signals to wait on.
///
/// Lives behind an async mutex that is held for the whole duration of a
/// send, which both protects the bit transition and serializes senders so
/// only one packet is outstanding toward this peer.
struct SendState {
    bit: SeqBit,
    ack_seen: [watch::Receiver<u64>; 2],
}

/// Reliable stop-and-wait channel toward one remote peer.
///
/// Created lazily on first contact with a peer and shared behind an `Arc`
/// between the receive loop and any number of sender tasks.
pub struct ReliableChannel {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    ack_timeout: Duration,
    send: Mutex<SendState>,
    recv_bit: Mutex<SeqBit>,
    acks: [watch::Sender<u64>; 2],
}

impl ReliableChannel {
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr, ack_timeout: Duration) -> Self {
        let (tx0, rx0) = watch::channel(0u64);
        let (tx1, rx1) = watch::channel(0u64);
        Self {
            socket,
            peer,
            ack_timeout,
            send: Mutex::new(SendState {
                bit: SeqBit::Zero,
                ack_seen: [rx0, rx1],
            }),
            recv_bit: Mutex::new(SeqBit::Zero),
            acks: [tx0, tx1],
        }
    }

    /// The remote address this channel delivers to.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Reliably deliver `payload` to the peer.
    ///
    /// Transmits `encode(send_bit, payload)`, waits up to the ack timeout
    /// for the matching ACK, and retransmits the identical packet until the
    /// ACK arrives or `policy` gives up. On success the send bit flips.
    pub async fn send(&self, payload: &[u8], policy: RetryPolicy) -> Result<(), SendError> {
        let mut state = self.send.lock().await;
        let bit = state.bit;
        let idx = bit.index();
        let packet = codec::encode(bit, payload);

        // An ACK that arrived before this send belongs to an older exchange.
        state.ack_seen[idx].borrow_and_update();

        let mut attempts: u32 = 0;
        loop {
            self.socket.send_to(&packet, self.peer).await?;
            attempts += 1;

            match timeout(self.ack_timeout, state.ack_seen[idx].changed()).await {
                Ok(_) => {
                    state.bit = bit.flip();
                    return Ok(());
                }
                Err(_) => {
                    if let RetryPolicy::Bounded(max) = policy {
                        if attempts >= max {
                            warn!(
                                "no ACK{} from {} after {} transmissions, giving up",
                                bit, self.peer, attempts
                            );
                            return Err(SendError::Unacknowledged { attempts });
                        }
                    }
                    debug!(
                        "timeout waiting for ACK{} from {}, retransmitting",
                        bit, self.peer
                    );
                }
            }
        }
    }

    /// Receiver role, ACK path: wake any sender waiting on `bit`.
    pub fn handle_ack(&self, bit: SeqBit) {
        self.acks[bit.index()].send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Receiver role, data path: acknowledge a data packet and decide
    /// whether to deliver it.
    ///
    /// Returns `Some(payload)` exactly once per in-order packet. A packet
    /// carrying the wrong bit means our previous ACK was lost: the previous
    /// bit is re-acknowledged and the payload is suppressed, which is what
    /// makes delivery at-most-once per direction.
    pub async fn accept_data(
        &self,
        bit: SeqBit,
        payload: &[u8],
    ) -> Result<Option<Vec<u8>>, std::io::Error> {
        let (ack_bit, delivery) = {
            let mut expected = self.recv_bit.lock().await;
            if bit == *expected {
                *expected = expected.flip();
                (bit, Some(payload.to_vec()))
            } else {
                debug!(
                    "duplicate data packet (seq {}) from {}, re-acknowledging seq {}",
                    bit,
                    self.peer,
                    expected.flip()
                );
                (expected.flip(), None)
            }
        };
        self.socket
            .send_to(codec::ack_token(ack_bit), self.peer)
            .await?;
        Ok(delivery)
    }
}

impl std::fmt::Debug for ReliableChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableChannel")
            .field("peer", &self.peer)
            .field("ack_timeout", &self.ack_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::JoinHandle;

    async fn socket_pair() -> (Arc<UdpSocket>, Arc<UdpSocket>, SocketAddr, SocketAddr) {
        let a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let b = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();
        (a, b, a_addr, b_addr)
    }

    /// Pump ACK tokens arriving on `socket` into `channel`.
    fn spawn_ack_pump(socket: Arc<UdpSocket>, channel: Arc<ReliableChannel>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            loop {
                let Ok((len, _)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                if let Some(bit) = codec::parse_ack(&buf[..len]) {
                    channel.handle_ack(bit);
                }
            }
        })
    }

    #[tokio::test]
    async fn test_acked_send_completes_and_alternates_bits() {
        let (a, b, a_addr, b_addr) = socket_pair().await;
        let channel = Arc::new(ReliableChannel::new(
            Arc::clone(&a),
            b_addr,
            Duration::from_millis(200),
        ));
        let _pump = spawn_ack_pump(Arc::clone(&a), Arc::clone(&channel));

        // Peer side: receive two packets, check their tags, ACK each.
        let peer = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (len, _) = b.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], b"0|first");
            b.send_to(codec::ack_token(SeqBit::Zero), a_addr)
                .await
                .unwrap();

            let (len, _) = b.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], b"1|second");
            b.send_to(codec::ack_token(SeqBit::One), a_addr)
                .await
                .unwrap();
        });

        channel
            .send(b"first", RetryPolicy::Unbounded)
            .await
            .unwrap();
        channel
            .send(b"second", RetryPolicy::Unbounded)
            .await
            .unwrap();
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_retransmits_identical_packet_until_acked() {
        let (a, b, a_addr, b_addr) = socket_pair().await;
        let channel = Arc::new(ReliableChannel::new(
            Arc::clone(&a),
            b_addr,
            Duration::from_millis(50),
        ));
        let _pump = spawn_ack_pump(Arc::clone(&a), Arc::clone(&channel));

        // Peer side: drop the first two transmissions, ACK the third.
        let peer = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let mut seen = Vec::new();
            for _ in 0..3 {
                let (len, _) = b.recv_from(&mut buf).await.unwrap();
                seen.push(buf[..len].to_vec());
            }
            assert!(seen.iter().all(|p| p == b"0|payload"));
            b.send_to(codec::ack_token(SeqBit::Zero), a_addr)
                .await
                .unwrap();
        });

        channel
            .send(b"payload", RetryPolicy::Unbounded)
            .await
            .unwrap();
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_bounded_policy_reports_unreachable_peer() {
        let (a, _b, _a_addr, b_addr) = socket_pair().await;
        let channel = ReliableChannel::new(Arc::clone(&a), b_addr, Duration::from_millis(30));

        // `_b` never answers.
        let err = channel
            .send(b"anyone there", RetryPolicy::Bounded(3))
            .await
            .unwrap_err();
        match err {
            SendError::Unacknowledged { attempts } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_in_order_data_is_delivered_and_acked() {
        let (a, b, a_addr, _b_addr) = socket_pair().await;
        let channel = ReliableChannel::new(Arc::clone(&b), a_addr, Duration::from_millis(200));

        let delivered = channel.accept_data(SeqBit::Zero, b"hello").await.unwrap();
        assert_eq!(delivered, Some(b"hello".to_vec()));

        let mut buf = [0u8; 64];
        let (len, _) = a.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], codec::ACK0);

        // Next in-order packet carries the flipped bit.
        let delivered = channel.accept_data(SeqBit::One, b"world").await.unwrap();
        assert_eq!(delivered, Some(b"world".to_vec()));
        let (len, _) = a.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], codec::ACK1);
    }

    #[tokio::test]
    async fn test_duplicate_data_is_suppressed_but_reacked() {
        let (a, b, a_addr, _b_addr) = socket_pair().await;
        let channel = ReliableChannel::new(Arc::clone(&b), a_addr, Duration::from_millis(200));
        let mut buf = [0u8; 64];

        let first = channel.accept_data(SeqBit::Zero, b"once").await.unwrap();
        assert_eq!(first, Some(b"once".to_vec()));
        let (len, _) = a.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], codec::ACK0);

        // Replay of the already-acknowledged packet: only the ACK repeats,
        // the payload must not be delivered again.
        for _ in 0..3 {
            let replay = channel.accept_data(SeqBit::Zero, b"once").await.unwrap();
            assert_eq!(replay, None);
            let (len, _) = a.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], codec::ACK0);
        }

        // The channel still accepts the next in-order packet afterwards.
        let second = channel.accept_data(SeqBit::One, b"twice").await.unwrap();
        assert_eq!(second, Some(b"twice".to_vec()));
    }

    #[tokio::test]
    async fn test_send_and_receive_bits_are_independent() {
        let (a, b, a_addr, b_addr) = socket_pair().await;
        let channel = Arc::new(ReliableChannel::new(
            Arc::clone(&a),
            b_addr,
            Duration::from_millis(100),
        ));
        let _pump = spawn_ack_pump(Arc::clone(&a), Arc::clone(&channel));

        // Receive a data packet first; the receive bit flips to 1 while the
        // send bit must still start at 0.
        let delivered = channel.accept_data(SeqBit::Zero, b"inbound").await.unwrap();
        assert_eq!(delivered, Some(b"inbound".to_vec()));

        let peer = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                let (len, _) = b.recv_from(&mut buf).await.unwrap();
                // Skip the ACK our accept_data emitted toward this socket.
                if codec::parse_ack(&buf[..len]).is_some() {
                    continue;
                }
                assert_eq!(&buf[..len], b"0|outbound");
                b.send_to(codec::ack_token(SeqBit::Zero), a_addr)
                    .await
                    .unwrap();
                return;
            }
        });

        channel
            .send(b"outbound", RetryPolicy::Unbounded)
            .await
            .unwrap();
        peer.await.unwrap();
    }
}
