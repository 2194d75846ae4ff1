//! Client-side transport: one reliable channel toward the server.
//!
//! The receive loop plays the mirror image of the server's receiver: ACK
//! tokens wake the sender role, data packets are acknowledged and handed to
//! the caller exactly once. Duplicated server messages (our ACK got lost)
//! are re-acknowledged and suppressed, so nothing prints twice.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use shared::channel::{ReliableChannel, RetryPolicy, SendError};
use shared::{codec, MAX_DATAGRAM};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

pub struct Client {
    socket: Arc<UdpSocket>,
    channel: Arc<ReliableChannel>,
}

impl Client {
    /// Bind an ephemeral local port and set up the channel toward `server`.
    ///
    /// No packet is sent yet; the server learns about us on the first
    /// command.
    pub async fn connect(server: SocketAddr, ack_timeout: Duration) -> std::io::Result<Self> {
        let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let channel = Arc::new(ReliableChannel::new(
            Arc::clone(&socket),
            server,
            ack_timeout,
        ));
        Ok(Client { socket, channel })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.channel.peer()
    }

    /// Spawn the receive loop. Each newly delivered server message is passed
    /// to `on_message`; duplicates and ACKs never reach it.
    pub fn spawn_receiver<F>(&self, mut on_message: F) -> JoinHandle<()>
    where
        F: FnMut(String) + Send + 'static,
    {
        let socket = Arc::clone(&self.socket);
        let channel = Arc::clone(&self.channel);
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM];
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        error!("error receiving datagram: {}", e);
                        break;
                    }
                };
                // Only the server talks to us on this socket.
                if from != channel.peer() {
                    continue;
                }
                let data = &buf[..len];
                if let Some(bit) = codec::parse_ack(data) {
                    channel.handle_ack(bit);
                    continue;
                }
                match codec::decode(data) {
                    Err(e) => warn!("dropping packet from server: {}", e),
                    Ok((bit, payload)) => match channel.accept_data(bit, payload).await {
                        Ok(Some(payload)) => {
                            on_message(String::from_utf8_lossy(&payload).into_owned());
                        }
                        Ok(None) => {}
                        Err(e) => warn!("failed to acknowledge server: {}", e),
                    },
                }
            }
        })
    }

    /// Reliably send one command line to the server.
    pub async fn send_command(&self, line: &str, policy: RetryPolicy) -> Result<(), SendError> {
        self.channel.send(line.as_bytes(), policy).await
    }
}
