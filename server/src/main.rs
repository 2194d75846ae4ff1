use std::time::Duration;

use clap::Parser;
use log::info;
use server::network::{Server, ServerConfig};
use shared::channel::RetryPolicy;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind the UDP socket to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// UDP port to listen on
    #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Round length in seconds
    #[clap(long, default_value_t = 10)]
    round_secs: u64,
    /// Retransmission timeout in milliseconds
    #[clap(long, default_value_t = 2000)]
    ack_timeout_ms: u64,
    /// Cap retransmissions of direct replies (default: retry forever)
    #[clap(long)]
    max_retries: Option<u32>,
    /// Transmissions attempted per peer for each broadcast message
    #[clap(long, default_value_t = 5)]
    broadcast_retries: u32,
    /// Evict sessions that stay offline and silent for this many seconds
    #[clap(long, default_value_t = 300)]
    evict_after_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig {
        bind: format!("{}:{}", args.host, args.port),
        round_time: Duration::from_secs(args.round_secs),
        ack_timeout: Duration::from_millis(args.ack_timeout_ms),
        reply_policy: match args.max_retries {
            Some(n) => RetryPolicy::Bounded(n),
            None => RetryPolicy::Unbounded,
        },
        broadcast_policy: RetryPolicy::Bounded(args.broadcast_retries),
        evict_after: Duration::from_secs(args.evict_after_secs),
    };

    let server = Server::bind(config).await?;
    let ctx = server.context();
    let server_task = tokio::spawn(server.run());

    // Operator console: reads the session table and scoreboard, and owns
    // shutdown. Peers never reach these commands.
    println!("Operator console ready. Commands: 'quit', 'clients', 'scores'.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "quit" => break,
                    "clients" => {
                        let rows = ctx.sessions.read().await.console_rows();
                        if rows.is_empty() {
                            println!("No peers seen yet.");
                        }
                        for row in rows {
                            println!("{}", row);
                        }
                    }
                    "scores" => {
                        let scoreboard = ctx.sessions.read().await.scoreboard();
                        if scoreboard.is_empty() {
                            println!("No players yet.");
                        }
                        for (name, wins) in scoreboard {
                            println!("{}={}", name, wins);
                        }
                    }
                    "" => {}
                    other => {
                        println!("Unknown command '{}'. Use 'quit', 'clients' or 'scores'.", other);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    info!("shutting down");
    ctx.signal_shutdown();
    let _ = server_task.await;
    Ok(())
}
