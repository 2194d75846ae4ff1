use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use client::network::Client;
use shared::channel::RetryPolicy;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address to connect to
    #[clap(short, long, default_value = "127.0.0.1:5000")]
    server: String,
    /// Retransmission timeout in milliseconds
    #[clap(long, default_value_t = 2000)]
    ack_timeout_ms: u64,
    /// Cap retransmissions per command (default: retry forever)
    #[clap(long)]
    max_retries: Option<u32>,
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let server_addr: SocketAddr = args.server.parse()?;
    let policy = match args.max_retries {
        Some(n) => RetryPolicy::Bounded(n),
        None => RetryPolicy::Unbounded,
    };

    let client = Client::connect(server_addr, Duration::from_millis(args.ack_timeout_ms)).await?;
    println!(
        "Connected from {} to server {}.",
        client.local_addr()?,
        server_addr
    );
    println!("Commands: login <name>, logout, move <up/down/left/right>, hint, suggest");
    println!("Type 'exit' to quit.");

    // Server messages land asynchronously; print them above a fresh prompt.
    let _receiver = client.spawn_receiver(|message| {
        print!("\n{}\n", message);
        prompt();
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if command == "exit" {
            break;
        }
        if let Err(e) = client.send_command(command, policy).await {
            eprintln!("Could not deliver '{}': {}", command, e);
        }
    }

    println!("Client stopped.");
    Ok(())
}
