use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use meshchat::Relay;

#[derive(Parser, Debug)]
#[command(name = "meshchat")]
#[command(author, version, about = "Encrypted flooding chat relay over TCP", long_about = None)]
struct Args {
    /// Address to listen on for inbound peers.
    #[arg(short, long, default_value = "127.0.0.1:0")]
    bind: SocketAddr,

    /// Peer to dial at startup. Repeatable.
    #[arg(short, long = "connect", value_name = "ADDR")]
    connect: Vec<SocketAddr>,

    /// Display name prepended to outgoing messages.
    #[arg(short, long, default_value = "anon")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let (relay, mut deliveries) = Relay::spawn();

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    let local_addr = listener.local_addr()?;
    println!("Listening on {local_addr}");

    let accept_loop = {
        let relay = relay.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let relay = relay.clone();
                        tokio::spawn(async move {
                            match relay.attach(stream, addr.to_string()).await {
                                Ok(id) => info!(%id, peer = %addr, "peer connected"),
                                Err(e) => {
                                    warn!(peer = %addr, error = %e, "inbound connection failed")
                                }
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        })
    };

    for addr in &args.connect {
        let stream = TcpStream::connect(*addr)
            .await
            .with_context(|| format!("failed to dial {addr}"))?;
        let id = relay
            .attach(stream, addr.to_string())
            .await
            .with_context(|| format!("key agreement with {addr} failed"))?;
        println!("Connected to {addr} ({id})");
    }

    tokio::spawn(async move {
        while let Some(delivery) = deliveries.recv().await {
            println!("[from {}] {}", delivery.sender, delivery.text);
        }
    });

    println!("Type messages to send ('/peers' lists connections, 'exit' quits):");
    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();

                if line.is_empty() {
                    continue;
                }
                if line.eq_ignore_ascii_case("exit") {
                    break;
                }
                if line == "/peers" {
                    let peers = relay.peers().await;
                    if peers.is_empty() {
                        println!("No peers connected.");
                    }
                    for (id, label) in peers {
                        println!("  {id} {label}");
                    }
                    continue;
                }

                let text = format!("{}: {}", args.name, line);
                match relay.broadcast(text).await {
                    Ok(_) => println!("Sent: {line}"),
                    Err(e) => warn!(error = %e, "failed to send message"),
                }
            }
        }
    }

    relay.shutdown().await;
    accept_loop.abort();
    Ok(())
}
