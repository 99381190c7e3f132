//! Send one message to a running relay.
//!
//! Usage: cargo run --example send_message -- 127.0.0.1:7725 shake_alarm 12345 "update 1"

use clap::Parser;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Parser)]
struct Cli {
    /// Relay address.
    addr: SocketAddr,
    /// `shake_alarm`, `shake_cancel`, or anything else to exercise rejection.
    action: String,
    /// Event id.
    event_id: String,
    /// Trailing text; the relay requires it but ignores it.
    #[arg(default_value = "smoke")]
    remainder: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let line = format!("{} {} {}\n", cli.action, cli.event_id, cli.remainder);

    let mut stream = TcpStream::connect(cli.addr).await?;
    stream.write_all(line.as_bytes()).await?;
    stream.shutdown().await?;

    // The relay closes without replying once it has the message.
    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).await.unwrap_or(0);
    println!("sent {:?}, relay closed ({} bytes back)", line.trim_end(), n);
    Ok(())
}
