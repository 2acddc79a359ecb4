//! A listening and a connecting messenger exchanging messages over TCP.
//!
//! Run with: `cargo run --example tcp_pair`
//!
//! Set `RUST_LOG=debug` to see per-message traffic.

use std::time::Duration;
use twinwire::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let server_config = TcpConfig::new("127.0.0.1", 9400).mode(TcpMode::Accept);
    let server = tokio::spawn(async move {
        let mut server = Messenger::connect(server_config).await?;
        loop {
            match server.receive_timeout(Duration::from_secs(2)).await {
                Ok(message) => {
                    println!(
                        "[Server] {}: {}",
                        message.topic(),
                        String::from_utf8_lossy(message.payload())
                    );
                    server.send("ack", message.payload().clone()).await?;
                }
                Err(e) if e.kind() == ErrorKind::ReceiveFailed => {
                    println!("[Server] Client disconnected");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        server.free().await;
        Ok::<(), MessengerError>(())
    });

    let client_config = TcpConfig::new("127.0.0.1", 9400).connect_timeout(Duration::from_secs(2));
    let mut client = connect_with_retry(client_config).await?;

    for i in 0..5 {
        client.send("alerts", format!("payload{i}").into_bytes()).await?;
        let ack = client.receive_timeout(Duration::from_secs(2)).await?;
        println!(
            "[Client] {}: {}",
            ack.topic(),
            String::from_utf8_lossy(ack.payload())
        );
    }

    client.free().await;
    server.await??;
    println!("Done");
    Ok(())
}

async fn connect_with_retry(config: TcpConfig) -> Result<Messenger, MessengerError> {
    let mut attempts = 0;
    loop {
        match Messenger::connect(config.clone()).await {
            Ok(messenger) => return Ok(messenger),
            Err(e) if attempts < 20 && e.kind() == ErrorKind::ConnectionFailed => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
