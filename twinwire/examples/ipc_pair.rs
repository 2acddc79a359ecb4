//! Two messengers exchanging messages through a shared-memory queue.
//!
//! Run with: `cargo run --example ipc_pair`
//!
//! Set `RUST_LOG=debug` to see per-message traffic.

use std::time::Duration;
use twinwire::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = IpcConfig::new("twinwire-demo")
        .max_queue_size(8)
        .max_message_size(256)
        .max_buffer_size(512);

    let mut producer = Messenger::connect(config.clone()).await?;
    let mut consumer = Messenger::connect(config).await?;

    for i in 0..10 {
        let payload = format!("tick {i}");
        match producer.send("ticks", payload.into_bytes()).await {
            Ok(()) => println!("[Producer] Sent tick {i}"),
            Err(e) if e.kind() == ErrorKind::SendFailed => {
                println!("[Producer] Queue full, draining");
                drain(&mut consumer).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
    drain(&mut consumer).await?;

    match consumer.receive_timeout(Duration::from_millis(50)).await {
        Err(e) if e.kind() == ErrorKind::Timeout => println!("[Consumer] Queue is empty"),
        other => println!("[Consumer] Unexpected: {other:?}"),
    }

    consumer.free().await;
    producer.free().await;
    println!("Done");
    Ok(())
}

async fn drain(consumer: &mut Messenger) -> Result<(), MessengerError> {
    let mut topic = [0u8; 64];
    let mut payload = [0u8; 256];
    loop {
        match consumer.receive_into(&mut topic, &mut payload).await {
            Ok(received) => println!(
                "[Consumer] {}: {}",
                String::from_utf8_lossy(&topic[..received.topic_len]),
                String::from_utf8_lossy(&payload[..received.payload_len])
            ),
            Err(e) if e.is_no_messages() => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}
