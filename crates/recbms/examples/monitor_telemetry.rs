//! Continuously poll a REC Active BMS and print telemetry.
//!
//! Demonstrates registering payload parsers, starting the round-robin
//! poller over a narrowed catalog, and consuming the telemetry event
//! stream. This is the shape of a real acquisition daemon, minus the
//! downstream storage.
//!
//! # Requirements
//!
//! - A REC Active BMS on an RS-485 adapter (default `/dev/ttyUSB0`)
//!
//! # Usage
//!
//! ```sh
//! cargo run -p recbms --example monitor_telemetry
//! ```

use std::time::Duration;

use serde_json::json;

use recbms::{BmsEvent, Catalog, Frame, ParsedResponse, ParserRegistry, RecBms};

/// Minimal parser: publish the first frame's payload as text.
///
/// A real deployment registers one parser per catalog entry that knows
/// the payload's field structure.
fn text_parser(frames: &[Frame]) -> Option<ParsedResponse> {
    let first = frames.first()?;
    Some(ParsedResponse {
        kind: "text".to_string(),
        data: json!({ "text": first.payload_text() }),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let serial_port = "/dev/ttyUSB0";

    // Poll a handful of fast single-frame readings.
    let catalog = Catalog::builtin().select(&["BVOL", "CMAX", "CMIN", "IOJA"])?;
    let mut registry = ParserRegistry::new();
    for entry in catalog.entries() {
        registry.register(&entry.module, &entry.parser, text_parser);
    }

    println!("Connecting to BMS on {}...", serial_port);

    let mut bms = RecBms::builder()
        .port_name(serial_port)
        .catalog(catalog)
        .registry(registry)
        .poll_interval(Duration::from_millis(100))
        .build()
        .await?;

    println!("Connected: BMS serial {}\n", bms.identify().await?);

    let mut events = bms.subscribe();
    bms.start_polling()?;
    println!("Polling. Monitoring for 30 seconds...\n");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(BmsEvent::Telemetry { tag, response })) => {
                println!("{:<6} {}", tag, response.data);
            }
            Ok(Ok(BmsEvent::UnhandledFrame { frame })) => {
                println!("?????  unsolicited: {}", frame.payload_text());
            }
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(n))) => {
                println!("(missed {} events due to lag)", n);
            }
            Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => {
                println!("Event channel closed.");
                break;
            }
            Err(_) => {
                // Timeout -- monitoring period elapsed.
                break;
            }
        }
    }

    bms.stop_polling().await?;
    let stats = bms.link_stats().await?;
    println!(
        "\nLink: {} frames sent, {} received, {} checksum failures",
        stats.frames_sent, stats.frames_received, stats.checksum_failures
    );

    bms.close().await?;
    Ok(())
}
