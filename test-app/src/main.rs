// recbms test application -- CLI tool for exercising a REC Active BMS over
// a real serial port or a mock transport.
//
// Usage:
//   recbms-test-app --port /dev/ttyUSB0 identify
//   recbms-test-app --port /dev/ttyUSB0 command BVOL
//   recbms-test-app --port /dev/ttyUSB0 raw "CELL?" --expect 5 --timeout-ms 3000
//   recbms-test-app --port /dev/ttyUSB0 send "RAZL 1"
//   recbms-test-app --port /dev/ttyUSB0 operator "BVOL?"
//   recbms-test-app --port /dev/ttyUSB0 poll --duration 30 --tags BVOL,CMAX
//   recbms-test-app --mock identify
//   recbms-test-app list

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use recbms::{BmsEvent, Catalog, Frame, ParsedResponse, ParserRegistry, RecBms};
use recbms_test_harness::MockTransport;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// recbms test application -- exercises the BMS protocol stack from the
/// command line.
#[derive(Parser)]
#[command(name = "recbms-test-app", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyUSB0, COM3).
    #[arg(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baud rate (the REC BMS factory setting is 115200).
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// RS-485 address of the BMS (1-127).
    #[arg(long, default_value_t = 2)]
    address: u8,

    /// Use a mock transport with canned responses instead of a real
    /// serial port. Useful for verifying CLI parsing and wiring without
    /// hardware.
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read the BMS serial number (SERI query).
    Identify,

    /// Issue a cataloged command and print its response frames.
    Command {
        /// Catalog tag (e.g. BVOL, CELL, SERI).
        tag: String,
    },

    /// Transmit a literal command line and wait for responses.
    Raw {
        /// Command line to transmit (e.g. "CMAX?").
        line: String,

        /// Number of response frames that complete the exchange.
        #[arg(long, default_value_t = 1)]
        expect: usize,

        /// Response deadline in milliseconds.
        #[arg(long, default_value_t = 3000)]
        timeout_ms: u64,
    },

    /// Transmit a command line fire-and-forget.
    Send {
        /// Command line to transmit (e.g. "RAZL 1").
        line: String,
    },

    /// Submit a line through the operator endpoint (query vs set decided
    /// by the ? suffix) and print the parsed result plus raw hex.
    Operator {
        /// Command line (e.g. "BVOL?" or "RAZL 1").
        line: String,
    },

    /// Poll the catalog round-robin and print telemetry as it arrives.
    Poll {
        /// Duration in seconds.
        #[arg(long, default_value_t = 10)]
        duration: u64,

        /// Comma-separated tag subset (default: whole catalog).
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Polling cadence in milliseconds.
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
    },

    /// List the built-in command catalog.
    List,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Generic parser used for every catalog entry: publishes each frame's
/// payload as text. Real deployments register field-aware parsers.
fn text_parser(frames: &[Frame]) -> Option<ParsedResponse> {
    let texts: Vec<String> = frames.iter().map(|f| f.payload_text()).collect();
    Some(ParsedResponse {
        kind: "text".to_string(),
        data: json!({ "frames": texts }),
    })
}

fn registry_for(catalog: &Catalog) -> ParserRegistry {
    let mut registry = ParserRegistry::new();
    for entry in catalog.entries() {
        registry.register(&entry.module, &entry.parser, text_parser);
    }
    registry
}

/// Build a canned device response frame (device -> host addressing).
fn mock_response(address: u8, payload: &str) -> Result<Vec<u8>> {
    let frame = Frame {
        target: 0,
        sender: address,
        payload: payload.as_bytes().to_vec(),
    };
    frame.to_wire().context("canned payload too long")
}

/// Load a mock transport with plausible responses for the subcommand about
/// to run, so every CLI path can be exercised without hardware.
fn preload_mock(mock: &MockTransport, cli: &Cli, catalog: &Catalog) -> Result<()> {
    let request = |line: &str| -> Result<Vec<u8>> {
        recbms::frame::encode_command(cli.address, 0, line.as_bytes())
            .context("failed to encode mock expectation")
    };
    let respond_entry = |mock: &MockTransport, tag: &str| -> Result<()> {
        let entry = catalog
            .get(tag)
            .with_context(|| format!("unknown catalog tag {tag}"))?;
        let mut response = Vec::new();
        for i in 0..entry.expected_packets {
            response.extend_from_slice(&mock_response(cli.address, &format!("MOCK-{tag}-{i}"))?);
        }
        mock.expect(&request(&entry.command_text())?, &response);
        Ok(())
    };

    match &cli.command {
        Command::Identify => {
            mock.expect(&request("SERI?")?, &mock_response(cli.address, "2207 00123")?);
        }
        Command::Command { tag } => {
            respond_entry(mock, tag)?;
        }
        Command::Raw { line, expect, .. } => {
            let mut response = Vec::new();
            for i in 0..*expect {
                response.extend_from_slice(&mock_response(cli.address, &format!("MOCK-{i}"))?);
            }
            mock.expect(&request(line)?, &response);
        }
        Command::Send { line } => {
            mock.expect(&request(line)?, &[]);
        }
        Command::Operator { line } => {
            let is_query = line
                .split_whitespace()
                .next()
                .is_some_and(|t| t.ends_with('?'));
            if is_query {
                mock.expect(&request(line)?, &mock_response(cli.address, "MOCK-0")?);
            } else {
                mock.expect(&request(line)?, &[]);
            }
        }
        Command::Poll { .. } => {
            // Enough round-robin cycles to cover the polling window.
            for _ in 0..100 {
                for tag in catalog.tags().map(str::to_string).collect::<Vec<_>>() {
                    respond_entry(mock, &tag)?;
                }
            }
        }
        Command::List => {}
    }
    Ok(())
}

async fn connect(cli: &Cli, catalog: Catalog) -> Result<RecBms> {
    let registry = registry_for(&catalog);
    let interval = match &cli.command {
        Command::Poll { interval_ms, .. } => Duration::from_millis(*interval_ms),
        _ => Duration::from_millis(100),
    };

    let builder = RecBms::builder()
        .port_name(&cli.port)
        .baud_rate(cli.baud)
        .target_address(cli.address)
        .catalog(catalog.clone())
        .registry(registry)
        .poll_interval(interval);

    if cli.mock {
        let mock = MockTransport::new();
        preload_mock(&mock, cli, &catalog)?;
        let bms = builder
            .build_with_transport(Box::new(mock))
            .context("failed to build client with mock transport")?;
        println!("Connected (mock transport)");
        Ok(bms)
    } else {
        let bms = builder
            .build()
            .await
            .with_context(|| format!("failed to open {} at {} baud", cli.port, cli.baud))?;
        println!("Connected to {} at {} baud", cli.port, cli.baud);
        Ok(bms)
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn print_frames(frames: &[Frame]) {
    for (i, frame) in frames.iter().enumerate() {
        println!(
            "  frame {}: sender {:>3}  {:?}",
            i,
            frame.sender,
            frame.payload_text()
        );
    }
}

async fn cmd_identify(bms: &RecBms) -> Result<()> {
    let serial = bms.identify().await?;
    println!("BMS serial number: {serial}");
    Ok(())
}

async fn cmd_command(bms: &RecBms, tag: &str) -> Result<()> {
    let frames = bms.command(tag).await?;
    println!("{} response ({} frames):", tag, frames.len());
    print_frames(&frames);
    Ok(())
}

async fn cmd_raw(bms: &RecBms, line: &str, expect: usize, timeout_ms: u64) -> Result<()> {
    let frames = bms
        .command_raw(line, expect, Duration::from_millis(timeout_ms))
        .await?;
    println!("{:?} response ({} frames):", line, frames.len());
    print_frames(&frames);
    Ok(())
}

async fn cmd_send(bms: &RecBms, line: &str) -> Result<()> {
    bms.send_without_response(line).await?;
    println!("{line:?} sent, no response expected");
    Ok(())
}

async fn cmd_operator(bms: &RecBms, line: &str) -> Result<()> {
    let result = bms.operator_command(line).await?;
    if result.expected_response {
        match &result.response {
            Some(parsed) => println!("{}: {}", result.tag, parsed.data),
            None => println!("{}: (unparsed)", result.tag),
        }
        for dump in &result.frames_hex {
            println!("  raw: {dump}");
        }
    } else {
        println!("{}: sent, no response expected", result.tag);
    }
    Ok(())
}

async fn cmd_poll(bms: &mut RecBms, duration_secs: u64) -> Result<()> {
    let mut events = bms.subscribe();
    bms.start_polling()?;
    println!("Polling for {duration_secs} seconds...\n");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration_secs);
    let mut readings = 0u64;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(BmsEvent::Telemetry { tag, response })) => {
                readings += 1;
                println!("{:<6} {}", tag, response.data);
            }
            Ok(Ok(BmsEvent::UnhandledFrame { frame })) => {
                println!("?????  unsolicited: {}", frame.payload_text());
            }
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(n))) => {
                println!("(missed {n} events due to lag)");
            }
            Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => {
                println!("Event channel closed.");
                break;
            }
            Err(_) => break,
        }
    }

    bms.stop_polling().await?;

    let stats = bms.link_stats().await?;
    println!();
    println!("Results:");
    println!("  Readings:          {readings}");
    println!("  Frames sent:       {}", stats.frames_sent);
    println!("  Frames received:   {}", stats.frames_received);
    println!("  Bytes sent:        {}", stats.bytes_sent);
    println!("  Bytes received:    {}", stats.bytes_received);
    println!("  Checksum failures: {}", stats.checksum_failures);

    Ok(())
}

fn cmd_list(catalog: &Catalog) {
    println!(
        "{:<6}  {:<10}  {:<8}  {:>7}  {:>8}",
        "Tag", "Module", "Parser", "Frames", "Timeout"
    );
    println!(
        "{:<6}  {:<10}  {:<8}  {:>7}  {:>8}",
        "-".repeat(6),
        "-".repeat(10),
        "-".repeat(8),
        "-------",
        "--------",
    );
    for entry in catalog.entries() {
        println!(
            "{:<6}  {:<10}  {:<8}  {:>7}  {:>6} ms",
            entry.tag, entry.module, entry.parser, entry.expected_packets, entry.timeout_ms
        );
    }
    println!();
    println!("{} commands total.", catalog.len());
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.address == 0 || cli.address > 127 {
        bail!("--address must be 1-127 (got {})", cli.address);
    }

    let catalog = match &cli.command {
        Command::Poll { tags, .. } if !tags.is_empty() => {
            let refs: Vec<&str> = tags.iter().map(String::as_str).collect();
            Catalog::builtin().select(&refs)?
        }
        _ => Catalog::builtin(),
    };

    // The `list` command does not require a connection.
    if matches!(&cli.command, Command::List) {
        cmd_list(&catalog);
        return Ok(());
    }

    let mut bms = connect(&cli, catalog).await?;

    let result = match &cli.command {
        Command::Identify => cmd_identify(&bms).await,
        Command::Command { tag } => cmd_command(&bms, tag).await,
        Command::Raw {
            line,
            expect,
            timeout_ms,
        } => cmd_raw(&bms, line, *expect, *timeout_ms).await,
        Command::Send { line } => cmd_send(&bms, line).await,
        Command::Operator { line } => cmd_operator(&bms, line).await,
        Command::Poll { duration, .. } => cmd_poll(&mut bms, *duration).await,
        Command::List => unreachable!("list handled above"),
    };

    bms.close().await.ok();
    result
}
