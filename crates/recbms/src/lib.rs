//! # recbms -- REC Active BMS Serial Telemetry
//!
//! `recbms` is an asynchronous Rust library for talking to REC Active BMS
//! battery management systems over their RS-485 serial protocol. It frames
//! and checksums outbound commands, reassembles and validates the inbound
//! byte stream, correlates multi-frame responses with the commands that
//! caused them, and can poll the whole command catalog on a timer for
//! continuous telemetry.
//!
//! ## Quick Start
//!
//! ```no_run
//! use recbms::RecBms;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bms = RecBms::builder()
//!         .port_name("/dev/ttyUSB0")
//!         .target_address(2)
//!         .build()
//!         .await?;
//!
//!     println!("BMS serial number: {}", bms.identify().await?);
//!
//!     let frames = bms.command("BVOL").await?;
//!     println!("pack voltage: {} V", frames[0].payload_text());
//!
//!     bms.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                 | Purpose                                       |
//! |-----------------------|-----------------------------------------------|
//! | `recbms-core`         | [`Transport`] trait, error types              |
//! | `recbms-transport`    | Serial transport (`tokio-serial`)             |
//! | **`recbms`**          | This crate: framing, decoding, correlation, polling |
//! | `recbms-test-harness` | Mock transport for testing                    |
//!
//! Inside this crate the protocol stack is layered bottom-up:
//!
//! - [`frame`] -- the wire format: delimiters, addresses, CRC-16/ARC.
//! - [`decoder`] -- stream reassembly with checksum and framing recovery.
//! - [`catalog`] -- the command table and typed parser registry.
//! - [`engine`] -- the background task correlating commands with responses.
//! - [`poller`] -- round-robin telemetry acquisition over the catalog.
//! - [`client`] -- [`RecBms`], the handle applications hold.
//!
//! ## Telemetry Subscription
//!
//! Parsed poll results and unsolicited frames arrive through a broadcast
//! channel:
//!
//! ```no_run
//! use recbms::BmsEvent;
//! # async fn example(bms: &recbms::RecBms) {
//! let mut events = bms.subscribe();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         BmsEvent::Telemetry { tag, response } => {
//!             println!("{tag}: {}", response.data);
//!         }
//!         BmsEvent::UnhandledFrame { frame } => {
//!             println!("unexpected: {}", frame.payload_text());
//!         }
//!     }
//! }
//! # }
//! ```

pub mod builder;
pub mod catalog;
pub mod client;
pub mod decoder;
pub mod engine;
pub mod events;
pub mod frame;
pub mod poller;

pub use builder::RecBmsBuilder;
pub use catalog::{
    Catalog, CatalogEntry, ParsedResponse, ParserRegistry, PayloadParser, ResolvedCatalog,
};
pub use client::{OperatorResponse, RecBms};
pub use decoder::{DecoderStats, FrameDecoder};
pub use engine::LinkStats;
pub use events::BmsEvent;
pub use frame::Frame;

pub use recbms_core::error::{Error, Result};
pub use recbms_core::transport::Transport;
