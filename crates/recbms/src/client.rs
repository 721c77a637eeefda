//! High-level BMS client.
//!
//! [`RecBms`] owns the correlation engine task, the broadcast event channel,
//! the command catalog, and the poller lifecycle. It is the type applications
//! hold; construction goes through [`RecBmsBuilder`](crate::builder::RecBmsBuilder).
//!
//! # Example
//!
//! ```no_run
//! use recbms::RecBms;
//!
//! # async fn example() -> Result<(), recbms_core::Error> {
//! let mut bms = RecBms::builder()
//!     .port_name("/dev/ttyUSB0")
//!     .target_address(2)
//!     .build()
//!     .await?;
//!
//! println!("connected to BMS {}", bms.identify().await?);
//!
//! let frames = bms.command("BVOL").await?;
//! println!("pack voltage: {}", frames[0].payload_text());
//!
//! bms.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use recbms_core::error::{Error, Result};
use recbms_core::transport::Transport;

use crate::builder::RecBmsBuilder;
use crate::catalog::{Catalog, ParsedResponse, ResolvedCatalog};
use crate::engine::{
    spawn_engine, EngineCommander, EngineConfig, EngineHandle, ExchangeSpec, LinkStats,
    DEFAULT_EXPECTED_FRAMES, DEFAULT_TIMEOUT,
};
use crate::events::BmsEvent;
use crate::frame::Frame;
use crate::poller::{spawn_poller, PollerHandle};

/// Capacity of the broadcast event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The result of an operator-submitted command line.
///
/// Carries the parsed response (when a parser was bound for the tag) plus a
/// hex dump of each raw response frame for diagnostics.
#[derive(Debug, Clone)]
pub struct OperatorResponse {
    /// The command tag, query suffix removed.
    pub tag: String,
    /// Whether a response was expected (the first token ended with `?`).
    pub expected_response: bool,
    /// The parsed response, if a parser was bound and produced data.
    pub response: Option<ParsedResponse>,
    /// Hex dump of each raw response frame, in arrival order.
    pub frames_hex: Vec<String>,
}

/// An open connection to a REC Active BMS.
pub struct RecBms {
    engine: EngineHandle,
    commander: EngineCommander,
    event_tx: broadcast::Sender<BmsEvent>,
    catalog: Catalog,
    resolved: Option<ResolvedCatalog>,
    poller: Option<PollerHandle>,
    poll_interval: Duration,
}

impl RecBms {
    /// Start configuring a connection.
    pub fn builder() -> RecBmsBuilder {
        RecBmsBuilder::new()
    }

    /// Assemble a client around an already-open transport.
    ///
    /// Used by the builder; tests reach it through
    /// [`RecBmsBuilder::build_with_transport`](crate::builder::RecBmsBuilder::build_with_transport).
    pub(crate) fn from_parts(
        transport: Box<dyn Transport>,
        target_address: u8,
        catalog: Catalog,
        resolved: Option<ResolvedCatalog>,
        poll_interval: Duration,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let engine = spawn_engine(transport, EngineConfig { target_address }, event_tx.clone());
        let commander = engine.commander();
        RecBms {
            engine,
            commander,
            event_tx,
            catalog,
            resolved,
            poller: None,
            poll_interval,
        }
    }

    /// Subscribe to the event stream.
    ///
    /// Each receiver sees telemetry and unsolicited-frame events published
    /// after it subscribed; slow consumers may lag and miss events.
    pub fn subscribe(&self) -> broadcast::Receiver<BmsEvent> {
        self.event_tx.subscribe()
    }

    /// The command catalog this client was configured with.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Issue a cataloged command and return its response frames.
    pub async fn command(&self, tag: &str) -> Result<Vec<Frame>> {
        let entry = self
            .catalog
            .get(tag)
            .ok_or_else(|| Error::UnknownTag(tag.to_string()))?;
        self.commander.exchange(ExchangeSpec::from_entry(entry)).await
    }

    /// Issue a literal command line with an explicit expectation.
    pub async fn command_raw(
        &self,
        command: &str,
        expected_frames: usize,
        timeout: Duration,
    ) -> Result<Vec<Frame>> {
        self.commander
            .exchange(ExchangeSpec::raw(command, expected_frames, timeout))
            .await
    }

    /// Transmit a command line without waiting for a response.
    pub async fn send_without_response(&self, command: &str) -> Result<()> {
        self.commander.send_only(command.as_bytes().to_vec()).await
    }

    /// Execute an operator-submitted command line.
    ///
    /// A first token ending in `?` marks a query: the line is transmitted
    /// expecting one response frame under the default timeout, and the
    /// tag's bound parser (when one is configured) interprets the frames.
    /// Any other line is sent fire-and-forget. The tag must exist in the
    /// catalog.
    pub async fn operator_command(&self, line: &str) -> Result<OperatorResponse> {
        let first = line
            .split_whitespace()
            .next()
            .ok_or_else(|| Error::InvalidParameter("empty command line".to_string()))?;
        let expects_response = first.ends_with('?');
        let tag = first.trim_end_matches('?');

        if self.catalog.get(tag).is_none() {
            return Err(Error::UnknownTag(tag.to_string()));
        }

        if !expects_response {
            debug!(tag = %tag, "operator command, no response expected");
            self.send_without_response(line).await?;
            return Ok(OperatorResponse {
                tag: tag.to_string(),
                expected_response: false,
                response: None,
                frames_hex: Vec::new(),
            });
        }

        let frames = self
            .command_raw(line, DEFAULT_EXPECTED_FRAMES, DEFAULT_TIMEOUT)
            .await?;

        let response = self
            .resolved
            .as_ref()
            .and_then(|resolved| resolved.get(tag))
            .and_then(|bound| bound.parser.parse(&frames));

        let mut frames_hex = Vec::with_capacity(frames.len());
        for frame in &frames {
            frames_hex.push(hex::encode(frame.to_wire()?));
        }

        Ok(OperatorResponse {
            tag: tag.to_string(),
            expected_response: true,
            response,
            frames_hex,
        })
    }

    /// Read the device serial number (`SERI` query).
    pub async fn identify(&self) -> Result<String> {
        let frames = match self.catalog.get("SERI") {
            Some(entry) => self.commander.exchange(ExchangeSpec::from_entry(entry)).await?,
            None => {
                self.commander
                    .exchange(ExchangeSpec::raw(
                        "SERI?",
                        DEFAULT_EXPECTED_FRAMES,
                        DEFAULT_TIMEOUT,
                    ))
                    .await?
            }
        };
        Ok(frames
            .first()
            .map(|f| f.payload_text())
            .unwrap_or_default())
    }

    /// Snapshot the link counters.
    pub async fn link_stats(&self) -> Result<LinkStats> {
        self.commander.link_stats().await
    }

    /// Whether the poller is currently running.
    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    /// Start round-robin telemetry polling.
    ///
    /// Requires a parser registry configured at build time (the poller
    /// needs every entry's parser bound). Starting twice is an error.
    pub fn start_polling(&mut self) -> Result<()> {
        if self.poller.is_some() {
            return Err(Error::InvalidParameter(
                "poller already running".to_string(),
            ));
        }
        let resolved = self.resolved.clone().ok_or_else(|| {
            Error::InvalidParameter(
                "polling requires a parser registry at build time".to_string(),
            )
        })?;
        let handle = spawn_poller(
            self.commander.clone(),
            resolved,
            self.event_tx.clone(),
            self.poll_interval,
        )?;
        self.poller = Some(handle);
        Ok(())
    }

    /// Stop telemetry polling. A no-op when the poller is not running.
    pub async fn stop_polling(&mut self) -> Result<()> {
        if let Some(poller) = self.poller.take() {
            poller.stop().await?;
        }
        Ok(())
    }

    /// Tear the connection down.
    ///
    /// Stops the poller, fails in-flight and queued commands with
    /// [`Error::ConnectionClosed`], and closes the transport.
    pub async fn close(mut self) -> Result<()> {
        self.stop_polling().await?;
        self.engine.shutdown().await
    }
}
