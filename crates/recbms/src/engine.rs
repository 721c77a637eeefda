//! Command/response correlation engine.
//!
//! The engine turns the asynchronous byte stream from the transport into a
//! sequence of completed request/response exchanges. A background task owns
//! the transport and the frame decoder exclusively; callers interact through
//! a cloneable [`EngineCommander`] whose requests are answered over
//! `oneshot` channels.
//!
//! # Exchange lifecycle
//!
//! One exchange: encode the command, transmit it, then accumulate decoded
//! frames until the expected count is reached or the deadline passes. The
//! pending state is a local value of the exchange routine -- there is no
//! shared "active command" slot to race on, and the deadline is checked by
//! the same code that accumulates frames, so a last-instant frame arrival
//! and timer expiry cannot race.
//!
//! # Busy policy
//!
//! Requests queue in the bounded command channel and the task executes
//! exactly one exchange at a time, so at most one command is ever on the
//! wire. A caller issuing while another exchange runs simply waits its
//! turn (FIFO) rather than being rejected or silently clobbering the
//! outstanding request.
//!
//! # Idle traffic
//!
//! Between exchanges the task keeps reading: frames that arrive with no
//! command outstanding are surfaced as
//! [`BmsEvent::UnhandledFrame`] and discarded.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use recbms_core::error::{Error, Result};
use recbms_core::transport::Transport;

use crate::catalog::CatalogEntry;
use crate::decoder::FrameDecoder;
use crate::events::BmsEvent;
use crate::frame::{self, Frame, SENDER_ADDRESS};

/// Capacity of the engine's request queue.
const QUEUE_CAPACITY: usize = 32;

/// How long an idle read waits before the loop re-checks for requests.
const IDLE_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Default expectation for ad-hoc commands issued without a catalog entry.
pub const DEFAULT_EXPECTED_FRAMES: usize = 1;

/// Default deadline for ad-hoc commands issued without a catalog entry.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Parameters of one request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    /// Tag used for logging and timeout reporting.
    pub tag: String,
    /// Command text to frame and transmit.
    pub command: Vec<u8>,
    /// Number of response frames that complete the exchange.
    pub expected_frames: usize,
    /// Deadline measured from transmission.
    pub timeout: Duration,
}

impl ExchangeSpec {
    /// Build a spec from a catalog entry.
    pub fn from_entry(entry: &CatalogEntry) -> Self {
        ExchangeSpec {
            tag: entry.tag.clone(),
            command: entry.command_text().into_bytes(),
            expected_frames: entry.expected_packets as usize,
            timeout: entry.timeout(),
        }
    }

    /// Build a spec for an ad-hoc command line.
    ///
    /// The tag (for error reporting) is the first whitespace-separated
    /// token with any query suffix removed.
    pub fn raw(command: &str, expected_frames: usize, timeout: Duration) -> Self {
        let tag = command
            .split_whitespace()
            .next()
            .unwrap_or(command)
            .trim_end_matches('?')
            .to_string();
        ExchangeSpec {
            tag,
            command: command.as_bytes().to_vec(),
            expected_frames,
            timeout,
        }
    }
}

/// Static configuration for an engine task.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// RS-485 address of the BMS (1-127).
    pub target_address: u8,
}

/// Transmit- and receive-side link counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames transmitted.
    pub frames_sent: u64,
    /// Bytes transmitted (framing included).
    pub bytes_sent: u64,
    /// Structurally complete frames seen, good or bad CRC.
    pub frames_received: u64,
    /// Raw bytes received.
    pub bytes_received: u64,
    /// Received candidates discarded for CRC mismatch.
    pub checksum_failures: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct TxStats {
    frames_sent: u64,
    bytes_sent: u64,
}

/// A request sent from a commander to the engine task.
enum EngineRequest {
    /// Transmit a command and collect its response frames.
    Exchange {
        spec: ExchangeSpec,
        response_tx: oneshot::Sender<Result<Vec<Frame>>>,
    },
    /// Transmit a command fire-and-forget; complete on write result.
    SendOnly {
        command: Vec<u8>,
        response_tx: oneshot::Sender<Result<()>>,
    },
    /// Snapshot the link counters.
    Stats {
        response_tx: oneshot::Sender<LinkStats>,
    },
}

impl EngineRequest {
    /// Fail the request's caller during shutdown.
    fn fail_closed(self) {
        match self {
            EngineRequest::Exchange { response_tx, .. } => {
                let _ = response_tx.send(Err(Error::ConnectionClosed));
            }
            EngineRequest::SendOnly { response_tx, .. } => {
                let _ = response_tx.send(Err(Error::ConnectionClosed));
            }
            EngineRequest::Stats { response_tx } => {
                drop(response_tx);
            }
        }
    }
}

/// Cloneable handle for issuing requests to the engine task.
#[derive(Clone)]
pub struct EngineCommander {
    cmd_tx: mpsc::Sender<EngineRequest>,
}

impl EngineCommander {
    /// Run one request/response exchange to completion.
    ///
    /// Returns the ordered response frames, or the first error among
    /// encode failure, transmit failure, timeout, and connection teardown.
    pub async fn exchange(&self, spec: ExchangeSpec) -> Result<Vec<Frame>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineRequest::Exchange { spec, response_tx })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        response_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Transmit a command without expecting a response.
    ///
    /// Completes on write success or failure; no pending exchange is
    /// created.
    pub async fn send_only(&self, command: Vec<u8>) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineRequest::SendOnly {
                command,
                response_tx,
            })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        response_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Snapshot the link counters.
    pub async fn link_stats(&self) -> Result<LinkStats> {
        let (response_tx, response_rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineRequest::Stats { response_tx })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        response_rx.await.map_err(|_| Error::ConnectionClosed)
    }
}

/// Owning handle to a running engine task.
pub struct EngineHandle {
    commander: EngineCommander,
    cancel: CancellationToken,
    task: JoinHandle<Box<dyn Transport>>,
}

impl EngineHandle {
    /// A cloneable commander for this engine.
    pub fn commander(&self) -> EngineCommander {
        self.commander.clone()
    }

    /// Stop the engine task and close the transport.
    ///
    /// The in-flight exchange (if any) and all queued requests fail with
    /// [`Error::ConnectionClosed`]; they do not linger until their own
    /// timeouts.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        let mut transport = self
            .task
            .await
            .map_err(|e| Error::Transport(format!("engine task panicked: {e}")))?;
        transport.close().await
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the engine task.
///
/// The task owns `transport` and the frame decoder exclusively. Requests
/// arrive through the returned handle's commander; unsolicited frames are
/// published on `event_tx`.
pub fn spawn_engine(
    transport: Box<dyn Transport>,
    config: EngineConfig,
    event_tx: broadcast::Sender<BmsEvent>,
) -> EngineHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel::<EngineRequest>(QUEUE_CAPACITY);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(engine_loop(
        transport,
        config,
        event_tx,
        cmd_rx,
        cancel.clone(),
    ));

    EngineHandle {
        commander: EngineCommander { cmd_tx },
        cancel,
        task,
    }
}

// ---------------------------------------------------------------------------
// Engine loop
// ---------------------------------------------------------------------------

/// The main loop of the engine task.
///
/// Uses `tokio::select! { biased; }` to prioritize cancellation, then
/// request handling, over idle reads. Returns the transport so shutdown
/// can close it.
async fn engine_loop(
    mut transport: Box<dyn Transport>,
    config: EngineConfig,
    event_tx: broadcast::Sender<BmsEvent>,
    mut cmd_rx: mpsc::Receiver<EngineRequest>,
    cancel: CancellationToken,
) -> Box<dyn Transport> {
    let mut decoder = FrameDecoder::new();
    let mut tx_stats = TxStats::default();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("engine cancelled, draining queued requests");
                cmd_rx.close();
                while let Ok(request) = cmd_rx.try_recv() {
                    request.fail_closed();
                }
                break;
            }

            request = cmd_rx.recv() => {
                match request {
                    Some(EngineRequest::Exchange { spec, response_tx }) => {
                        let result = run_exchange(
                            &mut *transport,
                            &mut decoder,
                            &config,
                            &mut tx_stats,
                            &event_tx,
                            &spec,
                            &cancel,
                        )
                        .await;
                        let _ = response_tx.send(result);
                    }
                    Some(EngineRequest::SendOnly { command, response_tx }) => {
                        let result =
                            send_framed(&mut *transport, &config, &mut tx_stats, &command).await;
                        let _ = response_tx.send(result);
                    }
                    Some(EngineRequest::Stats { response_tx }) => {
                        let rx = decoder.stats();
                        let _ = response_tx.send(LinkStats {
                            frames_sent: tx_stats.frames_sent,
                            bytes_sent: tx_stats.bytes_sent,
                            frames_received: rx.frames_received,
                            bytes_received: rx.bytes_received,
                            checksum_failures: rx.checksum_failures,
                        });
                    }
                    None => {
                        // All commanders dropped -- the client went away.
                        debug!("engine command channel closed, exiting");
                        break;
                    }
                }
            }

            // Idle: keep draining the line so unsolicited traffic and late
            // responses cannot pollute the next exchange.
            _ = async {
                let mut buf = [0u8; 256];
                match transport.receive(&mut buf, IDLE_READ_TIMEOUT).await {
                    Ok(n) if n > 0 => {
                        for frame in decoder.push(&buf[..n]) {
                            debug!(
                                target_addr = frame.target,
                                payload = %frame.payload_text(),
                                "unsolicited frame"
                            );
                            let _ = event_tx.send(BmsEvent::UnhandledFrame { frame });
                        }
                    }
                    _ => {
                        // Timeout or transient error; back off briefly.
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            } => {}
        }
    }

    transport
}

/// Frame a command and transmit it, updating the transmit counters.
async fn send_framed(
    transport: &mut dyn Transport,
    config: &EngineConfig,
    tx_stats: &mut TxStats,
    command: &[u8],
) -> Result<()> {
    let wire = frame::encode_command(config.target_address, SENDER_ADDRESS, command)?;
    trace!(data = %hex::encode(&wire), "transmitting frame");
    transport.send(&wire).await?;
    tx_stats.frames_sent += 1;
    tx_stats.bytes_sent += wire.len() as u64;
    Ok(())
}

/// Run one exchange: transmit, then accumulate frames until complete or
/// the deadline passes.
async fn run_exchange(
    transport: &mut dyn Transport,
    decoder: &mut FrameDecoder,
    config: &EngineConfig,
    tx_stats: &mut TxStats,
    event_tx: &broadcast::Sender<BmsEvent>,
    spec: &ExchangeSpec,
    cancel: &CancellationToken,
) -> Result<Vec<Frame>> {
    debug!(
        tag = %spec.tag,
        expected = spec.expected_frames,
        timeout_ms = spec.timeout.as_millis() as u64,
        "issuing command"
    );

    send_framed(transport, config, tx_stats, &spec.command).await?;

    let started = Instant::now();
    let deadline = started + spec.timeout;
    let mut received: Vec<Frame> = Vec::with_capacity(spec.expected_frames);
    let mut buf = [0u8; 256];

    loop {
        let now = Instant::now();
        if now >= deadline {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            debug!(tag = %spec.tag, elapsed_ms, "command timed out");
            return Err(Error::CommandTimeout {
                tag: spec.tag.clone(),
                elapsed_ms,
            });
        }
        let remaining = deadline - now;

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                return Err(Error::ConnectionClosed);
            }

            result = transport.receive(&mut buf, remaining) => match result {
                Ok(n) => {
                    for frame in decoder.push(&buf[..n]) {
                        if received.len() < spec.expected_frames {
                            received.push(frame);
                        } else {
                            // Extra frames in the same read burst are not
                            // part of this exchange.
                            let _ = event_tx.send(BmsEvent::UnhandledFrame { frame });
                        }
                    }
                    if received.len() == spec.expected_frames {
                        debug!(
                            tag = %spec.tag,
                            frames = received.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "command complete"
                        );
                        return Ok(received);
                    }
                }
                // Transport-level timeout: the loop re-checks the deadline.
                Err(Error::Timeout) => {}
                Err(e) => return Err(e),
            }
        }
    }
}
