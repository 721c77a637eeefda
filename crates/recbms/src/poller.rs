//! Round-robin telemetry poller.
//!
//! A background task cycles through a [`ResolvedCatalog`] on a fixed cadence,
//! issuing each entry's command through the correlation engine, running the
//! entry's bound parser over the response frames, and broadcasting
//! [`BmsEvent::Telemetry`] for subscribers.
//!
//! One failing tick never stops the next: command timeouts and parse misses
//! are demoted to debug logs. Ticks use [`MissedTickBehavior::Skip`], so a
//! slow multi-frame exchange delays subsequent issues instead of stacking
//! them; together with the engine's FIFO queue this bounds in-flight work to
//! one command.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use recbms_core::error::{Error, Result};

use crate::catalog::ResolvedCatalog;
use crate::engine::{EngineCommander, ExchangeSpec};
use crate::events::BmsEvent;

/// Default polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Owning handle to a running poller task.
pub struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop the poller promptly.
    ///
    /// An exchange already queued with the engine still runs to completion
    /// there; no further ticks are issued.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|e| Error::Transport(format!("poller task panicked: {e}")))
    }
}

/// Spawn the poller task.
///
/// Cycles through `catalog` in entry order at `interval`, publishing parsed
/// responses on `event_tx`. The catalog must be non-empty.
pub fn spawn_poller(
    commander: EngineCommander,
    catalog: ResolvedCatalog,
    event_tx: broadcast::Sender<BmsEvent>,
    interval: Duration,
) -> Result<PollerHandle> {
    if catalog.is_empty() {
        return Err(Error::InvalidParameter(
            "cannot poll an empty catalog".to_string(),
        ));
    }

    let cancel = CancellationToken::new();
    let task = tokio::spawn(poll_loop(
        commander,
        catalog,
        event_tx,
        interval,
        cancel.clone(),
    ));

    Ok(PollerHandle { cancel, task })
}

async fn poll_loop(
    commander: EngineCommander,
    catalog: ResolvedCatalog,
    event_tx: broadcast::Sender<BmsEvent>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(
        tags = catalog.len(),
        interval_ms = interval.as_millis() as u64,
        "poller started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut next = 0usize;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("poller stopped");
                return;
            }

            _ = ticker.tick() => {
                let resolved = &catalog.entries()[next];
                next = (next + 1) % catalog.len();

                let tag = resolved.entry.tag.clone();
                let spec = ExchangeSpec::from_entry(&resolved.entry);
                match commander.exchange(spec).await {
                    Ok(frames) => match resolved.parser.parse(&frames) {
                        Some(response) => {
                            let _ = event_tx.send(BmsEvent::Telemetry { tag, response });
                        }
                        None => {
                            debug!(tag = %tag, "response carried no publishable data");
                        }
                    },
                    Err(Error::ConnectionClosed) => {
                        // The engine is gone; nothing left to poll.
                        debug!("engine closed, poller exiting");
                        return;
                    }
                    Err(e) => {
                        debug!(tag = %tag, error = %e, "poll tick failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recbms_test_harness::MockTransport;
    use serde_json::json;

    use crate::catalog::{Catalog, CatalogEntry, ParsedResponse, ParserRegistry};
    use crate::engine::{spawn_engine, EngineConfig, EngineHandle};
    use crate::frame::{self, Frame};

    const TARGET: u8 = 2;

    fn request_wire(command: &str) -> Vec<u8> {
        frame::encode_command(TARGET, 0, command.as_bytes()).unwrap()
    }

    fn response_wire(payload: &[u8]) -> Vec<u8> {
        Frame {
            target: 0,
            sender: TARGET,
            payload: payload.to_vec(),
        }
        .to_wire()
        .unwrap()
    }

    fn entry(tag: &str, timeout_ms: u64) -> CatalogEntry {
        CatalogEntry {
            tag: tag.to_string(),
            command: None,
            expected_packets: 1,
            timeout_ms,
            module: "volt".to_string(),
            parser: tag.to_lowercase(),
        }
    }

    fn text_parser(frames: &[Frame]) -> Option<ParsedResponse> {
        let first = frames.first()?;
        Some(ParsedResponse {
            kind: "text".to_string(),
            data: json!({ "text": first.payload_text() }),
        })
    }

    fn resolved(entries: Vec<CatalogEntry>) -> ResolvedCatalog {
        let catalog = Catalog::new(entries).unwrap();
        let mut registry = ParserRegistry::new();
        for e in catalog.entries() {
            registry.register(&e.module, &e.parser, text_parser);
        }
        registry.resolve(&catalog).unwrap()
    }

    fn spawn(mock: MockTransport) -> (EngineHandle, broadcast::Sender<BmsEvent>) {
        let (event_tx, _) = broadcast::channel(64);
        let handle = spawn_engine(
            Box::new(mock),
            EngineConfig {
                target_address: TARGET,
            },
            event_tx.clone(),
        );
        (handle, event_tx)
    }

    async fn next_telemetry(events: &mut broadcast::Receiver<BmsEvent>) -> (String, ParsedResponse) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("no event within deadline")
                .unwrap();
            if let BmsEvent::Telemetry { tag, response } = event {
                return (tag, response);
            }
        }
    }

    #[tokio::test]
    async fn polls_catalog_in_round_robin_order() {
        let mock = MockTransport::new();
        mock.expect(&request_wire("BVOL?"), &response_wire(b"13.42"));
        mock.expect(&request_wire("CMAX?"), &response_wire(b"3.61"));
        mock.expect(&request_wire("BVOL?"), &response_wire(b"13.43"));
        let (engine, event_tx) = spawn(mock);
        let mut events = event_tx.subscribe();

        let poller = spawn_poller(
            engine.commander(),
            resolved(vec![entry("BVOL", 2000), entry("CMAX", 2000)]),
            event_tx,
            Duration::from_millis(10),
        )
        .unwrap();

        let (tag, response) = next_telemetry(&mut events).await;
        assert_eq!(tag, "BVOL");
        assert_eq!(response.data["text"], "13.42");

        let (tag, response) = next_telemetry(&mut events).await;
        assert_eq!(tag, "CMAX");
        assert_eq!(response.data["text"], "3.61");

        // Wrapped around to the first entry again.
        let (tag, response) = next_telemetry(&mut events).await;
        assert_eq!(tag, "BVOL");
        assert_eq!(response.data["text"], "13.43");

        poller.stop().await.unwrap();
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failing_tick_does_not_stop_the_next() {
        let mock = MockTransport::new();
        // First tag times out (no response bytes); second still polls.
        mock.expect(&request_wire("BVOL?"), &[]);
        mock.expect(&request_wire("CMAX?"), &response_wire(b"3.61"));
        let (engine, event_tx) = spawn(mock);
        let mut events = event_tx.subscribe();

        let poller = spawn_poller(
            engine.commander(),
            resolved(vec![entry("BVOL", 50), entry("CMAX", 2000)]),
            event_tx,
            Duration::from_millis(10),
        )
        .unwrap();

        let (tag, response) = next_telemetry(&mut events).await;
        assert_eq!(tag, "CMAX");
        assert_eq!(response.data["text"], "3.61");

        poller.stop().await.unwrap();
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_prompt() {
        let mock = MockTransport::new();
        let inspect = mock.handle();
        mock.expect(&request_wire("BVOL?"), &response_wire(b"13.42"));
        let (engine, event_tx) = spawn(mock);
        let mut events = event_tx.subscribe();

        let poller = spawn_poller(
            engine.commander(),
            resolved(vec![entry("BVOL", 2000)]),
            event_tx,
            Duration::from_millis(10),
        )
        .unwrap();

        // Let the first tick complete, then stop.
        let _ = next_telemetry(&mut events).await;
        poller.stop().await.unwrap();

        let sent_after_stop = inspect.sent_data().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(inspect.sent_data().len(), sent_after_stop);

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn empty_catalog_is_rejected() {
        let mock = MockTransport::new();
        let (engine, event_tx) = spawn(mock);

        let result = spawn_poller(
            engine.commander(),
            resolved(vec![]),
            event_tx,
            Duration::from_millis(10),
        );
        assert!(matches!(
            result.err(),
            Some(Error::InvalidParameter(_))
        ));

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn poller_exits_when_engine_closes() {
        let mock = MockTransport::new();
        mock.expect(&request_wire("BVOL?"), &response_wire(b"13.42"));
        let (engine, event_tx) = spawn(mock);
        let mut events = event_tx.subscribe();

        let poller = spawn_poller(
            engine.commander(),
            resolved(vec![entry("BVOL", 2000)]),
            event_tx,
            Duration::from_millis(10),
        )
        .unwrap();

        let _ = next_telemetry(&mut events).await;
        engine.shutdown().await.unwrap();

        // The next tick observes ConnectionClosed and the task exits on
        // its own; stop() then just joins it.
        poller.stop().await.unwrap();
    }
}
