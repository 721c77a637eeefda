//! Asynchronous BMS event types.
//!
//! Events are emitted through a [`tokio::sync::broadcast`] channel: parsed
//! telemetry from the poller and unsolicited frames from the correlation
//! engine. The downstream delta-mapping collaborator subscribes via
//! [`RecBms::subscribe`](crate::client::RecBms::subscribe).

use crate::catalog::ParsedResponse;
use crate::frame::Frame;

/// An event emitted by the BMS connection.
///
/// Delivery is best-effort through a bounded broadcast channel; slow
/// consumers may miss events under load.
#[derive(Debug, Clone)]
pub enum BmsEvent {
    /// A polled command completed and its response parsed.
    Telemetry {
        /// The catalog tag that produced this reading.
        tag: String,
        /// The parsed response.
        response: ParsedResponse,
    },

    /// A valid frame arrived with no command outstanding (or beyond the
    /// expected count of the current exchange).
    ///
    /// Surfaced for diagnostics and external tooling; the engine otherwise
    /// discards it.
    UnhandledFrame {
        /// The frame as decoded from the wire.
        frame: Frame,
    },
}
