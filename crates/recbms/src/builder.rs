//! Fluent connection configuration.
//!
//! Defaults match a typical REC installation: `/dev/ttyUSB0` at 115200 baud,
//! BMS address 2, 100 ms polling cadence, the built-in command catalog.
//!
//! # Example
//!
//! ```no_run
//! use recbms::RecBms;
//!
//! # async fn example() -> Result<(), recbms_core::Error> {
//! let bms = RecBms::builder()
//!     .port_name("/dev/ttyUSB1")
//!     .baud_rate(57_600)
//!     .target_address(4)
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use recbms_core::error::{Error, Result};
use recbms_core::transport::Transport;
use recbms_transport::SerialTransport;

use crate::catalog::{Catalog, ParserRegistry, ResolvedCatalog};
use crate::client::RecBms;
use crate::poller::DEFAULT_POLL_INTERVAL;

/// Default serial device.
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Default baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default RS-485 address of the BMS.
pub const DEFAULT_TARGET_ADDRESS: u8 = 2;

/// Builder for [`RecBms`] connections.
#[derive(Debug)]
pub struct RecBmsBuilder {
    port_name: String,
    baud_rate: u32,
    target_address: u8,
    poll_interval: Duration,
    catalog: Catalog,
    registry: Option<ParserRegistry>,
}

impl Default for RecBmsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecBmsBuilder {
    /// A builder with factory-typical defaults.
    pub fn new() -> Self {
        RecBmsBuilder {
            port_name: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            target_address: DEFAULT_TARGET_ADDRESS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            catalog: Catalog::builtin(),
            registry: None,
        }
    }

    /// Serial device path (`/dev/ttyUSB0`, `COM3`, ...).
    pub fn port_name(mut self, port: impl Into<String>) -> Self {
        self.port_name = port.into();
        self
    }

    /// Baud rate. The REC BMS factory setting is 115200.
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// RS-485 address of the BMS (1-127).
    pub fn target_address(mut self, address: u8) -> Self {
        self.target_address = address;
        self
    }

    /// Polling cadence for [`RecBms::start_polling`].
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Replace the built-in command catalog.
    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Parser registry for telemetry polling and operator queries.
    ///
    /// The registry is resolved against the catalog at build time; an
    /// entry without a matching parser fails the build.
    pub fn registry(mut self, registry: ParserRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Open the serial port and start the engine.
    pub async fn build(self) -> Result<RecBms> {
        let transport = SerialTransport::open(&self.port_name, self.baud_rate).await?;
        self.build_with_transport(Box::new(transport))
    }

    /// Start the engine over an already-open transport.
    ///
    /// The seam tests use to substitute a mock transport for the serial
    /// port.
    pub fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<RecBms> {
        if self.target_address == 0 || self.target_address > 127 {
            return Err(Error::InvalidTargetAddress(self.target_address));
        }

        let resolved: Option<ResolvedCatalog> = match &self.registry {
            Some(registry) => Some(registry.resolve(&self.catalog)?),
            None => None,
        };

        Ok(RecBms::from_parts(
            transport,
            self.target_address,
            self.catalog,
            resolved,
            self.poll_interval,
        ))
    }
}
