//! Transport trait for BMS communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the battery
//! management system. The production implementation is the serial port
//! transport in `recbms-transport`; tests use the deterministic
//! `MockTransport` from `recbms-test-harness`.
//!
//! The protocol stack (frame decoder, correlation engine) operates on a
//! `Transport` rather than directly on a serial port, so the same engine
//! code runs against real hardware and synthetic byte streams.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a BMS.
///
/// Implementations deliver raw, unframed bytes. Message boundaries,
/// checksums, and resynchronization are the frame decoder's concern;
/// request/response pairing is the correlation engine's.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the device.
    ///
    /// Implementations should not return until all bytes have been written
    /// to the underlying channel (serial TX buffer, mock queue, etc.).
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the device into the provided buffer.
    ///
    /// Returns the number of bytes actually read, which may be any nonzero
    /// amount up to `buf.len()` -- callers must not assume reads align with
    /// frame boundaries. Waits up to `timeout` for data to arrive; returns
    /// [`Error::Timeout`](crate::error::Error::Timeout) if none does.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
