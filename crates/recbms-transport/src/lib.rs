//! recbms-transport: Physical transport implementations for recbms.
//!
//! Currently provides [`SerialTransport`] for the RS-485/USB serial link to
//! a REC Active BMS. All transports implement the
//! [`Transport`](recbms_core::Transport) trait from `recbms-core`, so the
//! protocol stack is agnostic to the physical layer.

pub mod serial;

pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
