//! recbms-test-harness: Deterministic test doubles for recbms.
//!
//! Provides [`MockTransport`], an in-memory implementation of the
//! [`Transport`](recbms_core::Transport) trait with pre-loaded
//! request/response expectations and support for injecting unsolicited
//! bytes mid-test.

pub mod mock_serial;

pub use mock_serial::{MockHandle, MockTransport};
