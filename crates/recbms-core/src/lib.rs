//! recbms-core: Core traits and error definitions for recbms.
//!
//! This crate defines the transport abstraction and error taxonomy that the
//! rest of the recbms workspace builds on. Applications normally depend on
//! the `recbms` facade crate instead of this one.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod transport;

// Re-export key types at crate root for ergonomic `use recbms_core::*`.
pub use error::{Error, Result};
pub use transport::Transport;
