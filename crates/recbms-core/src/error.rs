//! Error types for recbms.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, frame-layer, and
//! command-layer errors are all captured here.

/// The error type for all recbms operations.
///
/// Variants cover the full range of failure modes encountered when talking
/// to a REC Active BMS over a serial link: physical transport failures,
/// frame corruption, catalog misconfiguration, and command timeouts.
///
/// Frame corruption ([`ChecksumMismatch`](Error::ChecksumMismatch),
/// [`FramingError`](Error::FramingError)) is recovered inside the frame
/// decoder and never surfaces past it; those variants appear only at the
/// codec API when validating a candidate byte slice directly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The target address is outside the valid RS-485 range 1-127.
    #[error("invalid target address: {0} (must be 1-127)")]
    InvalidTargetAddress(u8),

    /// The sender address is not 0, the fixed host identity.
    #[error("invalid sender address: {0} (must be 0)")]
    InvalidSenderAddress(u8),

    /// A frame's transmitted CRC did not match the CRC recomputed over
    /// its address, sender, length, and payload bytes.
    #[error("checksum mismatch: received {received:#06x}, computed {computed:#06x}")]
    ChecksumMismatch {
        /// The 16-bit CRC carried in the frame.
        received: u16,
        /// The CRC recomputed over the frame interior.
        computed: u16,
    },

    /// A candidate frame's end marker was missing or misplaced.
    ///
    /// Distinguished from [`ChecksumMismatch`](Error::ChecksumMismatch)
    /// because the decoder's recovery differs: a framing error triggers a
    /// single-byte resynchronization slide, while a checksum failure
    /// discards the whole candidate.
    #[error("framing error: end marker mismatch")]
    FramingError,

    /// No catalog entry exists for the requested command tag.
    #[error("unknown command tag: {0}")]
    UnknownTag(String),

    /// A catalog entry references a parser that is not in the registry.
    ///
    /// Raised when resolving a catalog against a parser registry, so a
    /// misconfigured entry fails at load time rather than mid-poll.
    #[error("no parser registered for tag {tag} (module {module}, parser {parser})")]
    ParserNotRegistered {
        /// The catalog tag whose parser binding failed.
        tag: String,
        /// The collaborator module name from the catalog entry.
        module: String,
        /// The parser name from the catalog entry.
        parser: String,
    },

    /// The catalog data itself is malformed (bad JSON, duplicate tags,
    /// zero expected packets, and so on).
    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),

    /// No complete response arrived within the command's deadline.
    ///
    /// The connection remains usable for the next command.
    #[error("{tag} response timed out after {elapsed_ms} ms")]
    CommandTimeout {
        /// The tag of the command that timed out.
        tag: String,
        /// Milliseconds elapsed between transmission and the deadline.
        elapsed_ms: u64,
    },

    /// Timed out waiting for bytes at the transport level.
    ///
    /// Internal to receive loops; command issuers see
    /// [`CommandTimeout`](Error::CommandTimeout) instead.
    #[error("timeout waiting for data")]
    Timeout,

    /// An invalid parameter was passed to a library call.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The connection to the BMS was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// The connection was deliberately closed while a command was
    /// in flight or queued.
    #[error("connection closed")]
    ConnectionClosed,

    /// No connection to the BMS has been established.
    #[error("not connected")]
    NotConnected,

    /// A transport-level error (serial port open failure, write failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
