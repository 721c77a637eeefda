//! REC BMS wire-frame codec.
//!
//! The BMS speaks a delimited binary frame format over RS-485. Commands and
//! responses use the same layout; the payload is ASCII command text such as
//! `SERI?` or `CMAX 3.65`.
//!
//! # Frame format
//!
//! ```text
//! offset 0:          start marker = 0x55
//! offset 1:          target address = 1..127
//! offset 2:          sender address = 0x00
//! offset 3:          length L = 0..255
//! offset 4..4+L-1:   payload bytes (ASCII command text)
//! offset 4+L..4+L+1: CRC-16, big-endian, over bytes[1 .. 4+L-1]
//! offset 4+L+2:      end marker = 0xAA
//! total length = L + 7
//! ```
//!
//! The checksum is CRC-16/ARC (polynomial 0x8005 reflected, init 0x0000),
//! the same algorithm the BMS firmware uses. This is a wire compatibility
//! requirement, not an implementation choice: the check value of
//! `"123456789"` must be 0xBB3D.
//!
//! # Example
//!
//! ```
//! use recbms::frame;
//!
//! let bytes = frame::encode_command(2, 0, b"SERI?").unwrap();
//! assert_eq!(bytes.len(), 12);
//! assert_eq!(bytes[0], 0x55);
//!
//! let decoded = frame::validate(&bytes).unwrap();
//! assert_eq!(decoded.payload, b"SERI?");
//! ```

use bytes::{BufMut, BytesMut};
use crc16::{State, ARC};

use recbms_core::{Error, Result};

/// Start-of-frame marker byte.
pub const START_MARKER: u8 = 0x55;

/// End-of-frame marker byte.
pub const END_MARKER: u8 = 0xAA;

/// The fixed sender (host) address.
pub const SENDER_ADDRESS: u8 = 0x00;

/// Bytes of framing overhead: markers, addresses, length field, checksum.
pub const OVERHEAD: usize = 7;

/// Maximum payload length representable in the 1-byte length field.
pub const MAX_PAYLOAD: usize = 255;

/// Maximum total frame size on the wire.
pub const MAX_FRAME: usize = MAX_PAYLOAD + OVERHEAD;

/// One complete, checksum-verified unit of serial communication.
///
/// Markers, the length field, and the checksum are wire-level artifacts and
/// are not carried here; [`to_wire`](Frame::to_wire) reconstructs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination address (the BMS for outbound frames).
    pub target: u8,
    /// Source address.
    pub sender: u8,
    /// Payload bytes, normally ASCII command or response text.
    pub payload: Vec<u8>,
}

impl Frame {
    /// The payload interpreted as text, with invalid UTF-8 replaced.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Re-encode this frame to its wire representation.
    ///
    /// Unlike [`encode_command`], this performs no address validation:
    /// received frames carry whatever addresses the device put on the wire.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(Error::InvalidParameter(format!(
                "payload length {} exceeds {} bytes",
                self.payload.len(),
                MAX_PAYLOAD
            )));
        }
        Ok(layout(self.target, self.sender, &self.payload))
    }
}

/// Compute the wire checksum (CRC-16/ARC) over a byte region.
pub fn checksum(region: &[u8]) -> u16 {
    State::<ARC>::calculate(region)
}

/// Lay out a frame. Callers have already bounds-checked the payload length.
fn layout(target: u8, sender: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(payload.len() + OVERHEAD);
    buf.put_u8(START_MARKER);
    buf.put_u8(target);
    buf.put_u8(sender);
    buf.put_u8(payload.len() as u8);
    buf.put_slice(payload);
    let crc = checksum(&buf[1..]);
    buf.put_u16(crc);
    buf.put_u8(END_MARKER);
    buf.to_vec()
}

/// Encode a command into a wire frame.
///
/// Validates `target` against the RS-485 range 1-127 and `sender` against
/// the fixed host identity 0; out-of-range addresses fail rather than being
/// clamped. The output is exactly `payload.len() + 7` bytes.
///
/// # Example
///
/// ```
/// use recbms::frame::encode_command;
///
/// let bytes = encode_command(2, 0, b"BVOL?").unwrap();
/// assert_eq!(&bytes[..4], &[0x55, 0x02, 0x00, 0x05]);
/// assert_eq!(*bytes.last().unwrap(), 0xAA);
/// ```
pub fn encode_command(target: u8, sender: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if !(1..=127).contains(&target) {
        return Err(Error::InvalidTargetAddress(target));
    }
    if sender != SENDER_ADDRESS {
        return Err(Error::InvalidSenderAddress(sender));
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::InvalidParameter(format!(
            "payload length {} exceeds {} bytes",
            payload.len(),
            MAX_PAYLOAD
        )));
    }
    Ok(layout(target, sender, payload))
}

/// Validate a candidate frame and decode it.
///
/// The candidate must begin with the start marker and contain the complete
/// frame indicated by its length field. An end-marker mismatch is reported
/// as [`Error::FramingError`] and a CRC mismatch as
/// [`Error::ChecksumMismatch`]; the decoder's recovery strategy differs
/// between the two, so they must stay distinguishable.
pub fn validate(candidate: &[u8]) -> Result<Frame> {
    if candidate.len() < OVERHEAD || candidate[0] != START_MARKER {
        return Err(Error::FramingError);
    }
    let length = candidate[3] as usize;
    if candidate.len() < length + OVERHEAD {
        return Err(Error::FramingError);
    }
    if candidate[length + 6] != END_MARKER {
        return Err(Error::FramingError);
    }

    let received = u16::from_be_bytes([candidate[length + 4], candidate[length + 5]]);
    let computed = checksum(&candidate[1..length + 4]);
    if received != computed {
        return Err(Error::ChecksumMismatch { received, computed });
    }

    Ok(Frame {
        target: candidate[1],
        sender: candidate[2],
        payload: candidate[4..4 + length].to_vec(),
    })
}
