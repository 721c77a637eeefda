//! Stream-reassembling frame decoder.
//!
//! Serial reads deliver arbitrary byte chunks with no relationship to frame
//! boundaries: a frame may arrive split across several reads, several frames
//! may arrive in one read, and line noise may corrupt or interleave with
//! genuine traffic. [`FrameDecoder`] owns the receive buffer, reassembles
//! frames from the chunk stream, and recovers from corruption.
//!
//! # Recovery strategy
//!
//! Two failure modes are handled differently, and the distinction matters:
//!
//! - **End marker wrong** (framing error): the leading start-marker byte is
//!   treated as spurious and exactly one byte is discarded before retrying.
//!   A stray 0x55 inside genuine payload data would otherwise swallow the
//!   real frame that follows and desynchronize the stream permanently.
//! - **Checksum wrong**: the frame is structurally sound but corrupt, so
//!   the entire candidate is discarded and the failure counted.
//!
//! Corruption never surfaces past this module; it is a normal condition on
//! a noisy RS-485 line.

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use recbms_core::Error;

use crate::frame::{self, Frame, END_MARKER, MAX_FRAME, OVERHEAD, START_MARKER};

/// Diagnostic counters for the receive side of the link.
///
/// `frames_received` counts every structurally complete candidate (end
/// marker in place), including those that then fail the checksum; frames
/// actually delivered equal `frames_received - checksum_failures`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Structurally complete frames seen, good or bad CRC.
    pub frames_received: u64,
    /// Raw bytes pushed into the decoder.
    pub bytes_received: u64,
    /// Candidates discarded for CRC mismatch.
    pub checksum_failures: u64,
}

/// Reassembles validated [`Frame`]s from an unstructured byte stream.
///
/// One decoder instance exists per connection and is owned exclusively by
/// the correlation engine task; nothing else may touch the buffer.
///
/// # Example
///
/// ```
/// use recbms::decoder::FrameDecoder;
/// use recbms::frame;
///
/// let mut decoder = FrameDecoder::new();
/// let wire = frame::encode_command(2, 0, b"SERI?").unwrap();
///
/// // Bytes may arrive split at any boundary.
/// assert!(decoder.push(&wire[..5]).is_empty());
/// let frames = decoder.push(&wire[5..]);
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0].payload, b"SERI?");
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    stats: DecoderStats,
}

impl FrameDecoder {
    /// Create a decoder with an empty receive buffer.
    pub fn new() -> Self {
        FrameDecoder {
            buf: BytesMut::with_capacity(MAX_FRAME),
            stats: DecoderStats::default(),
        }
    }

    /// Current diagnostic counters.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Number of bytes currently retained waiting for more data.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append received bytes and extract every complete, valid frame.
    ///
    /// Frames are returned in wire order. The call never blocks: it stops
    /// as soon as the remaining bytes cannot form a complete frame, leaving
    /// them buffered for the next push.
    pub fn push(&mut self, block: &[u8]) -> Vec<Frame> {
        self.stats.bytes_received += block.len() as u64;
        self.buf.extend_from_slice(block);

        let mut frames = Vec::new();
        while self.extract(&mut frames) {}
        frames
    }

    /// Attempt one extraction step. Returns `true` if progress was made
    /// (a frame delivered or bytes discarded) and another step should run.
    fn extract(&mut self, frames: &mut Vec<Frame>) -> bool {
        // Resynchronize: drop leading noise up to the first start marker.
        match self.buf.iter().position(|&b| b == START_MARKER) {
            Some(0) => {}
            Some(pos) => self.buf.advance(pos),
            None => {
                self.buf.clear();
                return false;
            }
        }

        if self.buf.len() < OVERHEAD {
            return false;
        }
        let length = self.buf[3] as usize;
        if self.buf.len() < length + OVERHEAD {
            // Incomplete frame; wait for more data.
            return false;
        }

        let candidate_len = length + OVERHEAD;
        if self.buf[candidate_len - 1] != END_MARKER {
            // The start marker was a stray byte inside other data. Slide a
            // single byte and retry; discarding the whole candidate here
            // could swallow a genuine frame.
            trace!(length, "end marker mismatch, resynchronizing");
            self.buf.advance(1);
            return true;
        }

        self.stats.frames_received += 1;
        match frame::validate(&self.buf[..candidate_len]) {
            Ok(frame) => {
                self.buf.advance(candidate_len);
                trace!(
                    target_addr = frame.target,
                    payload = %frame.payload_text(),
                    "frame received"
                );
                frames.push(frame);
                true
            }
            Err(Error::ChecksumMismatch { received, computed }) => {
                self.stats.checksum_failures += 1;
                debug!(
                    received = format_args!("{received:#06x}"),
                    computed = format_args!("{computed:#06x}"),
                    "discarding frame with bad checksum"
                );
                self.buf.advance(candidate_len);
                true
            }
            Err(_) => {
                // validate() cannot report other errors once the end marker
                // has been checked, but keep the stream moving if it does.
                self.buf.advance(1);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(target: u8, payload: &[u8]) -> Vec<u8> {
        frame::encode_command(target, 0, payload).unwrap()
    }

    // ---------------------------------------------------------------
    // Happy path
    // ---------------------------------------------------------------

    #[test]
    fn decode_single_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&wire(2, b"SERI?"));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].target, 2);
        assert_eq!(frames[0].payload, b"SERI?");
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.stats().frames_received, 1);
    }

    #[test]
    fn decode_two_frames_in_one_push() {
        let mut decoder = FrameDecoder::new();
        let mut block = wire(2, b"BVOL?");
        block.extend_from_slice(&wire(2, b"CMAX?"));

        let frames = decoder.push(&block);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload, b"BVOL?");
        assert_eq!(frames[1].payload, b"CMAX?");
    }

    #[test]
    fn decode_zero_length_payload() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&wire(2, b""));
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
    }

    // ---------------------------------------------------------------
    // Partial delivery
    // ---------------------------------------------------------------

    #[test]
    fn frame_split_across_pushes() {
        let full = wire(2, b"SERI?");
        // Split at every possible boundary.
        for split in 1..full.len() {
            let mut decoder = FrameDecoder::new();
            assert!(
                decoder.push(&full[..split]).is_empty(),
                "split at {split} yielded a frame early"
            );
            let frames = decoder.push(&full[split..]);
            assert_eq!(frames.len(), 1, "split at {split}");
            assert_eq!(frames[0].payload, b"SERI?");
            assert_eq!(decoder.buffered(), 0);
        }
    }

    #[test]
    fn frame_delivered_byte_by_byte() {
        let full = wire(2, b"CELL?");
        let mut decoder = FrameDecoder::new();
        let mut collected = Vec::new();
        for &b in &full {
            collected.extend(decoder.push(&[b]));
        }
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].payload, b"CELL?");
    }

    // ---------------------------------------------------------------
    // Resynchronization
    // ---------------------------------------------------------------

    #[test]
    fn leading_garbage_discarded() {
        let mut decoder = FrameDecoder::new();
        let mut block = vec![0x00, 0xFF, 0x13, 0x37];
        block.extend_from_slice(&wire(2, b"SERI?"));

        let frames = decoder.push(&block);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"SERI?");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn garbage_without_start_marker_clears_buffer() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&[0x01, 0x02, 0x03, 0xFF]);
        assert!(frames.is_empty());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn stray_start_marker_before_genuine_frame() {
        // Garbage, then a lone 0x55, then a real frame: the decoder must
        // slide past the stray marker and deliver exactly the real frame.
        let mut decoder = FrameDecoder::new();
        let mut block = vec![0xDE, 0xAD, START_MARKER];
        block.extend_from_slice(&wire(2, b"SERI?"));

        let frames = decoder.push(&block);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"SERI?");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn stray_marker_slide_preserves_following_frame() {
        // The stray 0x55 reads a bogus length from the real frame's bytes;
        // only a single-byte slide recovers the frame behind it.
        let real = wire(3, b"BMIN?");
        let mut block = vec![START_MARKER];
        block.extend_from_slice(&real);

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&block);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"BMIN?");
    }

    // ---------------------------------------------------------------
    // Corruption
    // ---------------------------------------------------------------

    #[test]
    fn bad_checksum_frame_discarded_entirely() {
        // [0x55, 0x02, 0x00, 0x02, 'O', 'K', <wrong crc>, 0xAA] must be
        // rejected and leave the buffer empty -- no partial leftover.
        let block = [0x55, 0x02, 0x00, 0x02, b'O', b'K', 0x12, 0x34, 0xAA];
        let mut decoder = FrameDecoder::new();

        let frames = decoder.push(&block);
        assert!(frames.is_empty());
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.stats().checksum_failures, 1);
        assert_eq!(decoder.stats().frames_received, 1);
    }

    #[test]
    fn bad_checksum_does_not_block_next_frame() {
        let mut corrupted = wire(2, b"BVOL?");
        corrupted[5] ^= 0x01; // flip a payload bit
        let mut block = corrupted;
        block.extend_from_slice(&wire(2, b"CMAX?"));

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&block);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"CMAX?");
        assert_eq!(decoder.stats().checksum_failures, 1);
    }

    #[test]
    fn framing_error_not_counted_as_received() {
        // A stray start marker sliding out is not a "frame" for the
        // counters; only end-marker-complete candidates count.
        let mut block = vec![START_MARKER, 0x01];
        block.extend_from_slice(&wire(2, b"SERI?"));

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&block);
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.stats().frames_received, 1);
        assert_eq!(decoder.stats().checksum_failures, 0);
    }

    // ---------------------------------------------------------------
    // Counters and buffer bounds
    // ---------------------------------------------------------------

    #[test]
    fn bytes_received_counts_every_push() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[0x01, 0x02]);
        decoder.push(&[0x03]);
        assert_eq!(decoder.stats().bytes_received, 3);
    }

    #[test]
    fn retained_buffer_stays_under_one_frame() {
        let mut decoder = FrameDecoder::new();
        // Feed a stream of noise and partial frames; the buffer must never
        // retain a full frame's worth of bytes after a push returns.
        let full = wire(2, b"RINT?");
        for chunk in [&[0xFFu8, 0x00][..], &full[..4], &full[4..8]] {
            decoder.push(chunk);
            assert!(decoder.buffered() < MAX_FRAME);
        }
        let frames = decoder.push(&full[8..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn incomplete_frame_waits_for_more_data() {
        // A frame header claiming 100 payload bytes must not be discarded
        // while the payload is still arriving.
        let payload = vec![b'Z'; 100];
        let full = wire(2, &payload);
        let mut decoder = FrameDecoder::new();

        assert!(decoder.push(&full[..50]).is_empty());
        assert_eq!(decoder.buffered(), 50);
        let frames = decoder.push(&full[50..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, payload);
    }
}
