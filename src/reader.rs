//! Accumulates bursts from the link until they contain whole frames.
//!
//! A read boundary rarely coincides with a frame boundary, so a frame may arrive split over
//! several polls. [`FrameReader`] keeps the bytes that may still belong to a frame and drops
//! everything that cannot.

use crate::protocol::{
    CandidateFrame, Decoded, FrameConfig, FrameDecoder, FrameScanner, HEADER_LENGTH,
};
use crate::DecodeError;

/// Upper bound of retained bytes, same as the UART receive buffer of the device.
pub const MAX_BUFFER: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
    scanner: FrameScanner,
    decoder: FrameDecoder,
}

impl FrameReader {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_BUFFER),
            scanner: FrameScanner::new(config.clone()),
            decoder: FrameDecoder::new(config),
        }
    }

    /// Number of bytes waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > MAX_BUFFER {
            let overflow = self.buffer.len() - MAX_BUFFER;
            log::warn!("Receive buffer overflow - dropping {} oldest bytes", overflow);
            self.buffer.drain(..overflow);
        }
    }

    /// Decodes the next complete frame in the accumulated bytes.
    ///
    /// Call repeatedly until it returns `NoFrameFound` or `Truncated` to drain a burst that
    /// carried several frames.
    pub fn next_frame(&mut self) -> Result<Decoded, DecodeError> {
        let Some(frame) = self.scanner.scan(&self.buffer, 0) else {
            // The tail may hold the beginning of a header
            let keep = self.buffer.len().min(HEADER_LENGTH - 1);
            self.buffer.drain(..self.buffer.len() - keep);
            return Err(DecodeError::NoFrameFound);
        };
        self.buffer.drain(..frame.start);
        let frame = CandidateFrame { start: 0, ..frame };

        match self.decoder.decode(&self.buffer, frame) {
            Ok(decoded) => {
                self.buffer.drain(..frame.end());
                Ok(decoded)
            }
            Err(err @ DecodeError::Truncated { .. }) => Err(err),
            Err(err) => {
                // Rejected frame: resync one byte past its header start
                self.buffer.drain(..1);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::test_frames::{encode, sample_state};
    use crate::protocol::BmsState;

    #[test]
    fn empty_reader_has_no_frame() {
        let mut reader = FrameReader::default();
        assert_eq!(reader.next_frame(), Err(DecodeError::NoFrameFound));
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn frame_split_across_bursts() {
        let frame = encode(&sample_state(), &FrameConfig::default(), true);
        let mut reader = FrameReader::default();

        reader.extend(&[0x00, 0x11, 0x22]);
        reader.extend(&frame[..40]);
        assert!(matches!(
            reader.next_frame(),
            Err(DecodeError::Truncated { available: 40, .. })
        ));
        assert_eq!(reader.pending(), 40);

        reader.extend(&frame[40..]);
        let decoded = reader.next_frame().unwrap();
        assert_eq!(decoded.state, sample_state());
        assert!(decoded.is_verified());
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn split_inside_header() {
        let frame = encode(&sample_state(), &FrameConfig::default(), false);
        let mut reader = FrameReader::default();

        reader.extend(&[0xff; 20]);
        reader.extend(&frame[..3]);
        assert_eq!(reader.next_frame(), Err(DecodeError::NoFrameFound));
        assert_eq!(reader.pending(), HEADER_LENGTH - 1);

        reader.extend(&frame[3..]);
        assert_eq!(reader.next_frame().unwrap().state, sample_state());
    }

    #[test]
    fn several_frames_in_one_burst() {
        let first = sample_state();
        let second = BmsState {
            voltage: 48.75,
            ..sample_state()
        };
        let mut burst = encode(&first, &FrameConfig::default(), false);
        burst.extend_from_slice(&[0x01, 0x02]);
        burst.extend(encode(&second, &FrameConfig::default(), true));

        let mut reader = FrameReader::default();
        reader.extend(&burst);
        assert_eq!(reader.next_frame().unwrap().state, first);
        assert_eq!(reader.next_frame().unwrap().state, second);
        assert_eq!(reader.next_frame(), Err(DecodeError::NoFrameFound));
    }

    #[test]
    fn corrupted_frame_does_not_hide_the_next_one() {
        let mut corrupted = encode(&sample_state(), &FrameConfig::default(), true);
        corrupted[10] ^= 0xff;
        let mut burst = corrupted;
        burst.extend(encode(&sample_state(), &FrameConfig::default(), true));

        let mut reader = FrameReader::default();
        reader.extend(&burst);
        assert!(matches!(
            reader.next_frame(),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
        assert_eq!(reader.next_frame().unwrap().state, sample_state());
    }

    #[test]
    fn overflow_keeps_newest_bytes() {
        let mut reader = FrameReader::default();
        reader.extend(&[0u8; MAX_BUFFER]);
        reader.extend(&encode(&sample_state(), &FrameConfig::default(), false));
        assert_eq!(reader.pending(), MAX_BUFFER);
        assert_eq!(reader.next_frame().unwrap().state, sample_state());
    }
}
