use crate::protocol::{Decoded, FrameConfig};
use crate::reader::{FrameReader, MAX_BUFFER};
use crate::snapshot::Snapshot;
use crate::{DecodeError, Error};

/// Supplies raw bytes from the physical link.
///
/// One call returns one burst. The implementation owns the inter-byte silence timeout that
/// delimits bursts; returning `Ok(0)` means the link stayed silent for the whole window.
pub trait ByteSource {
    fn poll_bytes(&mut self, buffer: &mut [u8]) -> std::io::Result<usize>;
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn poll_bytes(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
        (**self).poll_bytes(buffer)
    }
}

/// Counters of the decode loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Statistics {
    pub bursts: u64,
    pub bytes: u64,
    pub frames: u64,
    pub verified_frames: u64,
    pub no_frame: u64,
    pub truncated: u64,
    pub checksum_errors: u64,
    pub malformed: u64,
}

impl Statistics {
    fn record_error(&mut self, err: &DecodeError) {
        match err {
            DecodeError::NoFrameFound => self.no_frame += 1,
            DecodeError::Truncated { .. } => self.truncated += 1,
            DecodeError::ChecksumMismatch { .. } => self.checksum_errors += 1,
            DecodeError::MalformedField { .. } => self.malformed += 1,
        }
    }
}

/// Sequential poll-scan-decode worker.
#[derive(Debug)]
pub struct Monitor<S> {
    source: S,
    reader: FrameReader,
    snapshot: Snapshot,
    statistics: Statistics,
    rx_buffer: Vec<u8>,
}

impl<S: ByteSource> Monitor<S> {
    pub fn new(source: S, config: FrameConfig) -> Self {
        Self {
            source,
            reader: FrameReader::new(config),
            snapshot: Snapshot::new(),
            statistics: Statistics::default(),
            rx_buffer: vec![0; MAX_BUFFER],
        }
    }

    /// Handle for readers of the latest decoded state.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.clone()
    }

    pub fn statistics(&self) -> Statistics {
        self.statistics
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Reads one burst and decodes every complete frame it finishes.
    ///
    /// The newest successful frame is published to the snapshot. Decode failures are logged and
    /// counted, only link errors are returned.
    pub fn poll_once(&mut self) -> Result<Vec<Decoded>, Error> {
        let received = self.source.poll_bytes(&mut self.rx_buffer)?;
        self.statistics.bursts += 1;
        self.statistics.bytes += received as u64;
        if received > 0 {
            log::trace!("Received {} bytes: {:02X?}", received, &self.rx_buffer[..received]);
        }
        self.reader.extend(&self.rx_buffer[..received]);

        let mut decoded = Vec::new();
        loop {
            match self.reader.next_frame() {
                Ok(frame) => {
                    self.statistics.frames += 1;
                    if frame.is_verified() {
                        self.statistics.verified_frames += 1;
                    }
                    decoded.push(frame);
                }
                Err(err) => {
                    match err {
                        DecodeError::NoFrameFound if !decoded.is_empty() => {}
                        DecodeError::NoFrameFound | DecodeError::Truncated { .. } => {
                            log::trace!("{}", err);
                            self.statistics.record_error(&err);
                        }
                        DecodeError::ChecksumMismatch { .. } | DecodeError::MalformedField { .. } => {
                            log::warn!("Dropping frame: {}", err);
                            self.statistics.record_error(&err);
                            continue;
                        }
                    }
                    break;
                }
            }
        }

        if let Some(newest) = decoded.last() {
            self.snapshot.publish(newest.clone());
        }
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::test_frames::{encode, sample_state};
    use crate::protocol::BmsState;
    use std::collections::VecDeque;

    struct Bursts(VecDeque<std::io::Result<Vec<u8>>>);

    impl Bursts {
        fn new(bursts: Vec<Vec<u8>>) -> Self {
            Self(bursts.into_iter().map(Ok).collect())
        }
    }

    impl ByteSource for Bursts {
        fn poll_bytes(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(burst)) => {
                    buffer[..burst.len()].copy_from_slice(&burst);
                    Ok(burst.len())
                }
                Some(Err(err)) => Err(err),
                None => Ok(0),
            }
        }
    }

    fn state(voltage: f32) -> BmsState {
        BmsState {
            voltage,
            ..sample_state()
        }
    }

    #[test]
    fn publishes_decoded_frames() {
        let frame = encode(&state(52.0), &FrameConfig::default(), true);
        let mut monitor = Monitor::new(Bursts::new(vec![frame]), FrameConfig::default());
        let snapshot = monitor.snapshot();

        let decoded = monitor.poll_once().unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(snapshot.latest().unwrap().state, state(52.0));

        let statistics = monitor.statistics();
        assert_eq!(statistics.frames, 1);
        assert_eq!(statistics.verified_frames, 1);
        assert_eq!(statistics.no_frame, 0);
    }

    #[test]
    fn truncated_frame_keeps_previous_snapshot() {
        let first = encode(&state(52.0), &FrameConfig::default(), true);
        let second = encode(&state(49.5), &FrameConfig::default(), true);
        let mut monitor = Monitor::new(
            Bursts::new(vec![first, second[..30].to_vec(), second[30..].to_vec()]),
            FrameConfig::default(),
        );
        let snapshot = monitor.snapshot();

        monitor.poll_once().unwrap();
        assert!(monitor.poll_once().unwrap().is_empty());
        assert_eq!(monitor.statistics().truncated, 1);
        assert_eq!(snapshot.latest().unwrap().state, state(52.0));

        monitor.poll_once().unwrap();
        assert_eq!(snapshot.latest().unwrap().state, state(49.5));
    }

    #[test]
    fn checksum_errors_are_counted_and_not_published() {
        let mut corrupted = encode(&state(52.0), &FrameConfig::default(), true);
        corrupted[7] ^= 0x40;
        let mut monitor = Monitor::new(Bursts::new(vec![corrupted]), FrameConfig::default());

        assert!(monitor.poll_once().unwrap().is_empty());
        assert!(monitor.snapshot().latest().is_none());
        assert_eq!(monitor.statistics().checksum_errors, 1);
        assert_eq!(monitor.statistics().no_frame, 1);
    }

    #[test]
    fn newest_frame_of_a_burst_wins() {
        let mut burst = encode(&state(50.0), &FrameConfig::default(), false);
        burst.extend(encode(&state(51.0), &FrameConfig::default(), false));
        let mut monitor = Monitor::new(Bursts::new(vec![burst]), FrameConfig::default());

        assert_eq!(monitor.poll_once().unwrap().len(), 2);
        assert_eq!(monitor.snapshot().latest().unwrap().state, state(51.0));
        assert_eq!(monitor.statistics().verified_frames, 0);
    }

    #[test]
    fn silent_link_is_not_an_error() {
        let mut monitor = Monitor::new(Bursts::new(vec![]), FrameConfig::default());
        assert!(monitor.poll_once().unwrap().is_empty());
        assert_eq!(monitor.statistics().bursts, 1);
        assert_eq!(monitor.statistics().bytes, 0);
    }

    #[test]
    fn link_errors_propagate_and_loop_continues() {
        let frame = encode(&state(52.0), &FrameConfig::default(), true);
        let source = Bursts(VecDeque::from(vec![
            Err(std::io::Error::other("link down")),
            Ok(frame),
        ]));
        let mut monitor = Monitor::new(source, FrameConfig::default());

        assert!(matches!(monitor.poll_once(), Err(Error::Io(_))));
        assert_eq!(monitor.poll_once().unwrap().len(), 1);
    }
}
