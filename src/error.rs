/// Reasons a scan-decode cycle did not produce a battery snapshot.
///
/// None of these are fatal: the worker loop logs them and carries on with the next burst.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// No structurally valid header in the buffer. Keep accumulating bytes.
    #[error("No frame found")]
    NoFrameFound,
    /// A header matched but the buffer ends before the declared frame length.
    #[error("Frame truncated - required={required} available={available}")]
    Truncated { required: usize, available: usize },
    /// The trailing checksum does not match the frame contents.
    #[error("Invalid checksum - calculated={calculated:04X} received={received:04X}")]
    ChecksumMismatch { calculated: u16, received: u16 },
    /// Strict decoding rejected an out-of-range field value.
    #[error("Value of field '{field}' out of range: {value}")]
    MalformedField { field: &'static str, value: u16 },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
