use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("io terminated by cancellation")]
    Terminated,
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedHash(String),
    #[error("unsupported compression mode: {0}")]
    UnsupportedCompression(String),
    #[error("cipher configured without a padding strategy")]
    MissingPadding,
    #[error("archive entry not found: {0}")]
    EntryNotFound(String),
    #[error("metadata record missing field: {0}")]
    MissingField(&'static str),
    #[error("malformed metadata record")]
    Metadata(#[from] serde_json::Error),
    #[error(transparent)]
    Io(io::Error),
}

// The cancellation gate smuggles Terminated through the io::Error layer so
// the gate stays a plain Read/Write wrapper. Unwrap it back out here.
impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        let terminated = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ArchiveError>())
            .map_or(false, |inner| matches!(inner, ArchiveError::Terminated));

        if terminated {
            ArchiveError::Terminated
        } else {
            ArchiveError::Io(err)
        }
    }
}
