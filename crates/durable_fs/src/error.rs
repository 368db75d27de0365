use durable_stream::{is_cancelled, SegmentError};
use std::io;

/// A coarse classification of the errors produced by this crate.
///
/// Every error type in this crate has a `kind()` method that returns one of these. Callers should
/// match on the kind instead of the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller passed something that can never succeed: an escaping or empty path, a
    /// malformed schema, a non-regular file where only regular files are supported or an invalid
    /// naming pattern.
    BadInput,

    /// No unused temporary name was found within the allowed number of attempts.
    NameCollisionExhausted,

    /// Written or read data did not match its expected checksum or declared size.
    ChecksumMismatch,

    /// The underlying filesystem operation failed.
    Filesystem,

    /// The operation observed a cancelled [`durable_stream::CancellationToken`].
    Cancelled,
}

impl ErrorKind {
    /// Classifies an I/O error.
    pub fn of_io(err: &io::Error) -> Self {
        if is_cancelled(err) {
            return ErrorKind::Cancelled;
        }
        if let Some(err) = SegmentError::from_io(err) {
            return ErrorKind::from(err);
        }
        match err.kind() {
            io::ErrorKind::InvalidInput => ErrorKind::BadInput,
            _ => ErrorKind::Filesystem,
        }
    }
}

impl From<&SegmentError> for ErrorKind {
    fn from(err: &SegmentError) -> Self {
        match err {
            SegmentError::InvalidSize { .. } | SegmentError::UnexpectedEndOfStream { .. } => {
                ErrorKind::ChecksumMismatch
            }
            SegmentError::NegativeOffset(_) | SegmentError::OffsetOverflow(_) => {
                ErrorKind::BadInput
            }
            SegmentError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}
