//! Error types emitted by the codec.
//!
//! Entry streams implement [`std::io::Read`] and [`std::io::Write`], so a
//! [`ZipError`] raised inside them travels wrapped in an [`io::Error`]. The
//! `From` conversions in this module unwrap it again without losing the
//! variant, which keeps a wrong password distinguishable from corruption all
//! the way up to the caller.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Error, Debug)]
pub enum ZipError {
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Malformed or truncated header, unknown method code, bad extra data.
    #[error("invalid archive: {0}")]
    Format(String),

    #[error("wrong password")]
    WrongPassword,

    #[error("authentication code mismatch for entry {0}")]
    AuthenticationFailed(String),

    #[error("CRC mismatch for entry {name}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    #[error("split archive disk {disk} is missing")]
    MissingDisk { disk: u32 },

    /// Caller contract violation, e.g. writing after close.
    #[error("invalid state: {0}")]
    State(&'static str),

    #[error("operation cancelled")]
    Cancelled,
}

/// Coarse classification of a [`ZipError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    Authentication,
    Io,
    State,
    Cancelled,
}

impl ZipError {
    pub fn format(msg: impl Into<String>) -> Self {
        ZipError::Format(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ZipError::Io(_) | ZipError::MissingDisk { .. } => ErrorKind::Io,
            ZipError::Format(_) | ZipError::ChecksumMismatch { .. } => ErrorKind::Format,
            ZipError::WrongPassword | ZipError::AuthenticationFailed(_) => {
                ErrorKind::Authentication
            }
            ZipError::State(_) => ErrorKind::State,
            ZipError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// True when the caller should prompt for another password rather than
    /// treat the archive as damaged.
    pub fn is_wrong_password(&self) -> bool {
        self.kind() == ErrorKind::Authentication
    }
}

impl From<io::Error> for ZipError {
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<ZipError>()) {
            return match err.kind() {
                io::ErrorKind::UnexpectedEof => {
                    ZipError::Format("unexpected end of stream".to_string())
                }
                _ => ZipError::Io(err),
            };
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<ZipError>()) {
            Some(Ok(zip_err)) => *zip_err,
            _ => ZipError::Io(io::Error::from(kind)),
        }
    }
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(inner) => inner,
            other => {
                let kind = match other.kind() {
                    ErrorKind::Format | ErrorKind::Authentication => io::ErrorKind::InvalidData,
                    ErrorKind::Io => io::ErrorKind::NotFound,
                    ErrorKind::State => io::ErrorKind::Other,
                    ErrorKind::Cancelled => io::ErrorKind::Interrupted,
                };
                io::Error::new(kind, other)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_error_survives_io_round_trip() {
        let io_err: io::Error = ZipError::WrongPassword.into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
        let back = ZipError::from(io_err);
        assert!(matches!(back, ZipError::WrongPassword));
        assert!(back.is_wrong_password());
    }

    #[test]
    fn unexpected_eof_is_a_format_error() {
        let err = ZipError::from(io::Error::new(io::ErrorKind::UnexpectedEof, "short"));
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn plain_io_error_stays_io() {
        let err = ZipError::from(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        assert_eq!(err.kind(), ErrorKind::Io);
        let back: io::Error = err.into();
        assert_eq!(back.kind(), io::ErrorKind::PermissionDenied);
    }
}
