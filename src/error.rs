use std::path::PathBuf;

pub type Result<T, E = LogError> = std::result::Result<T, E>;

/// Errors surfaced by the commit log engine.
///
/// Transports are expected to distinguish [`LogError::OffsetNotFound`] (a "not found" or "not yet
/// available" condition) from everything else (a server fault).
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The offset has not been written yet or has been truncated away.
    #[error("offset out of range: {0}")]
    OffsetNotFound(u64),

    /// The segment (its index) cannot take another record.
    ///
    /// Consumed by the [`Log`](crate::storage::Log) as a rotation trigger.
    #[error("segment capacity exceeded")]
    CapacityExceeded,

    /// Segment files on disk do not describe a valid segment.
    #[error("corrupt segment file {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("invalid log configuration: {0}")]
    InvalidConfig(String),

    /// The log has already been closed.
    #[error("log is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LogError {
    #[inline]
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the error means the requested offset is not (or no longer) available.
    #[inline]
    pub fn is_offset_not_found(&self) -> bool {
        matches!(self, Self::OffsetNotFound(_))
    }
}

impl From<LogError> for std::io::Error {
    fn from(err: LogError) -> Self {
        match err {
            LogError::Io(err) => err,
            err => std::io::Error::other(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_conversion() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing store");
        let err = LogError::from(err);
        assert!(matches!(err, LogError::Io(_)));
        assert!(!err.is_offset_not_found());
    }

    #[test]
    fn offset_not_found_display() {
        let err = LogError::OffsetNotFound(42);
        assert!(err.is_offset_not_found());
        assert_eq!("offset out of range: 42", err.to_string());
    }

    #[test]
    fn into_io_error() {
        let err = std::io::Error::from(LogError::OffsetNotFound(7));
        assert_eq!(std::io::ErrorKind::Other, err.kind());

        let err = LogError::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        let err = std::io::Error::from(err);
        assert_eq!(std::io::ErrorKind::PermissionDenied, err.kind());
    }
}
