use crate::error::LogError;

/// A protocol error that is reported back to the client before the connection is closed.
#[derive(Debug, thiserror::Error)]
#[error("RpcError: {error_code:?}, api key {api_key} correlation id {correlation_id:?}")]
pub struct RpcError {
    pub(crate) error_code: ErrorCode,
    pub(crate) api_key: i16,
    pub(crate) correlation_id: i32,
}

// FIXME: camel case enum variants
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(i16)]
pub enum ErrorCode {
    /// The server experienced an unexpected error when processing the request.
    UNKNOWN_SERVER_ERROR = -1,

    #[allow(clippy::upper_case_acronyms)]
    #[default]
    NONE = 0,

    /// The requested offset is not within the range of offsets maintained by the server.
    OFFSET_OUT_OF_RANGE = 1,

    /// The request is malformed or uses an unknown API key.
    INVALID_REQUEST = 42,
}

impl ErrorCode {
    // INT16 repr
    pub const SIZE: usize = 2;

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::NONE)
    }
}

impl TryFrom<i16> for ErrorCode {
    type Error = i16;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::UNKNOWN_SERVER_ERROR),
            0 => Ok(Self::NONE),
            1 => Ok(Self::OFFSET_OUT_OF_RANGE),
            42 => Ok(Self::INVALID_REQUEST),
            other => Err(other),
        }
    }
}

impl From<&LogError> for ErrorCode {
    fn from(err: &LogError) -> Self {
        match err {
            LogError::OffsetNotFound(_) => Self::OFFSET_OUT_OF_RANGE,
            _ => Self::UNKNOWN_SERVER_ERROR,
        }
    }
}
