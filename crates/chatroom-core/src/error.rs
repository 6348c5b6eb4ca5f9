//! Error types.
//!
//! [`ErrorInfo`] is the error value produced by the transport and the chat
//! service (channel attach failures, REST rejections). [`ChatError`] is what
//! SDK operations return: lifecycle state violations, feature argument
//! errors, and transport errors wrapped with an amended message.

use std::fmt;

use crate::status::RoomStatus;

/// Numeric error codes carried by [`ErrorInfo`] and reported by
/// [`ChatError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed request or argument.
    BadRequest,
    /// Unexpected failure inside the SDK or service.
    InternalError,
    /// A continuity break was detected on the room channel.
    RoomDiscontinuity,
    /// Detach attempted on a failed room.
    RoomInFailedState,
    /// Operation attempted while the room is releasing.
    RoomIsReleasing,
    /// Operation attempted on a released room.
    RoomIsReleased,
    /// The room was released while the operation was queued.
    RoomReleasedBeforeOperationCompleted,
    /// Operation attempted outside the statuses that permit it.
    RoomInInvalidState,
}

impl ErrorCode {
    /// Wire value of the code.
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::BadRequest => 40_000,
            Self::InternalError => 50_000,
            Self::RoomDiscontinuity => 102_100,
            Self::RoomInFailedState => 102_101,
            Self::RoomIsReleasing => 102_102,
            Self::RoomIsReleased => 102_103,
            Self::RoomReleasedBeforeOperationCompleted => 102_106,
            Self::RoomInInvalidState => 102_107,
        }
    }

    /// HTTP-style status paired with the code.
    pub const fn status_code(self) -> u16 {
        match self {
            Self::BadRequest
            | Self::RoomInFailedState
            | Self::RoomIsReleasing
            | Self::RoomIsReleased
            | Self::RoomReleasedBeforeOperationCompleted
            | Self::RoomInInvalidState => 400,
            Self::InternalError | Self::RoomDiscontinuity => 500,
        }
    }
}

/// Error reported by the transport or the chat service.
///
/// Carries an optional cause so wrapped reasons (for example the channel
/// error behind a discontinuity) stay inspectable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Numeric error code.
    pub code: u32,
    /// HTTP-style status code.
    pub status_code: u16,
    /// Human-readable description.
    pub message: String,
    /// Underlying error, if any.
    pub cause: Option<Box<ErrorInfo>>,
}

impl ErrorInfo {
    /// Create an error without a cause.
    pub fn new(code: u32, status_code: u16, message: impl Into<String>) -> Self {
        Self { code, status_code, message: message.into(), cause: None }
    }

    /// Create an error from a well-known code.
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code.as_u32(), code.status_code(), message)
    }

    /// Attach a cause.
    #[must_use]
    pub fn with_cause(mut self, cause: Self) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Whether this error or any of its causes carries `code`.
    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.code == code.as_u32() || self.cause.as_ref().is_some_and(|c| c.has_code(code))
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {}, status {})", self.message, self.code, self.status_code)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorInfo {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Errors from chat SDK operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Operation attempted outside the statuses that permit it.
    #[error("room is in an invalid state for this operation: {status}")]
    RoomInInvalidState {
        /// Status the room was in.
        status: RoomStatus,
    },

    /// Operation attempted while the room is releasing.
    #[error("room is releasing")]
    RoomIsReleasing,

    /// Operation attempted on a released room.
    #[error("room is released")]
    RoomIsReleased,

    /// Detach attempted on a failed room.
    #[error("cannot detach room, room is in failed state")]
    RoomInFailedState,

    /// The room went away while the operation was waiting to run.
    #[error("room was released before the operation completed")]
    ReleasedBeforeOperationCompleted,

    /// Channel operation failed.
    #[error("{context}: {source}")]
    Channel {
        /// What the SDK was doing.
        context: String,
        /// Error reported by the channel.
        source: ErrorInfo,
    },

    /// REST request failed.
    #[error("{context}: {source}")]
    Api {
        /// What the SDK was doing.
        context: String,
        /// Error reported by the service.
        source: ErrorInfo,
    },

    /// Caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A payload could not be decoded.
    #[error("failed to decode {what}: {reason}")]
    Decode {
        /// Kind of payload.
        what: &'static str,
        /// Description of the problem.
        reason: String,
    },
}

impl ChatError {
    /// Wrap a channel error with context.
    pub fn channel(context: impl Into<String>, source: ErrorInfo) -> Self {
        Self::Channel { context: context.into(), source }
    }

    /// Wrap a REST error with context.
    pub fn api(context: impl Into<String>, source: ErrorInfo) -> Self {
        Self::Api { context: context.into(), source }
    }

    /// Numeric code for this error.
    pub fn code(&self) -> u32 {
        match self {
            Self::RoomInInvalidState { .. } => ErrorCode::RoomInInvalidState.as_u32(),
            Self::RoomIsReleasing => ErrorCode::RoomIsReleasing.as_u32(),
            Self::RoomIsReleased => ErrorCode::RoomIsReleased.as_u32(),
            Self::RoomInFailedState => ErrorCode::RoomInFailedState.as_u32(),
            Self::ReleasedBeforeOperationCompleted => {
                ErrorCode::RoomReleasedBeforeOperationCompleted.as_u32()
            },
            Self::Channel { source, .. } | Self::Api { source, .. } => source.code,
            Self::InvalidArgument(_) | Self::Decode { .. } => ErrorCode::BadRequest.as_u32(),
        }
    }

    /// Returns true if retrying the same call cannot succeed.
    ///
    /// A room in an invalid state can be attached and the call retried; a
    /// released or failed room cannot.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::RoomIsReleasing
            | Self::RoomIsReleased
            | Self::RoomInFailedState
            | Self::ReleasedBeforeOperationCompleted
            | Self::InvalidArgument(_)
            | Self::Decode { .. } => true,

            Self::Api { source, .. } => (400..500).contains(&source.status_code),

            Self::RoomInInvalidState { .. } | Self::Channel { .. } => false,
        }
    }
}
