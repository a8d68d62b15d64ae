//! Error types for browser launch, protocol traffic and rendering
//!
//! One flat enum for every layer. The orchestrator wraps these with the
//! state they occurred in (see `render::RenderError`) but never rewrites them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Browser did not expose a debugging endpoint before the deadline")]
    LaunchTimeout,

    #[error("Browser executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Browser exited before becoming ready: {0}")]
    ProcessExitedEarly(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Failed to connect to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Failed to write frame: {0}")]
    WriteError(String),

    /// A frame that is not a well-formed message. Fatal for the connection.
    #[error("Malformed frame: {0}")]
    ProtocolError(String),

    /// A well-formed message that does not match the expected schema.
    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Timed out waiting for {0}")]
    CommandTimeout(String),

    #[error("Overall deadline exceeded")]
    OverallDeadlineExceeded,

    #[error("Missing content: no resource to render")]
    MissingContent,

    /// Error response returned by the browser for a command.
    #[error("CDP error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Already waiting for {method} on session {session}")]
    SubscriptionConflict { session: String, method: String },

    #[error("Invalid print options: {0}")]
    InvalidOptions(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Timeout kinds, whichever layer raised them.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::LaunchTimeout | Error::CommandTimeout(_) | Error::OverallDeadlineExceeded
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::DecodeError(e.to_string())
    }
}
