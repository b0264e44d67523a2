use crate::model::PostId;

/// Failures surfaced by the request/consistency layer.
///
/// Every variant is cheap to clone: a single refresh outcome is handed to all
/// of its waiters, and feed controllers keep the last error in their state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Transport-level failure. Retrying is up to the caller.
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication failed: {0}")]
    AuthFailure(String),
    /// Terminal for the current session; a new sign-in is required.
    #[error("session expired")]
    SessionExpired,
    #[error("a mutation is already in flight for post {0}")]
    Busy(PostId),
    #[error("server rejected request ({status}): {message}")]
    ServerRejected { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("post {0} is not cached")]
    NotCached(PostId),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::ServerRejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
