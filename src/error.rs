use thiserror::Error;

/// Errors raised by the negotiation core and its API client
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    #[error("No session token configured")]
    MissingSession,

    #[error("Session token is no longer valid (HTTP {0})")]
    SessionInvalid(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Server rejected request: {0}")]
    Rejected(String),

    #[error("Meeting time and location are not both confirmed")]
    MeetingNotConfirmed,

    #[error("Proposal {proposal_id} cannot be answered: {reason}")]
    NotRespondable { proposal_id: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ExchangeError {
    /// Transient failures are retried only by the next scheduled poll.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Network(_) | ExchangeError::Malformed(_))
    }

    /// The session has to be re-established before anything else can succeed
    pub fn is_session_error(&self) -> bool {
        matches!(self, ExchangeError::MissingSession | ExchangeError::SessionInvalid(_))
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ExchangeError::Malformed(e.to_string())
        } else {
            ExchangeError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(e: serde_json::Error) -> Self {
        ExchangeError::Malformed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;
