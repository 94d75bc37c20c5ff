//! Error types for tempmail-client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// TCP or TLS failure while reaching the server.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server rejected the credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Unexpected or failed response to SELECT, FETCH, STORE or EXPUNGE.
    #[error("IMAP error: {0}")]
    Protocol(String),

    #[error("Timed out during {step}")]
    Timeout { step: &'static str },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Maximum attempts exceeded ({attempts}): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<Self>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Inbox task has stopped")]
    InboxClosed,
}

impl Error {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Authentication failures are reported as retryable here; the
    /// [`RetryPolicy`](crate::RetryPolicy) decides whether to act on
    /// them.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Auth(_) | Self::Protocol(_) | Self::Timeout { .. } | Self::Io(_)
        )
    }

    /// The underlying error of a [`Error::RetryExhausted`], or `self`.
    #[must_use]
    pub fn last_cause(&self) -> &Self {
        match self {
            Self::RetryExhausted { source, .. } => source.last_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
