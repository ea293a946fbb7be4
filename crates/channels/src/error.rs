use std::{error::Error as StdError, time::Duration};

/// Crate-wide result type for connection operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed connection errors shared by every [`MessagingConnection`] implementation.
///
/// [`MessagingConnection`]: crate::MessagingConnection
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session is not connected and authenticated.
    #[error("whatsapp is not connected")]
    NotConnected,

    /// The messaging network rejected the request.
    #[error("{message}")]
    Rejected { message: String },

    /// No answer arrived within the allowed time.
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Wrapped source error from an external dependency.
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn rejected(message: impl std::fmt::Display) -> Self {
        Self::Rejected {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error means the connection was not usable at all, as
    /// opposed to a single request failing.
    #[must_use]
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected)
    }
}
