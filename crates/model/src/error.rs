use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The content is moderated.
    Moderated,
    /// The model provider is rate limited.
    RateLimitExceeded,
    /// The request did not complete in time.
    Timeout,
    /// Any other errors.
    Other,
}

impl ErrorKind {
    /// Returns `true` if a request failing with this kind may succeed when
    /// sent again later.
    #[inline]
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::RateLimitExceeded | ErrorKind::Timeout)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Moderated => write!(f, "content moderated"),
            ErrorKind::RateLimitExceeded => write!(f, "rate limit exceeded"),
            ErrorKind::Timeout => write!(f, "timed out"),
            ErrorKind::Other => write!(f, "model error"),
        }
    }
}
