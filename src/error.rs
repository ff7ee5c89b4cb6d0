use thiserror::Error;

use crate::models::{ErrorKind, PartStatus};

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("unknown part status '{0}'")]
    Unknown(String),
    #[error("part {part_number}: illegal status transition {from} -> {to}")]
    Illegal {
        part_number: String,
        from: PartStatus,
        to: PartStatus,
    },
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("cannot read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse catalog: {0}")]
    Parse(String),
    #[error("page {0} is out of range")]
    PageOutOfRange(usize),
    #[error("page {page}: {message}")]
    Page { page: usize, message: String },
}

/// Failures reported by the browser collaborator.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, String),
    #[error("no such element: {0}")]
    NotFound(String),
    #[error("browser session lost: {0}")]
    SessionLost(String),
    #[error("webdriver protocol error: {0}")]
    Protocol(String),
    #[error("webdriver transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl BrowserError {
    /// Whether the driver itself is gone, as opposed to a single command failing.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            BrowserError::SessionLost(_) => true,
            BrowserError::Transport(e) => e.is_connect(),
            _ => false,
        }
    }
}

/// A single price lookup that did not produce a usable answer.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("timed out waiting for lookup results")]
    Timeout,
    #[error("portal is throttling requests")]
    RateLimited,
    #[error("lookup form element missing: {0}")]
    MissingElement(String),
    #[error("price {0} outside accepted range")]
    OutOfRange(rust_decimal::Decimal),
    #[error(transparent)]
    Browser(BrowserError),
}

impl LookupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LookupError::Timeout => ErrorKind::Network,
            LookupError::RateLimited => ErrorKind::RateLimit,
            LookupError::MissingElement(_) => ErrorKind::Unexpected,
            LookupError::OutOfRange(_) => ErrorKind::Validation,
            LookupError::Browser(_) => ErrorKind::Unexpected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LookupError::Timeout | LookupError::RateLimited)
    }
}

impl From<BrowserError> for LookupError {
    fn from(e: BrowserError) -> Self {
        match e {
            BrowserError::Timeout(..) => LookupError::Timeout,
            BrowserError::NotFound(what) => LookupError::MissingElement(what),
            other => LookupError::Browser(other),
        }
    }
}

/// Failures that end the whole pricing phase.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no credentials configured for '{0}'")]
    MissingCredentials(String),
    #[error("login rejected by {0}")]
    LoginRejected(String),
    #[error("login page did not load: {0}")]
    LoginTimeout(BrowserError),
    #[error("price lookup page unreachable: {0}")]
    LookupUnreachable(BrowserError),
    #[error("illegal session transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },
    #[error("browser driver failure: {0}")]
    Driver(BrowserError),
    #[error("price fetch aborted: {0}")]
    Panicked(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::MissingCredentials(_)
            | SessionError::LoginRejected(_)
            | SessionError::LoginTimeout(_) => ErrorKind::LoginFailure,
            SessionError::LookupUnreachable(_) => ErrorKind::Network,
            SessionError::IllegalTransition { .. }
            | SessionError::Driver(_)
            | SessionError::Panicked(_) => ErrorKind::Unexpected,
        }
    }
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
