//! Unified error type.

use std::fmt;

/// Convenience alias used across strand's fallible operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by strand's fallible operations.
///
/// Only handler errors are meant to reach whoever invoked a pipeline: a
/// middleware returns `Err`, the chain stops, and the pipeline future
/// resolves to that error. Failures inside disposal or cancellation
/// listeners are logged and swallowed; they never show up here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Work was attempted on a context that has already been disposed.
    #[error("context has been disposed")]
    Disposed,

    /// A write was attempted after the response body was ended.
    #[error("response body already ended")]
    BodyEnded,

    #[error("invalid header `{0}`")]
    InvalidHeader(String),

    /// `Context::render` was called without the templates middleware
    /// installed upstream.
    #[error("no template renderer installed on this context")]
    NoRenderer,

    /// No template engine is registered for the view's extension.
    #[error("no template engine registered for `{0}`")]
    NoEngine(String),

    #[error("invalid socket address `{0}`")]
    Addr(String),

    #[error("{0}")]
    Message(String),

    /// An arbitrary failure raised by application middleware.
    #[error(transparent)]
    Handler(Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Builds an [`Error::Message`] from anything printable.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::Message(message.to_string())
    }

    /// Wraps an application error so it can be returned from a middleware.
    pub fn handler(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Handler(Box::new(err))
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(e: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(e.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(e.to_string())
    }
}
