//! Request/response views for two-argument handlers.
//!
//! Some handlers are written against a plain `(request, response)` pair
//! instead of a context and a continuation. [`LegacyRequest`] and
//! [`LegacyResponse`] are thin views over the same [`Context`], so such a
//! handler can sit anywhere in a chain next to context-style middleware.
//!
//! A legacy handler cannot call `next`. After it returns, the chain stops if
//! the handler ended the response and continues otherwise.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::context::Context;
use crate::error::{Error, Result};

/// Read side of a legacy handler: method, url, headers, body.
pub struct LegacyRequest {
    ctx: Context,
}

impl LegacyRequest {
    pub(crate) fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// The request method. Empty once the context is disposed.
    pub fn method(&self) -> String {
        self.ctx.method().unwrap_or_default()
    }

    /// Path and query string, e.g. `/search?q=rust`.
    pub fn url(&self) -> String {
        self.ctx.url().unwrap_or_default()
    }

    pub fn headers(&self) -> HeaderMap {
        self.ctx.headers().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.ctx.header(name)
    }

    pub fn body(&self) -> Bytes {
        self.ctx.body().unwrap_or_default()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

/// Write side of a legacy handler.
pub struct LegacyResponse {
    ctx: Context,
}

impl LegacyResponse {
    pub(crate) fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Sets the status code and a batch of headers.
    pub fn write_head(&self, status: u16, headers: &[(&str, &str)]) -> Result<()> {
        let status = StatusCode::from_u16(status).map_err(Error::msg)?;
        self.ctx.response().write_head(status, headers)
    }

    pub fn set_header(&self, name: &str, value: &str) -> Result<()> {
        self.ctx.response().set_header(name, value)
    }

    /// The status written so far, `200` when none was set.
    pub fn status_code(&self) -> u16 {
        self.ctx.response().status().unwrap_or(StatusCode::OK).as_u16()
    }

    pub fn write(&self, data: impl AsRef<[u8]>) -> Result<()> {
        self.ctx.response().write(data)
    }

    pub fn end(&self, data: impl AsRef<[u8]>) -> Result<()> {
        self.ctx.response().end(data)
    }

    pub fn finished(&self) -> bool {
        self.ctx.response().body().is_finished()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }
}
