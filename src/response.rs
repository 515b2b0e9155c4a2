//! The response half of a context.
//!
//! Every [`Context`] owns exactly one [`Response`]. Middleware writes a
//! status, headers and body into it; the HTTP adapter turns it into an
//! `http::Response` once the pipeline settles. The response only keeps a
//! weak pointer back to its context, so the context alone decides when
//! both go away.

use std::sync::Weak;
use std::sync::atomic::Ordering;

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::context::{Context, Inner};
use crate::error::{Error, Result};
use crate::events;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for [`Response::set_content_type`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Css,          // text/css
    Html,         // text/html; charset=utf-8
    Javascript,   // text/javascript
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Png,          // image/png
    Svg,          // image/svg+xml
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Css         => "text/css",
            Self::Html        => "text/html; charset=utf-8",
            Self::Javascript  => "text/javascript",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Png         => "image/png",
            Self::Svg         => "image/svg+xml",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }

    /// Guesses a content type from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "css"          => Self::Css,
            "htm" | "html" => Self::Html,
            "js" | "mjs"   => Self::Javascript,
            "json"         => Self::Json,
            "png"          => Self::Png,
            "svg"          => Self::Svg,
            "txt"          => Self::Text,
            "xml"          => Self::Xml,
            _              => Self::OctetStream,
        }
    }
}

// ── ResponseBody ──────────────────────────────────────────────────────────────

/// A writable, append-only byte stream with a one-shot finish signal.
pub struct ResponseBody {
    buf: Mutex<BytesMut>,
    finished: watch::Sender<bool>,
}

impl ResponseBody {
    pub(crate) fn new() -> Self {
        Self {
            buf: Mutex::new(BytesMut::new()),
            finished: watch::Sender::new(false),
        }
    }

    /// Appends `data`. Fails once the body has been ended.
    pub fn write(&self, data: impl AsRef<[u8]>) -> Result<()> {
        let mut buf = self.buf.lock();
        if self.is_finished() {
            return Err(Error::BodyEnded);
        }
        buf.extend_from_slice(data.as_ref());
        Ok(())
    }

    /// Appends `data` and marks the body finished, waking every
    /// [`finished`](Self::finished) waiter.
    pub fn end(&self, data: impl AsRef<[u8]>) -> Result<()> {
        let mut buf = self.buf.lock();
        if self.is_finished() {
            return Err(Error::BodyEnded);
        }
        buf.extend_from_slice(data.as_ref());
        self.finished.send_replace(true);
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Resolves once the body has been ended.
    pub async fn finished(&self) {
        let mut rx = self.finished.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.lock().is_empty()
    }

    /// Copy of everything written so far.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf.lock())
    }

    /// Everything written so far, lossily decoded as UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }

    pub(crate) fn take(&self) -> Bytes {
        self.buf.lock().split().freeze()
    }

    /// Drops the buffer and leaves the body ended so later writes fail.
    pub(crate) fn close(&self) {
        let mut buf = self.buf.lock();
        *buf = BytesMut::new();
        self.finished.send_replace(true);
    }
}

// ── Response ──────────────────────────────────────────────────────────────────

/// Status, headers and body written by middleware.
pub struct Response {
    parent: Weak<Inner>,
    status: Mutex<Option<StatusCode>>,
    headers: Mutex<HeaderMap>,
    body: ResponseBody,
}

impl Response {
    pub(crate) fn new(parent: Weak<Inner>) -> Self {
        Self {
            parent,
            status: Mutex::new(None),
            headers: Mutex::new(HeaderMap::new()),
            body: ResponseBody::new(),
        }
    }

    /// The owning context, unless it is already being torn down.
    pub fn parent(&self) -> Option<Context> {
        self.parent.upgrade().map(Context::from_inner)
    }

    /// The status set by middleware, if any.
    pub fn status(&self) -> Option<StatusCode> {
        *self.status.lock()
    }

    pub fn set_status(&self, status: StatusCode) -> Result<()> {
        self.ensure_live()?;
        *self.status.lock() = Some(status);
        Ok(())
    }

    pub fn headers(&self) -> HeaderMap {
        self.headers.lock().clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .lock()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// Sets `name` to `value`, replacing previous values.
    pub fn set_header(&self, name: &str, value: &str) -> Result<()> {
        self.ensure_live()?;
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.lock().insert(name, value);
        Ok(())
    }

    pub fn set_content_type(&self, content_type: ContentType) -> Result<()> {
        self.ensure_live()?;
        self.headers
            .lock()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        Ok(())
    }

    /// Sets the status and a batch of headers in one call.
    pub fn write_head(&self, status: StatusCode, headers: &[(&str, &str)]) -> Result<()> {
        self.set_status(status)?;
        for (name, value) in headers {
            self.set_header(name, value)?;
        }
        Ok(())
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn write(&self, data: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_live()?;
        self.body.write(data)
    }

    /// Ends the body and emits [`events::RESPONSE_FINISH`] on the context.
    pub fn end(&self, data: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_live()?;
        self.body.end(data)?;
        if let Some(parent) = self.parent.upgrade() {
            parent.events.emit(events::RESPONSE_FINISH, &self.body.len().to_string());
        }
        Ok(())
    }

    /// `true` while no middleware has set a status or touched the body.
    pub(crate) fn is_untouched(&self) -> bool {
        self.status().is_none() && self.body.is_empty() && !self.body.is_finished()
    }

    pub(crate) fn take_parts(&self) -> (Option<StatusCode>, HeaderMap, Bytes) {
        let headers = std::mem::take(&mut *self.headers.lock());
        (self.status(), headers, self.body.take())
    }

    pub(crate) fn clear(&self) {
        *self.status.lock() = None;
        self.headers.lock().clear();
        self.body.close();
    }

    fn ensure_live(&self) -> Result<()> {
        match self.parent.upgrade() {
            Some(parent) if !parent.disposed.load(Ordering::Acquire) => Ok(()),
            _ => Err(Error::Disposed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_end_then_reject() {
        let body = ResponseBody::new();
        body.write("Hello ").unwrap();
        body.end("World").unwrap();
        assert!(body.is_finished());
        assert_eq!(body.text(), "Hello World");
        assert!(matches!(body.write("!"), Err(Error::BodyEnded)));
        assert!(matches!(body.end("!"), Err(Error::BodyEnded)));
        assert_eq!(body.len(), 11);
    }

    #[tokio::test]
    async fn finished_wakes_after_end() {
        let body = std::sync::Arc::new(ResponseBody::new());
        let waiter = {
            let body = std::sync::Arc::clone(&body);
            tokio::spawn(async move {
                body.finished().await;
                body.text()
            })
        };
        tokio::task::yield_now().await;
        body.end("done").unwrap();
        assert_eq!(waiter.await.unwrap(), "done");
    }

    #[test]
    fn close_drops_content_and_blocks_writes() {
        let body = ResponseBody::new();
        body.write("partial").unwrap();
        body.close();
        assert!(body.is_empty());
        assert!(body.write("more").is_err());
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(ContentType::from_extension("HTML"), ContentType::Html);
        assert_eq!(ContentType::from_extension("css"), ContentType::Css);
        assert_eq!(ContentType::from_extension("bin"), ContentType::OctetStream);
    }
}
