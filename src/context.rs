//! The per-request context.
//!
//! A [`Context`] is one unit of work in flight: the request metadata the
//! transport filled in, a [`Response`] for middleware to write into, a
//! cancellation source, an event emitter and a tracing span that doubles as
//! the context's logger.
//!
//! # Ownership
//!
//! `Context` is a cheap handle (`Arc` inside). Cloning it does not copy the
//! request; it lets the context travel into a continuation (see
//! [`Next::context`](crate::Next::context)) while the caller keeps a handle
//! for disposal. One context belongs to exactly one pipeline run. Sharing it
//! across concurrent runs is not supported.
//!
//! # Lifecycle
//!
//! ```text
//! Factory::create_context()     every required field populated
//!        ↓
//! pipeline.call(ctx.clone())    middleware reads and mutates fields
//!        ↓
//! ctx.dispose()                 token cancelled, fields cleared, writes fail
//! ```
//!
//! [`Context::using`] wraps the last two steps so disposal happens on every
//! exit path.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Extensions, HeaderMap};
use parking_lot::Mutex;
use tracing::{Span, debug};

use crate::cancel::{CancelReason, CancellationToken, CancellationTokenSource};
use crate::error::{Error, Result};
use crate::events::{self, Events};
use crate::response::Response;

/// Version of the context contract carried by every context.
pub const VERSION: &str = "1.0";

/// Canonical key names of the context contract.
///
/// Used by [`Context::contains_key`] and as field names in log output.
pub mod keys {
    pub const VERSION: &str = "strand.Version";
    pub const SEQ: &str = "strand.Seq";
    pub const EVENTS: &str = "strand.Events";
    pub const CANCEL_TOKEN: &str = "strand.CancelToken";
    pub const CANCEL_SOURCE: &str = "server.CancelTokenSource";
    pub const LOGGER: &str = "server.Logger";
    pub const RESPONSE: &str = "strand.Response";

    pub const METHOD: &str = "strand.Method";
    pub const PATH: &str = "strand.Path";
    pub const PATH_BASE: &str = "strand.PathBase";
    pub const HOST: &str = "strand.Host";
    pub const SCHEME: &str = "strand.Scheme";
    pub const QUERY_STRING: &str = "strand.QueryString";
    pub const PROTOCOL: &str = "strand.Protocol";
    pub const HEADERS: &str = "strand.Headers";
    pub const BODY: &str = "strand.Body";

    /// Keys that live as long as the context itself.
    pub const LIFETIME: &[&str] = &[
        VERSION, SEQ, EVENTS, CANCEL_TOKEN, CANCEL_SOURCE, LOGGER, RESPONSE,
    ];

    /// Keys cleared by disposal.
    pub const REQUEST_SCOPED: &[&str] = &[
        METHOD, PATH, PATH_BASE, HOST, SCHEME, QUERY_STRING, PROTOCOL, HEADERS, BODY,
    ];
}

// ── Fields ────────────────────────────────────────────────────────────────────

/// The request-scoped part of a context. Absent once disposed.
#[derive(Clone, Debug, Default)]
pub struct Fields {
    pub method: String,
    pub path: String,
    pub path_base: String,
    pub host: String,
    pub scheme: String,
    pub query_string: String,
    pub protocol: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

// ── Inner ─────────────────────────────────────────────────────────────────────

pub(crate) struct Inner {
    seq: u64,
    span: Span,
    cancel: CancellationTokenSource,
    pub(crate) events: Events,
    fields: Mutex<Option<Fields>>,
    extensions: Mutex<Extensions>,
    response: Response,
    pub(crate) disposed: AtomicBool,
}

impl Drop for Inner {
    // Listeners registered on a context that was never disposed still hear
    // about its end.
    fn drop(&mut self) {
        self.cancel.cancel(CancelReason::Disposed);
    }
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Handle to one in-flight unit of work. See the module docs.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    pub(crate) fn new(seq: u64, fields: Fields) -> Self {
        let span = tracing::debug_span!("context", seq);
        let inner = Arc::new_cyclic(|weak| Inner {
            seq,
            span,
            cancel: CancellationTokenSource::new(),
            events: Events::new(),
            fields: Mutex::new(Some(fields)),
            extensions: Mutex::new(Extensions::new()),
            response: Response::new(weak.clone()),
            disposed: AtomicBool::new(false),
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    // ── Lifetime keys ─────────────────────────────────────────────────────────

    pub fn version(&self) -> &'static str {
        VERSION
    }

    /// Sequence number assigned by the issuing factory.
    pub fn seq(&self) -> u64 {
        self.inner.seq
    }

    /// The context's logger: a span every pipeline run is instrumented with.
    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    pub fn events(&self) -> &Events {
        &self.inner.events
    }

    pub fn cancel_source(&self) -> &CancellationTokenSource {
        &self.inner.cancel
    }

    pub fn token(&self) -> &CancellationToken {
        self.inner.cancel.token()
    }

    pub fn response(&self) -> &Response {
        &self.inner.response
    }

    /// Returns `true` if `key` names a canonical key that currently holds a
    /// value. Request-scoped keys report `false` after disposal.
    pub fn contains_key(&self, key: &str) -> bool {
        if keys::LIFETIME.contains(&key) {
            return true;
        }
        keys::REQUEST_SCOPED.contains(&key) && self.inner.fields.lock().is_some()
    }

    // ── Request-scoped fields ─────────────────────────────────────────────────

    /// Runs `f` against the request fields. `None` once disposed.
    pub fn read<R>(&self, f: impl FnOnce(&Fields) -> R) -> Option<R> {
        self.inner.fields.lock().as_ref().map(f)
    }

    /// Runs `f` against the mutable request fields.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] once the context has been disposed.
    pub fn update<R>(&self, f: impl FnOnce(&mut Fields) -> R) -> Result<R> {
        self.inner.fields.lock().as_mut().map(f).ok_or(Error::Disposed)
    }

    pub fn method(&self) -> Option<String> {
        self.read(|f| f.method.clone())
    }

    pub fn set_method(&self, method: impl Into<String>) -> Result<()> {
        let method = method.into();
        self.update(|f| f.method = method)
    }

    pub fn path(&self) -> Option<String> {
        self.read(|f| f.path.clone())
    }

    pub fn set_path(&self, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        self.update(|f| f.path = path)
    }

    pub fn path_base(&self) -> Option<String> {
        self.read(|f| f.path_base.clone())
    }

    pub fn host(&self) -> Option<String> {
        self.read(|f| f.host.clone())
    }

    pub fn scheme(&self) -> Option<String> {
        self.read(|f| f.scheme.clone())
    }

    pub fn query_string(&self) -> Option<String> {
        self.read(|f| f.query_string.clone())
    }

    pub fn protocol(&self) -> Option<String> {
        self.read(|f| f.protocol.clone())
    }

    pub fn headers(&self) -> Option<HeaderMap> {
        self.read(|f| f.headers.clone())
    }

    /// First value of header `name`, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<String> {
        self.read(|f| {
            f.headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        })
        .flatten()
    }

    /// Appends a request header value, keeping existing values.
    pub fn append_header(&self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.update(|f| {
            f.headers.append(name, value);
        })
    }

    pub fn body(&self) -> Option<Bytes> {
        self.read(|f| f.body.clone())
    }

    /// Path plus query string, e.g. `/users?page=2`.
    pub fn url(&self) -> Option<String> {
        self.read(|f| {
            if f.query_string.is_empty() {
                f.path.clone()
            } else {
                format!("{}?{}", f.path, f.query_string)
            }
        })
    }

    // ── Extensions ────────────────────────────────────────────────────────────

    /// Stores a typed value on the context, returning the previous one.
    pub fn insert<T>(&self, value: T) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        Ok(self.inner.extensions.lock().insert(value))
    }

    pub fn get<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.inner.extensions.lock().get::<T>().cloned()
    }

    // ── Disposal ──────────────────────────────────────────────────────────────

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Cancels the context's token and clears every request-scoped key.
    ///
    /// Idempotent: only the first call does anything.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.cancel.cancel(CancelReason::Disposed);
        self.inner.events.emit(events::DISPOSE, &self.inner.seq.to_string());

        *self.inner.fields.lock() = None;
        self.inner.response.clear();
        self.inner.extensions.lock().clear();
        self.inner.events.close();

        debug!(parent: &self.inner.span, "context disposed");
    }

    /// Runs `work` and disposes the context once it settles.
    ///
    /// `work` is either a closure receiving the context and returning a
    /// future, or a future already in flight. Its output is passed through
    /// untouched. Disposal also happens if `work` panics or the returned
    /// future is dropped before completing.
    ///
    /// ```rust
    /// # async fn demo(factory: strand::Factory, app: strand::Pipeline<String>) {
    /// let ctx = factory.create_context();
    /// let out = ctx.using(|ctx: strand::Context| app.call(ctx)).await;
    /// assert!(ctx.is_disposed());
    /// # let _ = out;
    /// # }
    /// ```
    pub async fn using<W, M>(&self, work: W) -> W::Output
    where
        W: ScopedWork<M>,
    {
        let _guard = DisposeGuard(self);
        work.start(self).await
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("seq", &self.inner.seq)
            .field("disposed", &self.is_disposed())
            .field("fields", &*self.inner.fields.lock())
            .finish_non_exhaustive()
    }
}

struct DisposeGuard<'a>(&'a Context);

impl Drop for DisposeGuard<'_> {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

// ── Scoped work ───────────────────────────────────────────────────────────────

/// Work accepted by [`Context::using`].
///
/// Implemented for `FnOnce(Context) -> impl Future` and for any future. The
/// `M` parameter only keeps the two impls apart; callers never name it.
pub trait ScopedWork<M> {
    type Output;
    type Future: Future<Output = Self::Output>;

    fn start(self, ctx: &Context) -> Self::Future;
}

#[doc(hidden)]
pub struct WithContext;

#[doc(hidden)]
pub struct InFlight;

impl<F, Fut> ScopedWork<WithContext> for F
where
    F: FnOnce(Context) -> Fut,
    Fut: Future,
{
    type Output = Fut::Output;
    type Future = Fut;

    fn start(self, ctx: &Context) -> Fut {
        self(ctx.clone())
    }
}

impl<Fut> ScopedWork<InFlight> for Fut
where
    Fut: Future,
{
    type Output = Fut::Output;
    type Future = Fut;

    fn start(self, _ctx: &Context) -> Fut {
        self
    }
}
