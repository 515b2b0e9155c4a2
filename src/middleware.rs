//! Middleware registration and the continuation type.
//!
//! # Three calling conventions, one chain
//!
//! [`App::with`](crate::App::with) accepts three shapes of async function
//! plus any type implementing [`Middleware`]:
//!
//! ```text
//! |ctx: Context, next: Next<T>| async { … }          context-style
//! |next: Next<T>| async { next.context() … }         fast-style: context bound to `next`
//! |req: LegacyRequest, res: LegacyResponse| async {…} legacy request/response pair
//! impl Middleware<T> for MyType                       stateful (routers, static files, …)
//! ```
//!
//! The shape is decided once, at registration, from the parameter types of
//! the function. Each shape becomes one variant of [`Entry`]; the pipeline
//! never re-inspects a handler while running.
//!
//! ```text
//! app.with(handler)
//!        ↓ IntoMiddleware<T, Marker> picks the impl by parameter types
//! Entry::Context(Arc<dyn Fn(Context, Next<T>) -> BoxFuture<T>>)
//!        ↓ stored in App, frozen into Arc<[Entry<T>]> by build()
//! next.run()  →  chain[index].call(ctx, Next { index + 1 })
//! ```
//!
//! # Calling `next` twice
//!
//! [`Next::run`] takes `self`, so each continuation can be driven at most
//! once. Calling it twice is rejected by the compiler:
//!
//! ```rust,compile_fail
//! use strand::{App, Context, Next};
//!
//! let app = App::<()>::new().with(|_ctx: Context, next: Next<()>| async move {
//!     next.run().await?;
//!     next.run().await
//! });
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::trace;

use crate::context::Context;
use crate::error::Result;
use crate::legacy::{LegacyRequest, LegacyResponse};

// ── Shared types ──────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future resolving to a middleware outcome.
///
/// `Send + 'static` so the HTTP server can drive pipelines on any tokio
/// worker thread.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;

/// Middleware implemented on a type rather than written as a closure.
///
/// Routers, static-file serving and the template installer use this form
/// because they carry configuration.
pub trait Middleware<T>: Send + Sync + 'static {
    fn handle(&self, ctx: Context, next: Next<T>) -> BoxFuture<T>;
}

/// One registered handler, tagged with its calling convention.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// signature of the public [`IntoMiddleware`] trait.
#[doc(hidden)]
pub enum Entry<T> {
    Context(Arc<dyn Fn(Context, Next<T>) -> BoxFuture<T> + Send + Sync>),
    Fast(Arc<dyn Fn(Next<T>) -> BoxFuture<T> + Send + Sync>),
    Legacy(Arc<dyn Fn(LegacyRequest, LegacyResponse) -> BoxFuture<()> + Send + Sync>),
    Stateful(Arc<dyn Middleware<T>>),
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Context(f)  => Self::Context(Arc::clone(f)),
            Self::Fast(f)     => Self::Fast(Arc::clone(f)),
            Self::Legacy(f)   => Self::Legacy(Arc::clone(f)),
            Self::Stateful(m) => Self::Stateful(Arc::clone(m)),
        }
    }
}

impl<T: Default + Send + 'static> Entry<T> {
    pub(crate) fn call(&self, ctx: Context, next: Next<T>) -> BoxFuture<T> {
        match self {
            Self::Context(f)  => f(ctx, next),
            Self::Fast(f)     => f(next),
            Self::Stateful(m) => m.handle(ctx, next),
            Self::Legacy(f) => {
                let done = f(LegacyRequest::new(ctx.clone()), LegacyResponse::new(ctx.clone()));
                Box::pin(async move {
                    done.await?;
                    // A legacy handler has no continuation of its own: ending
                    // the response terminates the chain, anything else falls
                    // through to the next handler.
                    if ctx.response().body().is_finished() {
                        Ok(T::default())
                    } else {
                        next.run().await
                    }
                })
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Context(_)  => "context",
            Self::Fast(_)     => "fast",
            Self::Legacy(_)   => "legacy",
            Self::Stateful(_) => "stateful",
        }
    }
}

// ── Next ──────────────────────────────────────────────────────────────────────

/// The continuation handed to every middleware.
///
/// Holds the context and the suffix of the chain that has not run yet.
/// [`run`](Next::run) invokes the next handler; dropping `Next` without
/// running it ends the pipeline with the current handler's result.
pub struct Next<T> {
    ctx: Context,
    chain: Arc<[Entry<T>]>,
    index: usize,
}

impl<T: Default + Send + 'static> Next<T> {
    pub(crate) fn start(ctx: Context, chain: Arc<[Entry<T>]>) -> Self {
        Self { ctx, chain, index: 0 }
    }

    /// The context this continuation is bound to.
    ///
    /// Fast-style middleware receives only `Next`, so this is how it reaches
    /// the context.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Number of handlers still waiting behind this continuation.
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.index)
    }

    /// Runs the rest of the chain.
    ///
    /// Past the last handler this resolves immediately with `T::default()`.
    pub fn run(self) -> BoxFuture<T> {
        let Some(entry) = self.chain.get(self.index).cloned() else {
            return Box::pin(async { Ok(T::default()) });
        };
        trace!(index = self.index, kind = entry.kind(), "middleware");

        let next = Next {
            ctx: self.ctx.clone(),
            chain: Arc::clone(&self.chain),
            index: self.index + 1,
        };
        entry.call(self.ctx, next)
    }
}

// ── IntoMiddleware ────────────────────────────────────────────────────────────

/// Implemented for every value [`App::with`](crate::App::with) accepts.
///
/// You never implement this yourself; implement [`Middleware`] instead.
/// `M` is a marker naming the calling convention so the blanket impls below
/// do not overlap. The trait is sealed.
pub trait IntoMiddleware<T, M>: private::Sealed<T, M> + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_entry(self) -> Entry<T>;
}

mod private {
    pub trait Sealed<T, M> {}
}

/// Marker for types implementing [`Middleware`].
#[doc(hidden)]
pub struct Stateful;

impl<T, F, Fut> private::Sealed<T, (Context, Next<T>)> for F
where
    F: Fn(Context, Next<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
}

impl<T, F, Fut> IntoMiddleware<T, (Context, Next<T>)> for F
where
    F: Fn(Context, Next<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    fn into_entry(self) -> Entry<T> {
        Entry::Context(Arc::new(move |ctx: Context, next: Next<T>| -> BoxFuture<T> {
            Box::pin(self(ctx, next))
        }))
    }
}

impl<T, F, Fut> private::Sealed<T, (Next<T>,)> for F
where
    F: Fn(Next<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
}

impl<T, F, Fut> IntoMiddleware<T, (Next<T>,)> for F
where
    F: Fn(Next<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    fn into_entry(self) -> Entry<T> {
        Entry::Fast(Arc::new(move |next: Next<T>| -> BoxFuture<T> {
            Box::pin(self(next))
        }))
    }
}

impl<T, F, Fut> private::Sealed<T, (LegacyRequest, LegacyResponse)> for F
where
    F: Fn(LegacyRequest, LegacyResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
}

impl<T, F, Fut> IntoMiddleware<T, (LegacyRequest, LegacyResponse)> for F
where
    F: Fn(LegacyRequest, LegacyResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn into_entry(self) -> Entry<T> {
        Entry::Legacy(Arc::new(move |req: LegacyRequest, res: LegacyResponse| -> BoxFuture<()> {
            Box::pin(self(req, res))
        }))
    }
}

impl<T, S: Middleware<T>> private::Sealed<T, Stateful> for S {}

impl<T, S: Middleware<T>> IntoMiddleware<T, Stateful> for S {
    fn into_entry(self) -> Entry<T> {
        Entry::Stateful(Arc::new(self))
    }
}
