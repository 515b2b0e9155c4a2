//! The app builder.
//!
//! Register middleware in order with [`App::with`], then freeze the list
//! with [`App::build`] (or [`App::build_http`] for the hyper adapter). The
//! result is a [`Pipeline`]: one callable that threads a context through
//! every handler.
//!
//! ```text
//! pipeline.call(ctx)
//!   └─ h0(ctx, next₁)
//!        └─ next₁.run() → h1(ctx, next₂)
//!                           └─ next₂.run() → … → Ok(T::default())
//! ```
//!
//! Each continuation closes over the untouched suffix of the chain, so
//! handlers run strictly one after another. A handler that returns without
//! running `next` ends the pipeline with its own value; a handler that
//! returns `Err` ends it with that error and nothing behind it runs.
//!
//! `build` consumes the builder, so an app cannot be built twice:
//!
//! ```rust,compile_fail
//! let app = strand::App::<()>::new();
//! let first = app.build();
//! let second = app.build();
//! ```

use std::sync::Arc;

use tracing::instrument::Instrumented;
use tracing::{Instrument, debug};

use crate::adapter::HttpApp;
use crate::context::Context;
use crate::error::Error;
use crate::middleware::{BoxFuture, Entry, IntoMiddleware, Next};

/// Ordered middleware registration.
///
/// `T` is the value a pipeline run resolves with; `()` for plain HTTP apps.
pub struct App<T = ()> {
    entries: Vec<Entry<T>>,
}

impl<T: Default + Send + 'static> App<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Appends a middleware. Returns `self` for chaining.
    ///
    /// ```rust
    /// use strand::{App, Context, Next};
    ///
    /// let app = App::<String>::new()
    ///     .with(|ctx: Context, next: Next<String>| async move {
    ///         ctx.set_method("GET")?;
    ///         next.run().await
    ///     })
    ///     .with(|next: Next<String>| async move {
    ///         next.context().set_method("PUT")?;
    ///         Ok("ABC".to_owned())
    ///     });
    /// assert_eq!(app.len(), 2);
    /// ```
    pub fn with<M>(mut self, middleware: impl IntoMiddleware<T, M>) -> Self {
        self.entries.push(middleware.into_entry());
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freezes the registered middleware into a callable pipeline.
    pub fn build(self) -> Pipeline<T> {
        debug!(middleware = self.entries.len(), "pipeline built");
        Pipeline { chain: self.entries.into() }
    }

    /// Builds the pipeline and wraps it for the hyper server.
    pub fn build_http(self) -> HttpApp<T> {
        HttpApp::new(self.build())
    }
}

impl<T: Default + Send + 'static> Default for App<T> {
    fn default() -> Self { Self::new() }
}

/// A compiled middleware chain. Cheap to clone.
pub struct Pipeline<T = ()> {
    chain: Arc<[Entry<T>]>,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self { chain: Arc::clone(&self.chain) }
    }
}

impl<T: Default + Send + 'static> Pipeline<T> {
    /// Runs `ctx` through every handler.
    ///
    /// The returned future is instrumented with the context's span.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] if `ctx` was disposed before the call; otherwise
    /// the first error any handler returned.
    pub fn call(&self, ctx: Context) -> Instrumented<BoxFuture<T>> {
        let run: BoxFuture<T> = if ctx.is_disposed() {
            Box::pin(async { Err(Error::Disposed) })
        } else {
            Next::start(ctx.clone(), Arc::clone(&self.chain)).run()
        };
        run.instrument(ctx.span().clone())
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Factory;
    use parking_lot::Mutex;

    fn recorder() -> Arc<Mutex<Vec<usize>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn both_conventions_update_the_context() {
        let app = App::<String>::new()
            .with(|ctx: Context, next: Next<String>| async move {
                ctx.set_method("GET")?;
                next.run().await
            })
            .with(|next: Next<String>| async move {
                let ctx = next.context();
                assert_eq!(ctx.method().as_deref(), Some("GET"));
                ctx.set_method("PUT")?;
                Ok("ABC".to_owned())
            })
            .build();

        let ctx = Factory::new().create_context();
        let value = app.call(ctx.clone()).await.unwrap();
        assert_eq!(value, "ABC");
        assert_eq!(ctx.method().as_deref(), Some("PUT"));

        ctx.dispose();
        assert_eq!(ctx.method(), None);
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let seen = recorder();
        let mut app = App::<()>::new();
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            app = app.with(move |_ctx: Context, next: Next<()>| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push(i);
                    next.run().await?;
                    seen.lock().push(10 + i);
                    Ok(())
                }
            });
        }
        app.build().call(Factory::new().create_context()).await.unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4, 14, 13, 12, 11, 10]);
    }

    #[tokio::test]
    async fn handler_that_skips_next_short_circuits() {
        for k in 0..4 {
            let seen = recorder();
            let mut app = App::<usize>::new();
            for i in 0..4 {
                let seen = Arc::clone(&seen);
                app = app.with(move |_ctx: Context, next: Next<usize>| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.lock().push(i);
                        if i == k { Ok(i * 100) } else { next.run().await }
                    }
                });
            }
            let out = app.build().call(Factory::new().create_context()).await.unwrap();
            assert_eq!(out, k * 100);
            assert_eq!(*seen.lock(), (0..=k).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn error_stops_the_chain() {
        let seen = recorder();
        let s = Arc::clone(&seen);
        let app = App::<()>::new()
            .with(|_ctx: Context, next: Next<()>| async move { next.run().await })
            .with(|_ctx: Context, _next: Next<()>| async move {
                Err::<(), _>(Error::msg("rejected"))
            })
            .with(move |_ctx: Context, next: Next<()>| {
                let s = Arc::clone(&s);
                async move {
                    s.lock().push(2);
                    next.run().await
                }
            })
            .build();

        let err = app.call(Factory::new().create_context()).await.unwrap_err();
        assert_eq!(err.to_string(), "rejected");
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_pipeline_resolves_with_default() {
        let app = App::<u8>::new().build();
        assert!(app.is_empty());
        assert_eq!(app.call(Factory::new().create_context()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn last_handler_calling_next_gets_default() {
        let app = App::<String>::new()
            .with(|next: Next<String>| async move {
                assert_eq!(next.remaining(), 0);
                next.run().await
            })
            .build();
        let out = app.call(Factory::new().create_context()).await.unwrap();
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn disposed_context_is_refused() {
        let ran = Arc::new(Mutex::new(false));
        let r = Arc::clone(&ran);
        let app = App::<()>::new()
            .with(move |_ctx: Context, _next: Next<()>| {
                let r = Arc::clone(&r);
                async move {
                    *r.lock() = true;
                    Ok(())
                }
            })
            .build();
        let ctx = Factory::new().create_context();
        ctx.dispose();
        assert!(matches!(app.call(ctx).await, Err(Error::Disposed)));
        assert!(!*ran.lock());
    }

    #[tokio::test]
    async fn using_disposes_after_pipeline() {
        let app = App::<String>::new()
            .with(|ctx: Context, _next: Next<String>| async move {
                ctx.set_method("PUT")?;
                Ok("ABC".to_owned())
            })
            .build();

        let ctx = Factory::new().create_context();
        let value = ctx.using(|ctx: Context| app.call(ctx)).await.unwrap();
        assert_eq!(value, "ABC");
        tokio::task::yield_now().await;
        assert_eq!(ctx.method(), None);
        assert!(ctx.token().is_cancelled());

        let ctx = Factory::new().create_context();
        let observer = ctx.clone();
        let in_flight = async move {
            let value = app.call(observer.clone()).await?;
            assert_eq!(observer.method().as_deref(), Some("PUT"));
            Ok::<_, Error>(value)
        };
        let value = ctx.using(in_flight).await.unwrap();
        assert_eq!(value, "ABC");
        tokio::task::yield_now().await;
        assert_eq!(ctx.method(), None);
    }
}
