//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. A [`Router`] is itself a
//! middleware: register it with [`App::with`](crate::App::with) and it
//! dispatches on the context's method and path. Route handlers are ordinary
//! middleware, so they receive `next` and may continue the chain. Requests
//! no route matches go straight to the next middleware.

use std::collections::HashMap;

use matchit::Router as MatchitRouter;
use tracing::trace;

use crate::context::Context;
use crate::method::Method;
use crate::middleware::{BoxFuture, Entry, IntoMiddleware, Middleware, Next};

/// Path parameters captured by the matched route.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Params(HashMap<String, String>);

impl Params {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Context {
    /// Returns a named path parameter of the matched route.
    ///
    /// For a route `/users/{id}`, `ctx.param("id")` on `/users/42` returns
    /// `Some("42")`.
    pub fn param(&self, key: &str) -> Option<String> {
        self.get::<Params>()?.get(key).map(str::to_owned)
    }
}

/// Per-verb route table.
///
/// Each registration returns `self` so routes chain naturally:
///
/// ```rust
/// use strand::{App, Context, Next, Router};
///
/// let routes = Router::<()>::new()
///     .get("/users/{id}", |ctx: Context, _next: Next<()>| async move {
///         let id = ctx.param("id").unwrap_or_default();
///         ctx.response().end(format!(r#"{{"id":"{id}"}}"#))
///     })
///     .delete("/users/{id}", |ctx: Context, _next: Next<()>| async move {
///         ctx.response().set_status(http::StatusCode::NO_CONTENT)
///     });
///
/// let app = App::new().with(routes).build_http();
/// ```
pub struct Router<T = ()> {
    routes: HashMap<Method, MatchitRouter<Entry<T>>>,
}

impl<T: Default + Send + 'static> Router<T> {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Registers a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with a route
    /// already registered for `method`. Routes are set up once at startup.
    pub fn on<M>(mut self, method: Method, path: &str, handler: impl IntoMiddleware<T, M>) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_entry())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get<M>(self, path: &str, handler: impl IntoMiddleware<T, M>) -> Self {
        self.on(Method::Get, path, handler)
    }

    pub fn post<M>(self, path: &str, handler: impl IntoMiddleware<T, M>) -> Self {
        self.on(Method::Post, path, handler)
    }

    pub fn put<M>(self, path: &str, handler: impl IntoMiddleware<T, M>) -> Self {
        self.on(Method::Put, path, handler)
    }

    pub fn delete<M>(self, path: &str, handler: impl IntoMiddleware<T, M>) -> Self {
        self.on(Method::Delete, path, handler)
    }

    pub fn patch<M>(self, path: &str, handler: impl IntoMiddleware<T, M>) -> Self {
        self.on(Method::Patch, path, handler)
    }

    pub fn head<M>(self, path: &str, handler: impl IntoMiddleware<T, M>) -> Self {
        self.on(Method::Head, path, handler)
    }

    pub fn options<M>(self, path: &str, handler: impl IntoMiddleware<T, M>) -> Self {
        self.on(Method::Options, path, handler)
    }

    fn lookup(&self, method: Method, path: &str) -> Option<(Entry<T>, Params)> {
        let tree = self.routes.get(&method)?;
        let matched = tree.at(path).ok()?;
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((matched.value.clone(), Params(params)))
    }
}

impl<T: Default + Send + 'static> Default for Router<T> {
    fn default() -> Self { Self::new() }
}

impl<T: Default + Send + 'static> Middleware<T> for Router<T> {
    fn handle(&self, ctx: Context, next: Next<T>) -> BoxFuture<T> {
        let found = ctx
            .read(|f| (f.method.parse::<Method>().ok(), f.path.clone()))
            .and_then(|(method, path)| self.lookup(method?, &path));

        let Some((handler, params)) = found else {
            return next.run();
        };

        trace!(params = params.len(), "route matched");
        if let Err(e) = ctx.insert(params) {
            return Box::pin(async move { Err(e) });
        }
        handler.call(ctx, next)
    }
}
