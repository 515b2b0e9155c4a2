//! View rendering.
//!
//! [`Templates`] holds a views directory and a table of engines keyed by
//! file extension. Registered as middleware, it installs itself on each
//! context so downstream handlers can call [`Context::render`]:
//!
//! ```rust
//! use strand::{App, Context, Next, Templates};
//!
//! use std::path::PathBuf;
//! use strand::RenderOptions;
//!
//! let views = Templates::new("views").engine(".core", |_view: PathBuf, _opts: RenderOptions| async {
//!     Ok::<_, strand::Error>("<h1>Hello World</h1>".to_owned())
//! });
//!
//! let app = App::<()>::new()
//!     .with(views)
//!     .with(|ctx: Context, _next: Next<()>| async move { ctx.render("home.core").await })
//!     .build();
//! ```
//!
//! Engines are async functions of `(view path, options)` returning the
//! rendered text. Callback-based engines adapt by completing a future; the
//! pipeline only ever sees one result-or-error convention.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::response::ContentType;

/// Values handed to an engine alongside the view path.
pub type RenderOptions = HashMap<String, String>;

/// A template engine.
///
/// Implemented for every `Fn(PathBuf, RenderOptions) -> impl Future<Output =
/// Result<String>>`.
pub trait Engine: Send + Sync + 'static {
    fn render(&self, view: PathBuf, options: RenderOptions) -> BoxFuture<String>;
}

impl<F, Fut> Engine for F
where
    F: Fn(PathBuf, RenderOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    fn render(&self, view: PathBuf, options: RenderOptions) -> BoxFuture<String> {
        Box::pin(self(view, options))
    }
}

/// Engine that reads the view file and replaces `{{name}}` placeholders
/// with the matching option. Unknown placeholders render empty.
pub fn interpolate() -> impl Engine {
    |view: PathBuf, options: RenderOptions| async move {
        let source = tokio::fs::read_to_string(&view).await?;
        Ok::<_, Error>(substitute(&source, &options))
    }
}

/// Like [`interpolate`], then wraps the rendered view in `layout`.
///
/// The layout is filled from the same options, with `{{body}}` bound to the
/// rendered view. The view output is inserted as-is, never re-scanned.
///
/// ```rust
/// use strand::{Templates, interpolate_with_layout};
///
/// let views = Templates::new("views")
///     .engine("html", interpolate_with_layout("views/layouts/main.html"));
/// ```
pub fn interpolate_with_layout(layout: impl Into<PathBuf>) -> impl Engine {
    let layout = Arc::new(layout.into());
    move |view: PathBuf, mut options: RenderOptions| {
        let layout = Arc::clone(&layout);
        async move {
            let source = tokio::fs::read_to_string(&view).await?;
            let body = substitute(&source, &options);
            let frame = tokio::fs::read_to_string(&*layout).await?;
            options.insert("body".to_owned(), body);
            Ok::<_, Error>(substitute(&frame, &options))
        }
    }
}

fn substitute(source: &str, options: &RenderOptions) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        if let Some(value) = options.get(after[..end].trim()) {
            out.push_str(value);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

// ── Templates ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Registry {
    root: PathBuf,
    engines: HashMap<String, Arc<dyn Engine>>,
}

/// Views directory plus engine table. Cheap to clone.
#[derive(Clone)]
pub struct Templates {
    registry: Arc<Registry>,
}

impl Templates {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            registry: Arc::new(Registry { root: root.into(), engines: HashMap::new() }),
        }
    }

    /// Registers `engine` for views ending in `ext` (`".hbs"` or `"hbs"`).
    pub fn engine(mut self, ext: &str, engine: impl Engine) -> Self {
        let ext = normalize_ext(ext);
        Arc::make_mut(&mut self.registry)
            .engines
            .insert(ext, Arc::new(engine));
        self
    }

    pub fn root(&self) -> &Path {
        &self.registry.root
    }

    async fn render(&self, ctx: &Context, view: &str, options: RenderOptions) -> Result<()> {
        let ext = Path::new(view)
            .extension()
            .and_then(|e| e.to_str())
            .map(normalize_ext)
            .ok_or_else(|| Error::NoEngine(view.to_owned()))?;
        let engine = self
            .registry
            .engines
            .get(&ext)
            .cloned()
            .ok_or(Error::NoEngine(ext))?;

        let html = engine.render(self.registry.root.join(view), options).await?;
        debug!(view, bytes = html.len(), "rendered");

        let response = ctx.response();
        if response.header("content-type").is_none() {
            response.set_content_type(ContentType::Html)?;
        }
        response.end(html)
    }
}

fn normalize_ext(ext: &str) -> String {
    format!(".{}", ext.trim_start_matches('.').to_ascii_lowercase())
}

impl<T: Default + Send + 'static> Middleware<T> for Templates {
    fn handle(&self, ctx: Context, next: Next<T>) -> BoxFuture<T> {
        if let Err(e) = ctx.insert(self.clone()) {
            return Box::pin(async move { Err(e) });
        }
        next.run()
    }
}

impl Context {
    /// Renders `view` with the engine registered for its extension and ends
    /// the response body with the output.
    ///
    /// # Errors
    ///
    /// [`Error::NoRenderer`] without an upstream [`Templates`] middleware,
    /// [`Error::NoEngine`] for an unregistered extension, or whatever the
    /// engine fails with.
    pub async fn render(&self, view: &str) -> Result<()> {
        self.render_with(view, RenderOptions::new()).await
    }

    pub async fn render_with(&self, view: &str, options: RenderOptions) -> Result<()> {
        let templates = self.get::<Templates>().ok_or(Error::NoRenderer)?;
        templates.render(self, view, options).await
    }
}
