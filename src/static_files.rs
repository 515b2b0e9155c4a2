//! Static file serving.
//!
//! [`StaticFiles`] maps the context path onto a directory and ends the
//! response with the file's contents. Only `GET` and `HEAD` are served;
//! other methods, missing files and non-regular files go to the next
//! middleware, so it composes in front of a router:
//!
//! ```rust
//! use strand::{App, StaticFiles, StaticOptions};
//!
//! let app = App::<()>::new()
//!     .with(StaticFiles::with_options("public", StaticOptions { sync: true, ..Default::default() }))
//!     .build_http();
//! ```

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use http::StatusCode;
use http::header::CONTENT_LENGTH;
use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::response::ContentType;

/// Options for [`StaticFiles`].
#[derive(Clone, Debug)]
pub struct StaticOptions {
    /// Read with blocking `std::fs` calls on the current task instead of
    /// `tokio::fs`. Suits small trees on fast local disks.
    pub sync: bool,
    /// File served for directory paths. `None` lets directories fall through.
    pub index: Option<String>,
}

impl Default for StaticOptions {
    fn default() -> Self {
        Self { sync: false, index: Some("index.html".to_owned()) }
    }
}

struct Config {
    root: PathBuf,
    options: StaticOptions,
}

/// Serves files below a root directory.
#[derive(Clone)]
pub struct StaticFiles {
    config: Arc<Config>,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_options(root, StaticOptions::default())
    }

    pub fn with_options(root: impl Into<PathBuf>, options: StaticOptions) -> Self {
        Self { config: Arc::new(Config { root: root.into(), options }) }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn options(&self) -> &StaticOptions {
        &self.config.options
    }

    /// Resolves `relative` to a regular file and reads it. `Ok(None)` means
    /// there is nothing to serve.
    async fn load(&self, relative: &Path) -> Result<Option<(PathBuf, Vec<u8>)>> {
        let mut file = self.config.root.join(relative);
        let Some(mut meta) = self.stat(&file).await? else {
            return Ok(None);
        };

        if meta.is_dir() {
            let Some(index) = &self.config.options.index else {
                return Ok(None);
            };
            file.push(index);
            meta = match self.stat(&file).await? {
                Some(meta) => meta,
                None => return Ok(None),
            };
        }
        if !meta.is_file() {
            return Ok(None);
        }

        let bytes = if self.config.options.sync {
            std::fs::read(&file)
        } else {
            tokio::fs::read(&file).await
        };
        match bytes {
            Ok(bytes) => Ok(Some((file, bytes))),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn stat(&self, path: &Path) -> Result<Option<Metadata>> {
        let meta = if self.config.options.sync {
            std::fs::metadata(path)
        } else {
            tokio::fs::metadata(path).await
        };
        match meta {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_missing(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

/// Turns a request path into a path relative to the root. `None` when the
/// path tries to climb out of it.
fn relative_path(path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s if s.contains('\\') || s.contains(':') => return None,
            s => out.push(s),
        }
    }
    Some(out)
}

impl<T: Default + Send + 'static> Middleware<T> for StaticFiles {
    fn handle(&self, ctx: Context, next: Next<T>) -> BoxFuture<T> {
        let Some((method, path)) = ctx.read(|f| (f.method.clone(), f.path.clone())) else {
            return Box::pin(async { Err(Error::Disposed) });
        };
        let head = match method.as_str() {
            "GET" => false,
            "HEAD" => true,
            _ => return next.run(),
        };

        let Some(relative) = relative_path(&path) else {
            debug!(path = %path, "refusing path outside static root");
            return Box::pin(async move {
                ctx.response().set_status(StatusCode::FORBIDDEN)?;
                ctx.response().end(b"")?;
                Ok(T::default())
            });
        };

        let this = self.clone();
        Box::pin(async move {
            let Some((file, bytes)) = this.load(&relative).await? else {
                return next.run().await;
            };
            debug!(file = %file.display(), bytes = bytes.len(), head, "static file");

            let ext = file.extension().and_then(|e| e.to_str()).unwrap_or_default();
            let response = ctx.response();
            response.set_status(StatusCode::OK)?;
            response.set_content_type(ContentType::from_extension(ext))?;
            response.set_header(CONTENT_LENGTH.as_str(), &bytes.len().to_string())?;
            if head {
                response.end(b"")?;
            } else {
                response.end(bytes)?;
            }
            Ok(T::default())
        })
    }
}
