//! # strand
//!
//! A request-pipeline framework: disposable per-request contexts, ordered
//! middleware, and cooperative cancellation.
//!
//! ## The contract
//!
//! Transports (HTTP or anything else) turn incoming work into a
//! [`Context`]. Middleware reads and mutates that context and decides
//! whether the rest of the chain runs. When the work is done the context is
//! disposed: its token is cancelled, its fields are cleared, and every
//! later write fails with [`Error::Disposed`].
//!
//! What strand owns:
//!
//! - **Contexts** with a fixed key set, a response sub-context, an event
//!   emitter and a cancellation source
//! - **Composition** of context-style, fast-style and legacy
//!   `(request, response)` handlers into one chain
//! - **Cancellation** delivered asynchronously, once, in registration order
//!
//! What sits at the edges as collaborators: the hyper adapter and
//! [`Server`], the [`Router`], [`Templates`] and [`StaticFiles`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use strand::{App, Context, LegacyRequest, LegacyResponse, Next, Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> strand::Result<()> {
//!     let app = App::new()
//!         .with(|ctx: Context, next: Next<()>| async move {
//!             ctx.response().set_header("x-powered-by", "strand")?;
//!             next.run().await
//!         })
//!         .with(Router::new().get("/users/{id}", get_user))
//!         .with(|_req: LegacyRequest, res: LegacyResponse| async move {
//!             res.write_head(404, &[("content-type", "text/plain")])?;
//!             res.end("not found")
//!         });
//!
//!     Server::bind("0.0.0.0:3000").serve(app.build_http()).await
//! }
//!
//! async fn get_user(ctx: Context, _next: Next<()>) -> strand::Result<()> {
//!     let id = ctx.param("id").unwrap_or_default();
//!     ctx.response().end(format!(r#"{{"id":"{id}"}}"#))
//! }
//! ```

mod adapter;
mod app;
mod cancel;
mod context;
mod error;
mod factory;
mod legacy;
mod method;
mod middleware;
mod response;
mod router;
mod server;
mod static_files;
mod templates;

pub mod events;

pub use adapter::HttpApp;
pub use app::{App, Pipeline};
pub use cancel::{CancelReason, CancellationToken, CancellationTokenSource};
pub use context::{Context, Fields, InFlight, ScopedWork, VERSION, WithContext, keys};
pub use error::{Error, Result};
pub use events::Events;
pub use factory::{Defaults, Factory};
pub use legacy::{LegacyRequest, LegacyResponse};
pub use method::Method;
pub use middleware::{BoxFuture, IntoMiddleware, Middleware, Next};
pub use response::{ContentType, Response, ResponseBody};
pub use router::{Params, Router};
pub use server::Server;
pub use static_files::{StaticFiles, StaticOptions};
pub use templates::{Engine, RenderOptions, Templates, interpolate, interpolate_with_layout};
