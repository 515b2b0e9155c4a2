//! Minimal strand example: routes, a view, static files and a legacy
//! handler sharing one pipeline.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/
//!   curl -i http://localhost:3000/users/42
//!   curl -i http://localhost:3000/slow        # cancelled on disconnect/dispose
//!   curl -i http://localhost:3000/legacy

use std::path::PathBuf;
use std::time::Duration;

use strand::{
    App, Context, LegacyRequest, LegacyResponse, Next, RenderOptions, Router, Server, StaticFiles,
    Templates,
};

#[tokio::main]
async fn main() -> strand::Result<()> {
    tracing_subscriber::fmt::init();

    let views = Templates::new("views").engine(".core", |_view: PathBuf, _opts: RenderOptions| async {
        Ok::<_, strand::Error>(
            "<!doctype html><html><head></head><body><h1>Hello World</h1></body></html>".to_owned(),
        )
    });

    let routes = Router::new()
        .get("/", |ctx: Context, _next: Next<()>| async move { ctx.render("home.core").await })
        .get("/users/{id}", get_user)
        .get("/slow", slow);

    let app = App::new()
        .with(timing)
        .with(views)
        .with(StaticFiles::new("public"))
        .with(routes)
        .with(legacy);

    Server::bind("0.0.0.0:3000").serve(app.build_http()).await
}

// Fast-style middleware: only the continuation, the context rides along.
async fn timing(next: Next<()>) -> strand::Result<()> {
    let ctx = next.context().clone();
    let started = std::time::Instant::now();
    let out = next.run().await;
    tracing::info!(
        seq = ctx.seq(),
        path = %ctx.path().unwrap_or_default(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    out
}

// GET /users/{id}
async fn get_user(ctx: Context, _next: Next<()>) -> strand::Result<()> {
    let id = ctx.param("id").unwrap_or_default();
    ctx.response().set_content_type(strand::ContentType::Json)?;
    ctx.response().end(format!(r#"{{"id":"{id}","name":"alice"}}"#))
}

// GET /slow: gives up as soon as the context's token is cancelled.
async fn slow(ctx: Context, _next: Next<()>) -> strand::Result<()> {
    let token = ctx.token().clone();
    tokio::select! {
        reason = token.cancelled() => {
            tracing::warn!(%reason, "slow request cancelled");
            Ok(())
        }
        () = tokio::time::sleep(Duration::from_secs(2)) => ctx.response().end("done"),
    }
}

// Two-argument handler: anything the routes did not answer.
async fn legacy(req: LegacyRequest, res: LegacyResponse) -> strand::Result<()> {
    res.write_head(200, &[("Content-Type", "text/plain")])?;
    res.end(format!("{} {} handled by a legacy handler", req.method(), req.url()))
}
