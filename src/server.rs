//! HTTP server and graceful shutdown.
//!
//! The server is a thin transport: it accepts connections, hands every
//! request to an [`HttpApp`], and writes back whatever the pipeline left in
//! the response sub-context.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C (or when the future passed to
//! [`Server::serve_with_shutdown`] resolves) the server:
//! 1. stops `listener.accept()` immediately, so no new connections are made,
//! 2. lets every in-flight connection task run to completion,
//! 3. returns from `serve`.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::adapter::HttpApp;
use crate::error::{Error, Result};

/// The HTTP server.
pub struct Server {
    addr: String,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called. The address is parsed lazily; a bad one surfaces as
    /// [`Error::Addr`] from `serve`.
    ///
    /// ```rust,no_run
    /// use strand::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Serves `app` until SIGTERM or Ctrl-C, then drains in-flight requests.
    pub async fn serve<T>(self, app: HttpApp<T>) -> Result<()>
    where
        T: Default + Send + 'static,
    {
        let addr: SocketAddr = self.addr.parse().map_err(|_| Error::Addr(self.addr.clone()))?;
        let listener = TcpListener::bind(addr).await?;
        Self::serve_with_shutdown(listener, app, shutdown_signal()).await
    }

    /// Serves `app` on an already-bound listener until `signal` resolves.
    ///
    /// Useful in tests: bind to port 0, read the local address, and pass a
    /// oneshot receiver as the signal.
    pub async fn serve_with_shutdown<T, S>(listener: TcpListener, app: HttpApp<T>, signal: S) -> Result<()>
    where
        T: Default + Send + 'static,
        S: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        info!(addr = %local, "strand listening");

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops accepting at once,
                // even if more connections are queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = app.clone();
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let app = app.clone();
                            async move { Ok::<_, Infallible>(app.handle(req).await) }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(%peer, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("strand stopped");
        Ok(())
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT. Only Ctrl-C on non-Unix targets.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
