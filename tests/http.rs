use std::net::SocketAddr;

use strand::{App, Context, HttpApp, LegacyRequest, LegacyResponse, Next, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const HELLO: &str = "<html><head></head><body>Hello World from HTTP Server</body></html>";

async fn start(app: HttpApp) -> (SocketAddr, oneshot::Sender<()>, JoinHandle<strand::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let server = tokio::spawn(Server::serve_with_shutdown(listener, app, async move {
        let _ = rx.await;
    }));
    (addr, tx, server)
}

async fn get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    String::from_utf8(raw).unwrap()
}

#[tokio::test]
async fn serves_context_handler_over_tcp() {
    let app = App::new()
        .with(|ctx: Context, _next: Next<()>| async move {
            ctx.response().write_head(http::StatusCode::OK, &[("content-type", "text/html")])?;
            ctx.response().end(HELLO)
        })
        .build_http();
    let (addr, shutdown, server) = start(app).await;

    let reply = get(addr, "/").await;
    assert!(reply.starts_with("HTTP/1.1 200 OK"), "{reply}");
    assert!(reply.contains("content-type: text/html"), "{reply}");
    assert!(reply.ends_with(HELLO), "{reply}");

    shutdown.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn serves_legacy_handler_over_tcp() {
    let app = App::new()
        .with(|_req: LegacyRequest, res: LegacyResponse| async move {
            res.write_head(200, &[("Content-Type", "text/html")])?;
            res.end(HELLO)
        })
        .build_http();
    let (addr, shutdown, server) = start(app).await;

    let reply = get(addr, "/").await;
    assert!(reply.starts_with("HTTP/1.1 200 OK"), "{reply}");
    assert!(reply.ends_with(HELLO), "{reply}");

    shutdown.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn unanswered_request_is_404() {
    let app = App::new()
        .with(|next: Next<()>| async move { next.run().await })
        .build_http();
    let (addr, shutdown, server) = start(app).await;

    let reply = get(addr, "/nothing-here").await;
    assert!(reply.starts_with("HTTP/1.1 404 Not Found"), "{reply}");

    shutdown.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn bad_bind_address_is_an_error() {
    let app = App::<()>::new().build_http();
    let err = Server::bind("not-an-address").serve(app).await.unwrap_err();
    assert!(matches!(err, strand::Error::Addr(addr) if addr == "not-an-address"));
}
