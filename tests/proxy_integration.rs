//! End-to-end tests: client -> proxy -> computation server over loopback TCP.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use calcache::cache::CacheStore;
use calcache::engine::ComputationServer;
use calcache::protocol::{Frame, FrameTransport};
use calcache::proxy::ConnectionDispatcher;
use calcache::types::requests::Request;
use calcache::types::responses::{ErrorKind, ErrorResponse, EvalResponse, ServedFrom};
use calcache::{CalcacheResult, Config};

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<CalcacheResult<()>>,
}

impl Running {
    async fn stop(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.server.port = 0;
    config.proxy.port = 0;
    config.upstream.request_timeout_seconds = 2;
    config
}

async fn start_server(config: &Config) -> Running {
    let server = ComputationServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));
    Running { addr, stop, task }
}

async fn start_proxy(config: &Config, server: SocketAddr) -> (Running, Arc<CacheStore>) {
    let mut config = config.clone();
    config.upstream.host = server.ip().to_string();
    config.upstream.port = server.port();

    let dispatcher = ConnectionDispatcher::bind(&config).await.unwrap();
    let addr = dispatcher.local_addr().unwrap();
    let cache = dispatcher.cache();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(dispatcher.run_until(async {
        let _ = stopped.await;
    }));
    (Running { addr, stop, task }, cache)
}

async fn connect(addr: SocketAddr) -> FrameTransport<TcpStream> {
    FrameTransport::new(TcpStream::connect(addr).await.unwrap())
}

async fn ask(client: &mut FrameTransport<TcpStream>, request: Request) -> Frame {
    client.write_frame(&Frame::Request(request)).await.unwrap();
    client.read_frame().await.unwrap().expect("proxy answered")
}

fn expect_result(frame: Frame) -> EvalResponse {
    match frame {
        Frame::Result(r) => r,
        other => panic!("expected a result, got {other:?}"),
    }
}

fn expect_error(frame: Frame) -> ErrorResponse {
    match frame {
        Frame::Error(e) => e,
        other => panic!("expected an error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_computed_then_fresh_cache() {
    let config = config();
    let server = start_server(&config).await;
    let (proxy, cache) = start_proxy(&config, server.addr).await;
    let mut client = connect(proxy.addr).await;

    let first = expect_result(ask(&mut client, Request::new(1, "(1+2)*4")).await);
    assert_eq!(first.id, 1);
    assert_eq!(first.value, 12.0);
    assert_eq!(first.steps, vec!["1+2 = 3", "3*4 = 12"]);
    assert_eq!(first.served_from, ServedFrom::Computed);

    // Same expression modulo whitespace, from a second client.
    let mut other = connect(proxy.addr).await;
    let second = expect_result(ask(&mut other, Request::new(1, " ( 1 + 2 ) * 4 ")).await);
    assert_eq!(second.value, 12.0);
    assert_eq!(second.steps, first.steps);
    assert_eq!(second.served_from, ServedFrom::FreshCache);

    let stats = cache.stats();
    assert_eq!(stats.computations, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.size, 1);

    proxy.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_stale_entry_served_when_server_is_down() {
    let config = config();
    let server = start_server(&config).await;
    let (proxy, _cache) = start_proxy(&config, server.addr).await;
    let mut client = connect(proxy.addr).await;

    let first = expect_result(ask(&mut client, Request::new(1, "2+2*3")).await);
    assert_eq!(first.served_from, ServedFrom::Computed);

    server.stop().await;

    // max-age 0 forces a revalidation, which fails.
    let stale = expect_result(ask(&mut client, Request::new(2, "2+2*3").with_max_age(0)).await);
    assert_eq!(stale.id, 2);
    assert_eq!(stale.value, 8.0);
    assert_eq!(stale.steps, vec!["2*3 = 6", "2+6 = 8"]);
    assert_eq!(stale.served_from, ServedFrom::StaleCache);

    // Nothing cached for this one: the failure surfaces.
    let error = expect_error(ask(&mut client, Request::new(3, "9*9")).await);
    assert_eq!(error.id, 3);
    assert_eq!(error.kind, ErrorKind::Unavailable);

    proxy.stop().await;
}

#[tokio::test]
async fn test_malformed_expression_is_relayed_and_not_cached() {
    let config = config();
    let server = start_server(&config).await;
    let (proxy, cache) = start_proxy(&config, server.addr).await;
    let mut client = connect(proxy.addr).await;

    for id in 1..=2 {
        let error = expect_error(ask(&mut client, Request::new(id, "2*/3")).await);
        assert_eq!(error.id, id);
        assert_eq!(error.kind, ErrorKind::MalformedExpression);
    }

    let stats = cache.stats();
    assert_eq!(stats.computations, 2);
    assert_eq!(stats.size, 0);

    // The session survives a malformed request.
    let ok = expect_result(ask(&mut client, Request::new(3, "1+1")).await);
    assert_eq!(ok.value, 2.0);

    proxy.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_server_max_age_and_no_store() {
    let mut config = config();
    config.server.no_store = true;
    let server = start_server(&config).await;
    let (proxy, cache) = start_proxy(&config, server.addr).await;
    let mut client = connect(proxy.addr).await;

    for id in 1..=2 {
        let result = expect_result(ask(&mut client, Request::new(id, "7*6")).await);
        assert_eq!(result.value, 42.0);
        assert_eq!(result.served_from, ServedFrom::Computed);
    }
    assert!(cache.is_empty());

    proxy.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_no_steps_and_exit() {
    let config = config();
    let server = start_server(&config).await;
    let (proxy, _cache) = start_proxy(&config, server.addr).await;
    let mut client = connect(proxy.addr).await;

    let result = expect_result(ask(&mut client, Request::new(1, "10/4").with_steps(false)).await);
    assert_eq!(result.value, 2.5);
    assert!(result.steps.is_empty());

    client.write_frame(&Frame::Exit { id: 2 }).await.unwrap();
    assert!(client.read_frame().await.unwrap().is_none());

    proxy.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_garbage_gets_connection_error() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let config = config();
    let server = start_server(&config).await;
    let (proxy, _cache) = start_proxy(&config, server.addr).await;

    let mut raw = TcpStream::connect(proxy.addr).await.unwrap();
    raw.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let mut reply = Vec::new();
    raw.read_to_end(&mut reply).await.unwrap();

    let frame: serde_json::Value = serde_json::from_slice(&reply).unwrap();
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["id"], 0);
    assert_eq!(frame["kind"], "connection-error");

    proxy.stop().await;
    server.stop().await;
}
