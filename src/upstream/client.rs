//! Evaluation client stub: the proxy's connection to the computation server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::protocol::{Frame, FrameTransport};
use crate::types::config::UpstreamConfig;
use crate::types::errors::EvalError;
use crate::types::requests::Request;
use crate::types::responses::Evaluation;

/// Something that can evaluate an expression.
///
/// The proxy talks to the computation server through this seam, which
/// lets tests substitute scripted evaluators.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Evaluates one expression.
    async fn evaluate(&self, expression: &str) -> Result<Evaluation, EvalError>;

    /// Releases any connection held on behalf of the session.
    async fn close(&self) {}
}

/// Persistent, lazily (re)connected client for the computation server.
///
/// One instance per proxy session: a slow computation for one client never
/// queues behind another client's request on a shared socket.
pub struct UpstreamClient {
    address: String,
    timeout: Duration,
    conn: Mutex<Option<FrameTransport<TcpStream>>>,
    next_id: AtomicU64,
}

impl UpstreamClient {
    /// Creates a client; nothing is connected until the first request.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            conn: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates a client from the `[upstream]` config section.
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new(config.address(), config.request_timeout())
    }

    /// Server address.
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<FrameTransport<TcpStream>, EvalError> {
        let stream = TcpStream::connect(&self.address).await.map_err(|e| {
            EvalError::ServerUnavailable(format!("connect to {}: {}", self.address, e))
        })?;
        // Frames are small and latency-bound.
        let _ = stream.set_nodelay(true);

        tracing::debug!(server = %self.address, "Connected to computation server");
        Ok(FrameTransport::new(stream))
    }

    /// One request/response exchange, reconnecting first if needed.
    async fn round_trip(
        &self,
        conn: &mut Option<FrameTransport<TcpStream>>,
        request: &Request,
    ) -> Result<Evaluation, EvalError> {
        if conn.is_none() {
            *conn = Some(self.connect().await?);
        }
        let transport = conn
            .as_mut()
            .ok_or_else(|| EvalError::ServerUnavailable("no connection".to_string()))?;

        transport
            .write_frame(&Frame::Request(request.clone()))
            .await
            .map_err(|e| EvalError::ServerUnavailable(format!("send: {}", e)))?;

        let frame = transport
            .read_frame()
            .await
            .map_err(|e| EvalError::ServerUnavailable(format!("receive: {}", e)))?
            .ok_or_else(|| {
                EvalError::ServerUnavailable("server closed the connection".to_string())
            })?;

        match frame {
            Frame::Result(response) if response.id == request.id => Ok(response.into_evaluation()),
            Frame::Error(error) if error.id == request.id => Err(error.into_eval_error()),
            other => Err(EvalError::ServerUnavailable(format!(
                "unexpected {} frame (id {}) while waiting for id {}",
                other.kind(),
                other.id(),
                request.id
            ))),
        }
    }

    async fn evaluate_locked(
        &self,
        conn: &mut Option<FrameTransport<TcpStream>>,
        request: &Request,
    ) -> Result<Evaluation, EvalError> {
        let reused = conn.is_some();

        match self.round_trip(conn, request).await {
            Err(EvalError::ServerUnavailable(reason)) if reused => {
                // The server may have dropped an idle connection; retry once on a new one.
                tracing::debug!(reason = %reason, "Reused upstream connection failed, reconnecting");
                *conn = None;
                self.round_trip(conn, request).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl Evaluator for UpstreamClient {
    fn name(&self) -> &str {
        &self.address
    }

    async fn evaluate(&self, expression: &str) -> Result<Evaluation, EvalError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(id, expression);
        let mut conn = self.conn.lock().await;

        let outcome = tokio::time::timeout(self.timeout, self.evaluate_locked(&mut conn, &request))
            .await
            .unwrap_or(Err(EvalError::Timeout(self.timeout)));

        match &outcome {
            Ok(_) | Err(EvalError::Malformed(_)) => {}
            Err(e) => {
                // Stream state is unknown after a failure; start over next time.
                tracing::warn!(server = %self.address, error = %e, "Upstream request failed");
                *conn = None;
            }
        }
        outcome
    }

    /// Sends `exit` on an open connection (best effort) and drops it.
    async fn close(&self) {
        let mut conn = self.conn.lock().await;
        if let Some(mut transport) = conn.take() {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = transport.write_frame(&Frame::Exit { id }).await {
                tracing::debug!(error = %e, "Failed to send exit upstream");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::responses::{ErrorKind, ErrorResponse, EvalResponse, ServedFrom};
    use tokio::net::TcpListener;

    /// Fake computation server answering each request with `reply`.
    async fn fake_server<F>(reply: F) -> String
    where
        F: Fn(Request) -> Option<Frame> + Send + Sync + Clone + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let reply = reply.clone();
                tokio::spawn(async move {
                    let mut transport = FrameTransport::new(stream);
                    while let Ok(Some(Frame::Request(request))) = transport.read_frame().await {
                        match reply(request) {
                            Some(frame) => transport.write_frame(&frame).await.unwrap(),
                            // Never answer; keep the socket open.
                            None => std::future::pending::<()>().await,
                        }
                    }
                });
            }
        });

        address
    }

    fn answer(value: f64) -> impl Fn(Request) -> Option<Frame> + Send + Sync + Clone + 'static {
        move |request: Request| {
            Some(Frame::Result(EvalResponse {
                id: request.id,
                value,
                steps: vec![format!("{} = {}", request.expression, value)],
                served_from: ServedFrom::Computed,
                max_age_secs: Some(30),
                no_store: false,
            }))
        }
    }

    #[tokio::test]
    async fn test_evaluate_and_reuse_connection() {
        let address = fake_server(answer(4.0)).await;
        let client = UpstreamClient::new(address, Duration::from_secs(2));

        let first = client.evaluate("2+2").await.unwrap();
        let second = client.evaluate("2*2").await.unwrap();

        assert_eq!(first.value, 4.0);
        assert_eq!(first.steps, vec!["2+2 = 4"]);
        assert_eq!(first.max_age, Some(Duration::from_secs(30)));
        assert_eq!(second.steps, vec!["2*2 = 4"]);
    }

    #[tokio::test]
    async fn test_malformed_is_passed_through() {
        let address = fake_server(|request: Request| {
            Some(Frame::Error(ErrorResponse::new(
                request.id,
                ErrorKind::MalformedExpression,
                "unexpected end of input",
            )))
        })
        .await;
        let client = UpstreamClient::new(address, Duration::from_secs(2));

        let err = client.evaluate("1+").await.unwrap_err();
        assert_eq!(err, EvalError::Malformed("unexpected end of input".into()));
    }

    #[tokio::test]
    async fn test_unavailable_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = UpstreamClient::new(address, Duration::from_secs(2));
        let err = client.evaluate("1").await.unwrap_err();

        assert!(matches!(err, EvalError::ServerUnavailable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_timeout_when_server_stalls() {
        let address = fake_server(|_| None).await;
        let client = UpstreamClient::new(address, Duration::from_millis(100));

        let err = client.evaluate("1").await.unwrap_err();
        assert_eq!(err, EvalError::Timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_mismatched_id_is_unavailable() {
        let address = fake_server(|request: Request| {
            Some(Frame::Result(EvalResponse {
                id: request.id + 100,
                value: 1.0,
                steps: vec![],
                served_from: ServedFrom::Computed,
                max_age_secs: None,
                no_store: false,
            }))
        })
        .await;
        let client = UpstreamClient::new(address, Duration::from_secs(2));

        let err = client.evaluate("1").await.unwrap_err();
        assert!(matches!(err, EvalError::ServerUnavailable(_)));
    }

    #[tokio::test]
    async fn test_reconnects_after_server_drops_connection() {
        // Server answers one request per connection, then hangs up.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut transport = FrameTransport::new(stream);
                if let Ok(Some(Frame::Request(request))) = transport.read_frame().await {
                    let reply = answer(7.0)(request).unwrap();
                    transport.write_frame(&reply).await.unwrap();
                }
            }
        });

        let client = UpstreamClient::new(address, Duration::from_secs(2));
        assert_eq!(client.evaluate("7").await.unwrap().value, 7.0);
        assert_eq!(client.evaluate("7").await.unwrap().value, 7.0);
    }
}
