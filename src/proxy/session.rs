//! Per-connection handling loop of the proxy.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::cache::{CacheKey, CacheStore, LookupOptions};
use crate::protocol::{Frame, FrameTransport};
use crate::types::errors::ProtocolError;
use crate::types::requests::Request;
use crate::types::responses::{ErrorKind, ErrorResponse, EvalResponse, Response};
use crate::upstream::Evaluator;

/// Where a session is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the client's next frame.
    AwaitingFrame,
    /// Looking the request up in the cache.
    Dispatching,
    /// Waiting for the computation server.
    AwaitingUpstream,
    /// Sending the response.
    WritingResponse,
    /// Done; the connection is released.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client closed its end of the connection.
    ClientClosed,
    /// Client sent an `exit` frame.
    Exit,
    /// No frame arrived within the idle timeout.
    IdleTimeout,
    /// Client sent something that is not a valid request frame.
    Protocol(String),
    /// Writing to the client failed.
    WriteFailed(String),
}

/// One client connection: reads requests, answers them through the cache.
pub struct Session<T, E> {
    transport: FrameTransport<T>,
    cache: Arc<CacheStore>,
    evaluator: E,
    idle_timeout: Option<Duration>,
    state: SessionState,
    served: u64,
}

impl<T, E> Session<T, E>
where
    T: AsyncRead + AsyncWrite + Unpin,
    E: Evaluator,
{
    /// Creates a session over an accepted stream.
    pub fn new(io: T, cache: Arc<CacheStore>, evaluator: E) -> Self {
        Self {
            transport: FrameTransport::new(io),
            cache,
            evaluator,
            idle_timeout: None,
            state: SessionState::AwaitingFrame,
            served: 0,
        }
    }

    /// Closes the connection when no frame arrives within `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Requests answered so far.
    pub fn served(&self) -> u64 {
        self.served
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }

    /// Runs the loop until the connection ends, then releases it.
    pub async fn run(&mut self) -> CloseReason {
        let reason = self.serve().await;

        match &reason {
            CloseReason::ClientClosed | CloseReason::Exit => {
                tracing::info!(served = self.served, reason = ?reason, "Session closed");
            }
            _ => {
                tracing::warn!(served = self.served, reason = ?reason, "Session closed");
            }
        }

        self.evaluator.close().await;
        // The peer may already be gone.
        let _ = self.transport.shutdown().await;
        self.transition(SessionState::Closed);
        reason
    }

    async fn serve(&mut self) -> CloseReason {
        loop {
            self.transition(SessionState::AwaitingFrame);

            let frame = match self.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => return CloseReason::ClientClosed,
                Err(NextFrameError::Idle) => return CloseReason::IdleTimeout,
                Err(NextFrameError::Protocol(e)) => return self.reject(e).await,
            };

            let request = match frame {
                Frame::Request(request) => request,
                Frame::Exit { .. } => return CloseReason::Exit,
                other => {
                    let e = ProtocolError::Unexpected(format!("client sent a {} frame", other.kind()));
                    return self.reject(e).await;
                }
            };

            let response = self.dispatch(request).await;

            self.transition(SessionState::WritingResponse);
            if let Err(e) = self.transport.write_frame(&Frame::from(response)).await {
                return CloseReason::WriteFailed(e.to_string());
            }
            self.served += 1;
        }
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, NextFrameError> {
        let read = self.transport.read_frame();
        let frame = match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| NextFrameError::Idle)?,
            None => read.await,
        };
        frame.map_err(NextFrameError::Protocol)
    }

    /// Tells the client why it is being dropped (best effort).
    async fn reject(&mut self, error: ProtocolError) -> CloseReason {
        tracing::warn!(error = %error, "Protocol error, closing connection");

        let notice = ErrorResponse::new(0, ErrorKind::ConnectionError, error.to_string());
        if let Err(e) = self.transport.write_frame(&Frame::Error(notice)).await {
            tracing::debug!(error = %e, "Could not deliver connection-error frame");
        }
        CloseReason::Protocol(error.to_string())
    }

    /// Answers one request through the cache.
    pub async fn dispatch(&mut self, request: Request) -> Response {
        self.transition(SessionState::Dispatching);

        let key = CacheKey::new(&request.expression);
        let options = LookupOptions {
            max_age: request.max_age(),
            no_store: request.no_store,
        };

        let state = &mut self.state;
        let evaluator = &self.evaluator;
        let expression = key.as_str();
        let outcome = self
            .cache
            .get_or_compute_with(&key, options, move || async move {
                tracing::trace!(from = ?*state, to = ?SessionState::AwaitingUpstream, "Session state");
                *state = SessionState::AwaitingUpstream;
                evaluator.evaluate(expression).await
            })
            .await;

        match outcome {
            Ok(lookup) => {
                tracing::info!(
                    id = request.id,
                    key = %key.fingerprint(),
                    served_from = %lookup.served_from,
                    "Request answered"
                );
                let mut response =
                    EvalResponse::from_evaluation(request.id, lookup.evaluation, lookup.served_from);
                if !request.show_steps {
                    response.steps.clear();
                }
                Response::Result(response)
            }
            Err(e) => {
                tracing::info!(
                    id = request.id,
                    key = %key.fingerprint(),
                    upstream = self.evaluator.name(),
                    error = %e,
                    "Request failed"
                );
                Response::Error(ErrorResponse::from_eval_error(request.id, &e))
            }
        }
    }
}

enum NextFrameError {
    Idle,
    Protocol(ProtocolError),
}
