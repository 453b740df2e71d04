//! Computation server: evaluates expressions received over the wire.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::protocol::{Frame, FrameTransport};
use crate::types::config::{Config, ServerConfig};
use crate::types::errors::{CalcacheError, CalcacheResult, ProtocolError};
use crate::types::requests::Request;
use crate::types::responses::{ErrorKind, ErrorResponse, EvalResponse, ServedFrom};

use super::evaluator::calculate;

/// TCP server answering `request` frames with computed results.
pub struct ComputationServer {
    listener: TcpListener,
    settings: ServerConfig,
}

impl ComputationServer {
    /// Binds the listener described by `config.server`.
    pub async fn bind(config: &Config) -> CalcacheResult<Self> {
        let addr = config.server.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| CalcacheError::Bind { addr, source })?;

        Ok(Self {
            listener,
            settings: config.server.clone(),
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> CalcacheResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> CalcacheResult<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Serves connections until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> CalcacheResult<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            addr = %self.local_addr()?,
            max_age_secs = ?self.settings.max_age_secs,
            no_store = self.settings.no_store,
            "Computation server listening"
        );

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(open_connections = connections.len(), "Shutting down computation server");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let settings = self.settings.clone();
                        connections.spawn(
                            async move {
                                tracing::debug!("Connection accepted");
                                serve_connection(stream, &settings).await;
                            }
                            .instrument(tracing::info_span!("computation", %peer)),
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "Connection task panicked");
                        }
                    }
                }
            }
        }

        connections.shutdown().await;
        Ok(())
    }
}

/// Answers requests on one connection until it closes or sends `exit`.
pub async fn serve_connection<T>(io: T, settings: &ServerConfig)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut transport = FrameTransport::new(io);
    let mut answered = 0u64;

    loop {
        let reply = match transport.read_frame().await {
            Ok(Some(Frame::Request(request))) => answer(request, settings),
            Ok(Some(Frame::Exit { .. })) | Ok(None) => break,
            Ok(Some(other)) => {
                let e = ProtocolError::Unexpected(format!("received a {} frame", other.kind()));
                reject(&mut transport, e).await;
                break;
            }
            Err(e) => {
                reject(&mut transport, e).await;
                break;
            }
        };

        if let Err(e) = transport.write_frame(&reply).await {
            tracing::debug!(error = %e, "Write failed");
            break;
        }
        answered += 1;
    }

    let _ = transport.shutdown().await;
    tracing::debug!(answered, "Connection closed");
}

fn answer(request: Request, settings: &ServerConfig) -> Frame {
    match calculate(&request.expression) {
        Ok(evaluation) => {
            tracing::debug!(id = request.id, value = evaluation.value, "Computed");
            let mut response = EvalResponse::from_evaluation(request.id, evaluation, ServedFrom::Computed);
            response.max_age_secs = settings.max_age_secs;
            response.no_store = settings.no_store;
            if !request.show_steps {
                response.steps.clear();
            }
            Frame::Result(response)
        }
        Err(e) => {
            tracing::debug!(id = request.id, error = %e, "Rejected expression");
            Frame::Error(ErrorResponse::new(
                request.id,
                ErrorKind::MalformedExpression,
                e.to_string(),
            ))
        }
    }
}

async fn reject<T>(transport: &mut FrameTransport<T>, error: ProtocolError)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    tracing::warn!(error = %error, "Protocol error, closing connection");
    let notice = ErrorResponse::new(0, ErrorKind::ConnectionError, error.to_string());
    let _ = transport.write_frame(&Frame::Error(notice)).await;
}
