//! Accept loop of the caching proxy.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::cache::CacheStore;
use crate::types::config::{Config, UpstreamConfig};
use crate::types::errors::{CalcacheError, CalcacheResult};
use crate::upstream::UpstreamClient;

use super::session::Session;

/// Accepts client connections and runs one [`Session`] task per connection.
pub struct ConnectionDispatcher {
    listener: TcpListener,
    cache: Arc<CacheStore>,
    upstream: UpstreamConfig,
    idle_timeout: Option<Duration>,
}

impl ConnectionDispatcher {
    /// Binds the proxy listener described by `config`.
    pub async fn bind(config: &Config) -> CalcacheResult<Self> {
        let addr = config.proxy.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| CalcacheError::Bind { addr, source })?;

        Ok(Self {
            listener,
            cache: Arc::new(CacheStore::from_config(&config.cache)),
            upstream: config.upstream.clone(),
            idle_timeout: config.proxy.idle_timeout(),
        })
    }

    /// Replaces the cache (e.g. to share one between dispatchers in tests).
    pub fn with_cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> CalcacheResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared cache handle.
    pub fn cache(&self) -> Arc<CacheStore> {
        Arc::clone(&self.cache)
    }

    /// Accepts connections forever.
    pub async fn run(self) -> CalcacheResult<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Accepts connections until `shutdown` resolves; open sessions are then aborted.
    pub async fn run_until<F>(self, shutdown: F) -> CalcacheResult<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            addr = %self.local_addr()?,
            upstream = %self.upstream.address(),
            ttl_secs = self.cache.ttl().as_secs(),
            "Proxy listening"
        );

        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(open_sessions = sessions.len(), "Shutting down proxy");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(&mut sessions, stream, peer),
                    Err(e) => {
                        // Usually fd exhaustion; back off instead of spinning.
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "Session task panicked");
                        }
                    }
                }
            }
        }

        sessions.shutdown().await;

        let stats = self.cache.stats();
        tracing::info!(
            size = stats.size,
            hits = stats.hits,
            stale_hits = stats.stale_hits,
            misses = stats.misses,
            computations = stats.computations,
            evictions = stats.evictions,
            hit_rate = stats.hit_rate(),
            "Cache statistics"
        );
        Ok(())
    }

    fn spawn_session(&self, sessions: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        let _ = stream.set_nodelay(true);

        let id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("session", %id, %peer);
        let upstream = UpstreamClient::from_config(&self.upstream);
        let mut session =
            Session::new(stream, Arc::clone(&self.cache), upstream).with_idle_timeout(self.idle_timeout);

        sessions.spawn(
            async move {
                tracing::info!("Client connected");
                session.run().await;
            }
            .instrument(span),
        );
    }
}
