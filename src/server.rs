//! Server loop.
//!
//! One task receives client datagrams, resolves them through the cache and
//! replies. Between datagrams it checks whether the maintenance interval has
//! passed and, if so, sweeps expired answers and persists the cache. Serving
//! and maintenance never overlap.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::clock::{Clock, SystemClock};
use crate::query::Query;
use crate::resolver::Resolver;
use crate::stats::Stats;
use crate::upstream::{MAX_DNS_PACKET_SIZE, UdpUpstream};
use crate::wire::HEADER_LEN;

/// Configuration for the caching forwarder.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local address to bind (e.g., 0.0.0.0:5300)
    pub listen: SocketAddr,
    /// The single upstream resolver
    pub upstream: SocketAddr,
    /// Upper bound on one upstream exchange
    pub upstream_timeout: Duration,
    /// How often expired answers are swept and the cache persisted
    pub maintenance_interval: Duration,
    /// Where the cache snapshot lives
    pub cache_path: PathBuf,
    /// Cache size cap
    pub max_entries: usize,
}

pub struct Server {
    socket: UdpSocket,
    resolver: Resolver,
    stats: Stats,
    config: ServerConfig,
    started: Instant,
}

impl Server {
    /// Restore the cache, bind the listening socket and wire up the UDP
    /// upstream. Only the bind can fail.
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let clock = Arc::new(SystemClock);
        let cache = load_cache(&config, clock.as_ref());
        let upstream = UdpUpstream::new(config.upstream, config.upstream_timeout);
        let resolver = Resolver::new(cache, Box::new(upstream), clock);

        Self::with_resolver(config, resolver).await
    }

    /// Bind with an already assembled resolver.
    pub async fn with_resolver(config: ServerConfig, resolver: Resolver) -> io::Result<Self> {
        let socket = UdpSocket::bind(config.listen).await?;

        info!(
            listen = %socket.local_addr()?,
            upstream = %config.upstream,
            cached = resolver.cache().len(),
            "DNS cache listening"
        );

        Ok(Self {
            socket,
            resolver,
            stats: Stats::new(),
            config,
            started: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve until Ctrl-C.
    pub async fn run(self) -> io::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for Ctrl-C, serving until killed");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until `shutdown` resolves, then sweep and persist one last time.
    pub async fn run_until<F>(mut self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
        let mut last_maintenance = Instant::now();

        loop {
            if last_maintenance.elapsed() >= self.config.maintenance_interval {
                self.maintain();
                last_maintenance = Instant::now();
            }

            let (len, src) = tokio::select! {
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "UDP recv error");
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };

            if len < HEADER_LEN {
                continue;
            }

            self.handle(&buf[..len], src).await;
        }

        info!("Shutting down");
        self.maintain();
        Ok(())
    }

    async fn handle(&mut self, packet: &[u8], src: SocketAddr) {
        let start_time = Instant::now();

        let query = match Query::parse(packet) {
            Ok(query) => query,
            Err(e) => {
                self.stats.record_failed();
                debug!(client = %src, error = %e, "Dropping query");
                return;
            }
        };

        match self.resolver.resolve(&query).await {
            Ok(action) => {
                if let Err(e) = self.socket.send_to(action.response(), src).await {
                    warn!(client = %src, error = %e, "UDP response error");
                }
                let elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0;
                self.stats.record(&action, elapsed_ms);
                debug!(
                    client = %src,
                    name = %query.name(),
                    qtype = query.qtype(),
                    outcome = action.as_str(),
                    elapsed_ms,
                    "Resolved"
                );
            }
            Err(e) => {
                self.stats.record_failed();
                warn!(client = %src, name = %query.name(), error = %e, "Query failed");
            }
        }
    }

    /// Sweep expired answers, persist the cache and report stats.
    fn maintain(&mut self) {
        let removed = self.resolver.sweep();

        match self.resolver.cache().save(&self.config.cache_path) {
            Ok(()) => info!(
                path = %self.config.cache_path.display(),
                entries = self.resolver.cache().len(),
                removed,
                "Cache persisted"
            ),
            Err(e) => warn!(error = %e, "Cache persistence failed"),
        }

        let stats = self.stats.snapshot_and_reset();
        info!(
            uptime_secs = self.started.elapsed().as_secs(),
            cache = self.resolver.cache().len(),
            requests = stats.requests,
            cached = stats.cached,
            refreshed = stats.refreshed,
            forwarded = stats.forwarded,
            passthrough = stats.passthrough,
            failed = stats.failed,
            avg_response_ms = stats.avg_response_ms,
            "Stats"
        );
    }
}

/// Restore the persisted cache, starting empty on any failure.
pub fn load_cache(config: &ServerConfig, clock: &dyn Clock) -> CacheStore {
    match CacheStore::load(&config.cache_path, config.max_entries, clock.now_millis()) {
        Ok(cache) => {
            info!(
                path = %config.cache_path.display(),
                entries = cache.len(),
                "Cache file restored"
            );
            cache
        }
        Err(e) if e.is_not_found() => {
            info!(path = %config.cache_path.display(), "No cache file, starting empty");
            CacheStore::new(config.max_entries)
        }
        Err(e) => {
            warn!(error = %e, "Cache file unusable, starting empty");
            CacheStore::new(config.max_entries)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::CachedAnswer;
    use crate::clock::ManualClock;
    use crate::test_support::{Record, answer_for, build_query};

    fn config(cache_path: PathBuf) -> ServerConfig {
        ServerConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            upstream: "127.0.0.1:9".parse().unwrap(),
            upstream_timeout: Duration::from_millis(100),
            maintenance_interval: Duration::from_secs(1800),
            cache_path,
            max_entries: 16,
        }
    }

    #[test]
    fn load_cache_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::at_secs(0);
        let missing = config(dir.path().join("missing.gz"));
        assert!(load_cache(&missing, &clock).is_empty());

        let corrupt_path = dir.path().join("corrupt.gz");
        std::fs::write(&corrupt_path, b"\x1f\x8b garbage").unwrap();
        assert!(load_cache(&config(corrupt_path), &clock).is_empty());
    }

    #[test]
    fn load_cache_restores_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.gz");
        let query = Query::parse(&build_query(1, "example.com", 1)).unwrap();
        let response = answer_for(&query, &[Record::a_ptr(300)]);
        let mut store = CacheStore::default();
        store
            .insert(CachedAnswer::parse(query.clone(), &response, 0).unwrap(), 0)
            .unwrap();
        store.save(&path).unwrap();

        let restored = load_cache(&config(path.clone()), &ManualClock::at_secs(100));
        assert!(restored.lookup(&query).is_some());

        let later = load_cache(&config(path), &ManualClock::at_secs(301));
        assert!(later.is_empty());
    }
}
