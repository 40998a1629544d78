//! DNS query resolution logic.
//!
//! Handles the core query processing pipeline:
//! 1. Cache lookup, refreshing expired answers from upstream
//! 2. Forward misses upstream
//! 3. Cache what came back, if it can be walked
//!
//! The server loop handles the actual I/O, the resolver handles decisions.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::answer::{CachedAnswer, Resolution};
use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::error::Result;
use crate::query::Query;
use crate::upstream::Upstream;

/// How a query was answered, with the bytes to send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryAction {
    /// Served from cache with TTLs counted down.
    Cached(Vec<u8>),
    /// Cached answer had expired and was fetched again.
    Refreshed(Vec<u8>),
    /// Cache miss; the upstream reply, now cached if possible.
    Forwarded(Vec<u8>),
    /// Upstream reply we could not walk, relayed as-is and not cached.
    Passthrough(Vec<u8>),
}

impl QueryAction {
    pub fn response(&self) -> &[u8] {
        match self {
            QueryAction::Cached(bytes)
            | QueryAction::Refreshed(bytes)
            | QueryAction::Forwarded(bytes)
            | QueryAction::Passthrough(bytes) => bytes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryAction::Cached(_) => "CACHED",
            QueryAction::Refreshed(_) => "REFRESHED",
            QueryAction::Forwarded(_) => "FORWARDED",
            QueryAction::Passthrough(_) => "PASSTHROUGH",
        }
    }
}

/// Owns the cache and decides between serving it and going upstream.
pub struct Resolver {
    cache: CacheStore,
    upstream: Box<dyn Upstream>,
    clock: Arc<dyn Clock>,
}

impl Resolver {
    pub fn new(cache: CacheStore, upstream: Box<dyn Upstream>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            upstream,
            clock,
        }
    }

    /// Answer `query`, from cache if possible.
    ///
    /// Errors mean nothing should be sent back: the upstream could not be
    /// reached, or a cached answer could not be refreshed (in which case it
    /// is evicted).
    pub async fn resolve(&mut self, query: &Query) -> Result<QueryAction> {
        let hit = match self.cache.lookup_mut(query) {
            Some(entry) => Some(
                entry
                    .get_response(query, self.upstream.as_ref(), self.clock.as_ref())
                    .await,
            ),
            None => None,
        };

        match hit {
            Some(Ok(Resolution::Fresh(bytes))) => return Ok(QueryAction::Cached(bytes)),
            Some(Ok(Resolution::Refreshed(bytes))) => return Ok(QueryAction::Refreshed(bytes)),
            Some(Err(e)) => {
                self.cache.remove(query);
                return Err(e);
            }
            None => {}
        }

        let response = self.upstream.forward(query).await?;
        let now = self.clock.now_millis();

        match CachedAnswer::parse(query.clone(), &response, now) {
            Ok(answer) if answer.is_cacheable() => {
                if self.cache.insert(answer, now).is_err() {
                    warn!(
                        name = %query.name(),
                        capacity = self.cache.max_entries(),
                        "Cache full, answer not stored"
                    );
                }
                Ok(QueryAction::Forwarded(response))
            }
            Ok(_) => {
                debug!(name = %query.name(), "Answer not cacheable");
                Ok(QueryAction::Forwarded(response))
            }
            Err(e) => {
                warn!(name = %query.name(), error = %e, "Relaying upstream reply without caching");
                Ok(QueryAction::Passthrough(response))
            }
        }
    }

    /// Drop expired answers. Returns how many were removed.
    pub fn sweep(&mut self) -> usize {
        self.cache.sweep(self.clock.now_millis())
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }
}
