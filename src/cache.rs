use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::{CacheRecord, Store};

/// Reference to an earlier upload that can be re-sent without downloading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle(pub String);

/// Track id to delivered artifact. Writes are last-writer-wins.
pub struct ResultCache {
    store: Arc<Store>,
    ttl: Option<Duration>,
}

impl ResultCache {
    pub fn new(store: Arc<Store>, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    /// Expired entries are dropped from the store as they are found.
    pub async fn get(&self, track_id: &str) -> Option<ArtifactHandle> {
        let record = self.store.cached(track_id)?;
        if let Some(ttl) = self.ttl {
            let age = Utc::now().signed_duration_since(record.stored_at);
            if age.to_std().is_ok_and(|age| age > ttl) {
                match self.store.remove_cached_from(track_id, record.stored_at).await {
                    Ok(removed) => debug!(track_id, removed, "cache entry expired"),
                    Err(e) => warn!(track_id, error = %e, "failed to drop expired cache entry"),
                }
                return None;
            }
        }
        Some(ArtifactHandle(record.handle))
    }

    /// Never fails: the delivery this follows has already happened.
    pub async fn put(&self, track_id: &str, handle: ArtifactHandle) {
        let record = CacheRecord { handle: handle.0, stored_at: Utc::now() };
        match self.store.put_cached(track_id, record).await {
            Ok(()) => debug!(track_id, "cached delivered artifact"),
            Err(e) => warn!(track_id, error = %e, "failed to write cache entry"),
        }
    }

    pub async fn invalidate(&self, track_id: &str) {
        match self.store.remove_cached(track_id).await {
            Ok(true) => warn!(track_id, "cache entry invalidated"),
            Ok(false) => {}
            Err(e) => warn!(track_id, error = %e, "failed to invalidate cache entry"),
        }
    }
}
