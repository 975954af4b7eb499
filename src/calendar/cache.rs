//! Process-local cache of unified event lists.
//!
//! Entries are keyed by user and scope and expire on read once older than the
//! TTL. Concurrent writers race benignly: the last write wins.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::RwLock;

use super::types::EventView;
use crate::models::CalendarProvider;

/// Which connections a cached list was computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheScope {
    All,
    Provider(CalendarProvider),
}

impl From<Option<CalendarProvider>> for CacheScope {
    fn from(provider: Option<CalendarProvider>) -> Self {
        provider.map_or(CacheScope::All, CacheScope::Provider)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user_id: String,
    pub scope: CacheScope,
}

impl CacheKey {
    pub fn new(user_id: &str, scope: CacheScope) -> Self {
        Self {
            user_id: user_id.to_string(),
            scope,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedEventSet {
    events: Arc<Vec<EventView>>,
    cached_at: Instant,
}

pub struct EventCache {
    entries: RwLock<LruCache<CacheKey, CachedEventSet>>,
    ttl: Duration,
}

impl EventCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Cached list younger than the TTL, if any.
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<EventView>> {
        let entries = self.entries.read().await;
        entries
            .peek(key)
            .filter(|entry| entry.cached_at.elapsed() < self.ttl)
            .map(|entry| entry.events.as_ref().clone())
    }

    /// Like [`EventCache::get`], but a provider-scoped miss is answered from
    /// a fresh all-providers entry of the same user, filtered to that provider.
    pub async fn lookup(&self, key: &CacheKey) -> Option<Vec<EventView>> {
        if let Some(events) = self.get(key).await {
            return Some(events);
        }
        let CacheScope::Provider(provider) = key.scope else {
            return None;
        };
        let all = self.get(&CacheKey::new(&key.user_id, CacheScope::All)).await?;
        Some(
            all.into_iter()
                .filter(|event| event.provider == provider)
                .collect(),
        )
    }

    pub async fn insert(&self, key: CacheKey, events: Vec<EventView>) {
        let entry = CachedEventSet {
            events: Arc::new(events),
            cached_at: Instant::now(),
        };
        self.entries.write().await.put(key, entry);
    }

    /// Drops the provider's entry and the user's all-providers entry.
    pub async fn evict_provider(&self, user_id: &str, provider: CalendarProvider) {
        let mut entries = self.entries.write().await;
        entries.pop(&CacheKey::new(user_id, CacheScope::Provider(provider)));
        entries.pop(&CacheKey::new(user_id, CacheScope::All));
    }

    /// Drops every entry of the user.
    pub async fn evict_user(&self, user_id: &str) {
        let mut entries = self.entries.write().await;
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| key.user_id == user_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.entries.read().await.contains(key)
    }
}
