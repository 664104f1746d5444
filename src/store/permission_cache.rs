use crate::model::{Id, Permission};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Cache entry for the resolved permissions of one subject on one target
#[derive(Clone, Debug)]
struct CacheEntry {
    permissions: BTreeSet<Permission>,
    inserted_at: Instant,
}

/// Read-through cache of `(subject, target) -> permissions` with TTL.
///
/// Invalidation is coarse: any change to memberships or grants clears
/// everything. A generation counter makes sure a value resolved before an
/// invalidation is never inserted after it.
#[derive(Debug, Clone)]
pub struct PermissionCache {
    entries: Arc<RwLock<HashMap<(Id, Id), CacheEntry>>>,
    generation: Arc<AtomicU64>,
    ttl: Duration,
}

impl PermissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
            ttl,
        }
    }

    /// Current generation; pass it back to `put` with the value resolved under it
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Get cached permissions if present and not expired
    pub async fn get(&self, subject: &str, target: &str) -> Option<BTreeSet<Permission>> {
        let key = (subject.to_string(), target.to_string());
        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                    return Some(entry.permissions.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired
        self.entries.write().await.remove(&key);
        None
    }

    /// Insert a resolved value unless the cache was invalidated since `generation`
    pub async fn put(&self, subject: &str, target: &str, permissions: BTreeSet<Permission>, generation: u64) {
        let mut entries = self.entries.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            log::debug!("Discarding permissions of {} resolved before invalidation", subject);
            return;
        }
        entries.insert(
            (subject.to_string(), target.to_string()),
            CacheEntry {
                permissions,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry
    pub async fn invalidate_all(&self) {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.clear();
        log::debug!("Permission cache cleared");
    }

    /// Clear all expired entries from cache
    pub async fn clear_expired(&self) {
        let ttl = self.ttl;
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for PermissionCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perms(list: &[Permission]) -> BTreeSet<Permission> {
        list.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_cache_basic_operations() {
        let cache = PermissionCache::default();
        let generation = cache.generation();
        cache
            .put("user-1", "node-1", perms(&[Permission::Read]), generation)
            .await;

        let cached = cache.get("user-1", "node-1").await;
        assert_eq!(cached, Some(perms(&[Permission::Read])));
        assert!(cache.get("user-1", "node-2").await.is_none());

        cache.invalidate_all().await;
        assert!(cache.get("user-1", "node-1").await.is_none());
    }

    #[tokio::test]
    async fn test_stale_insert_after_invalidation_is_dropped() {
        let cache = PermissionCache::default();
        let generation = cache.generation();

        cache.invalidate_all().await;
        cache
            .put("user-1", "node-1", perms(&[Permission::Update]), generation)
            .await;

        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = PermissionCache::new(Duration::from_millis(10));
        cache
            .put("user-1", "node-1", perms(&[Permission::Read]), cache.generation())
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get("user-1", "node-1").await.is_none());
        cache.clear_expired().await;
        assert_eq!(cache.len().await, 0);
    }
}
