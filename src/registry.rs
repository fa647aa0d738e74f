//! Element registry and cache manager.
//!
//! Native accessibility handles become invalid without notice whenever the
//! UI tree mutates. Instead of trusting raw references, backends register
//! extracted elements here and hand out opaque ids; every id carries the
//! epoch it was issued at, and an epoch mismatch reads as stale (arena +
//! generation pattern). A stale lookup never auto-repairs — the caller must
//! re-traverse — so a click can never land on a coordinate that used to
//! belong to a different element.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::{Result, ResolveError};
use crate::types::{ElementId, ElementRecord};

/// Why caches were invalidated. Recorded for observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    /// A click/type/scroll was dispatched.
    Interaction,
    /// The target application changed.
    AppSwitch,
    /// Caller asked for a cache clear.
    Explicit,
}

/// Result of a registry lookup.
#[derive(Debug)]
pub enum Lookup<H> {
    Fresh { record: ElementRecord, handle: H },
    Stale,
    NotFound,
}

impl<H> Lookup<H> {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Lookup::Fresh { .. })
    }
}

struct Entry<H> {
    record: ElementRecord,
    handle: H,
    epoch: u64,
    registered_at: Instant,
}

/// Arena of registered elements with generation tracking.
///
/// `H` is the backend's native handle type; it never leaves the backend
/// that owns this registry.
pub struct ElementRegistry<H> {
    epoch: AtomicU64,
    entries: DashMap<ElementId, Entry<H>>,
    element_ttl: Duration,
}

impl<H: Clone> ElementRegistry<H> {
    pub fn new(element_ttl: Duration) -> Self {
        Self {
            epoch: AtomicU64::new(0),
            entries: DashMap::new(),
            element_ttl,
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Assign a fresh opaque id and store the record with its native
    /// handle at the current epoch.
    ///
    /// Degenerate geometry is rejected outright; extraction should already
    /// have filtered it, and a record without clickable area must never
    /// become resolvable.
    pub fn register(&self, mut record: ElementRecord, handle: H) -> Result<ElementId> {
        if record.bounds.is_degenerate() {
            return Err(ResolveError::Internal(anyhow::anyhow!(
                "refusing to register element '{}' with degenerate bounds",
                record.label
            )));
        }

        let id = short_id();
        let epoch = self.current_epoch();
        record.id = id.clone();
        record.epoch = epoch;
        record.center = record.bounds.center();

        self.entries.insert(
            id.clone(),
            Entry {
                record,
                handle,
                epoch,
                registered_at: Instant::now(),
            },
        );
        Ok(id)
    }

    /// Look up an id. `Stale` when the stored epoch is behind the current
    /// global epoch or the entry outlived the element TTL.
    pub fn get(&self, id: &str) -> Lookup<H> {
        match self.entries.get(id) {
            None => Lookup::NotFound,
            Some(entry) => {
                if entry.epoch < self.current_epoch()
                    || entry.registered_at.elapsed() > self.element_ttl
                {
                    Lookup::Stale
                } else {
                    Lookup::Fresh {
                        record: entry.record.clone(),
                        handle: entry.handle.clone(),
                    }
                }
            }
        }
    }

    /// Advance the global epoch, staling every outstanding id. Strictly
    /// monotonic.
    pub fn advance_epoch(&self, reason: InvalidationReason) -> u64 {
        let next = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(?reason, epoch = next, "registry epoch advanced");
        next
    }

    /// Drop entries that can no longer be returned fresh. Safe to call at
    /// any time; ids stay stale either way.
    pub fn sweep(&self) {
        let epoch = self.current_epoch();
        let ttl = self.element_ttl;
        self.entries
            .retain(|_, e| e.epoch >= epoch && e.registered_at.elapsed() <= ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct CachedApp<A> {
    handle: A,
    cached_at: Instant,
}

/// Application-handle cache keyed by case-insensitive app name.
///
/// Separate lifetime from the element registry: an application stays valid
/// far longer than its transient element tree. Entries cached before the
/// most recent interaction are distrusted for a quiet period afterwards,
/// and sharding (dashmap) keeps concurrent resolutions against different
/// apps from contending.
pub struct AppCache<A> {
    entries: DashMap<String, CachedApp<A>>,
    quiet_period: Duration,
    last_interaction: Mutex<Option<Instant>>,
}

impl<A: Clone> AppCache<A> {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            quiet_period,
            last_interaction: Mutex::new(None),
        }
    }

    fn key(name: &str) -> String {
        name.trim().to_lowercase()
    }

    pub fn get(&self, name: &str) -> Option<A> {
        let key = Self::key(name);
        let interaction = *self.last_interaction.lock().unwrap();

        if let Some(at) = interaction {
            let expired = self
                .entries
                .get(&key)
                .map(|e| e.cached_at <= at && at.elapsed() < self.quiet_period)
                .unwrap_or(false);
            if expired {
                self.entries.remove(&key);
                return None;
            }
        }

        self.entries.get(&key).map(|e| e.handle.clone())
    }

    pub fn insert(&self, name: &str, handle: A) {
        self.entries.insert(
            Self::key(name),
            CachedApp {
                handle,
                cached_at: Instant::now(),
            },
        );
    }

    /// Record that an interaction happened; handles cached before this
    /// point are not trusted until the quiet period passes.
    pub fn note_interaction(&self) {
        *self.last_interaction.lock().unwrap() = Some(Instant::now());
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

fn short_id() -> ElementId {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Rect, Role};

    fn record(label: &str, bounds: Rect) -> ElementRecord {
        ElementRecord {
            id: String::new(),
            native_id: None,
            role: Role::Button,
            label: label.into(),
            bounds,
            center: (0, 0),
            category: Category::Interactive,
            enabled: true,
            has_actions: true,
            epoch: 0,
        }
    }

    fn registry() -> ElementRegistry<u32> {
        ElementRegistry::new(Duration::from_secs(60))
    }

    #[test]
    fn fresh_before_epoch_advance() {
        let reg = registry();
        let id = reg.register(record("OK", Rect::new(10, 20, 80, 30)), 7).unwrap();

        match reg.get(&id) {
            Lookup::Fresh { record, handle } => {
                assert_eq!(record.label, "OK");
                assert_eq!(record.center, (50, 35));
                assert_eq!(record.epoch, 0);
                assert_eq!(handle, 7);
            }
            other => panic!("expected fresh, got {:?}", other),
        }
    }

    #[test]
    fn stale_after_epoch_advance() {
        let reg = registry();
        let a = reg.register(record("OK", Rect::new(0, 0, 10, 10)), 1).unwrap();
        let b = reg.register(record("Cancel", Rect::new(20, 0, 10, 10)), 2).unwrap();

        reg.advance_epoch(InvalidationReason::Interaction);

        assert!(matches!(reg.get(&a), Lookup::Stale));
        assert!(matches!(reg.get(&b), Lookup::Stale));

        // Re-registration after the advance is fresh again.
        let c = reg.register(record("OK", Rect::new(0, 0, 10, 10)), 3).unwrap();
        assert!(reg.get(&c).is_fresh());
    }

    #[test]
    fn unknown_id_is_not_found() {
        let reg = registry();
        assert!(matches!(reg.get("deadbeef"), Lookup::NotFound));
    }

    #[test]
    fn degenerate_bounds_rejected() {
        let reg = registry();
        assert!(reg.register(record("ghost", Rect::new(5, 5, 0, 10)), 1).is_err());
        assert!(reg.register(record("ghost", Rect::new(5, 5, 10, -2)), 1).is_err());
        assert!(reg.is_empty());
    }

    #[test]
    fn ttl_expiry_reads_stale() {
        let reg: ElementRegistry<u32> = ElementRegistry::new(Duration::from_millis(10));
        let id = reg.register(record("OK", Rect::new(0, 0, 10, 10)), 1).unwrap();
        std::thread::sleep(Duration::from_millis(25));
        assert!(matches!(reg.get(&id), Lookup::Stale));
    }

    #[test]
    fn sweep_drops_stale_entries() {
        let reg = registry();
        reg.register(record("OK", Rect::new(0, 0, 10, 10)), 1).unwrap();
        reg.advance_epoch(InvalidationReason::Explicit);
        reg.sweep();
        assert!(reg.is_empty());
    }

    #[test]
    fn app_cache_quiet_period() {
        let cache: AppCache<&str> = AppCache::new(Duration::from_secs(5));
        cache.insert("Calculator", "handle");
        assert_eq!(cache.get("calculator"), Some("handle"));
        assert_eq!(cache.get("  CALCULATOR "), Some("handle"));

        // Interaction distrusts the pre-existing handle.
        cache.note_interaction();
        assert_eq!(cache.get("calculator"), None);

        // A handle cached after the interaction is served normally.
        cache.insert("Calculator", "fresh");
        assert_eq!(cache.get("Calculator"), Some("fresh"));
    }
}
