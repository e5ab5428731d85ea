//! Registry of known children with liveness timestamps
//!
//! The registry is shared between request handlers (register, unregister,
//! heartbeat) and the sweeper. Every operation takes the single internal lock, so
//! callers never need their own synchronization.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::EndpointDescriptor;
use crate::{Error, Result};

/// One known child
#[derive(Debug, Clone)]
pub struct RegistryEntry<A> {
    pub descriptor: EndpointDescriptor,
    /// Configuration the child registered with; opaque to the registry
    pub attached: A,
    pub registered_at: DateTime<Utc>,
    pub last_active: Instant,
}

impl<A> RegistryEntry<A> {
    /// Time since the last registration or heartbeat
    #[must_use]
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active)
    }
}

/// Thread-safe table of children keyed by id
#[derive(Debug)]
pub struct Registry<A> {
    entries: Mutex<HashMap<String, RegistryEntry<A>>>,
}

impl<A> Default for Registry<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Registry<A> {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or replace the entry for `descriptor.id`
    ///
    /// Returns true if an entry with the same id was replaced.
    pub fn register(&self, descriptor: EndpointDescriptor, attached: A) -> bool {
        let id = descriptor.id.clone();
        let entry = RegistryEntry {
            descriptor,
            attached,
            registered_at: Utc::now(),
            last_active: Instant::now(),
        };

        let replaced = self.entries.lock().insert(id.clone(), entry).is_some();
        tracing::info!(child_id = %id, replaced, "child registered");
        replaced
    }

    /// Remove an entry; unknown ids are ignored
    pub fn unregister(&self, id: &str) -> Option<RegistryEntry<A>> {
        let removed = self.entries.lock().remove(id);
        if removed.is_some() {
            tracing::info!(child_id = %id, "child unregistered");
        } else {
            tracing::debug!(child_id = %id, "unregister for unknown child ignored");
        }
        removed
    }

    /// Mark a child as alive now
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is not registered
    pub fn refresh(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("child '{id}' is not registered")))?;
        entry.last_active = entry.last_active.max(Instant::now());
        drop(entries);

        tracing::trace!(child_id = %id, "heartbeat");
        Ok(())
    }

    /// Remove and return the ids of entries idle for longer than `max_age`
    pub fn sweep(&self, max_age: Duration, now: Instant) -> Vec<String> {
        let mut evicted = Vec::new();
        self.entries.lock().retain(|id, entry| {
            let keep = entry.idle(now) <= max_age;
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });

        evicted.sort();
        for id in &evicted {
            tracing::info!(child_id = %id, max_age_secs = max_age.as_secs_f64(), "child evicted");
        }
        evicted
    }

    /// Number of registered children
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        drop(entries);

        if count > 0 {
            tracing::info!(count, "registry cleared");
        }
    }
}

impl<A: Clone> Registry<A> {
    /// Get a copy of one entry
    #[must_use]
    pub fn find(&self, id: &str) -> Option<RegistryEntry<A>> {
        self.entries.lock().get(id).cloned()
    }

    /// Point-in-time copy of all entries, sorted by id
    #[must_use]
    pub fn list(&self) -> Vec<RegistryEntry<A>> {
        let mut entries: Vec<_> = self.entries.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.descriptor.id.cmp(&b.descriptor.id));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, port: u16) -> EndpointDescriptor {
        EndpointDescriptor {
            address: "10.0.0.5".to_string(),
            port,
            id: id.to_string(),
            description: format!("child {id}"),
        }
    }

    #[test]
    fn register_and_find() {
        let registry = Registry::new();
        assert!(!registry.register(descriptor("N1", 9001), "cfg"));

        let entry = registry.find("N1").unwrap();
        assert_eq!(entry.descriptor.port, 9001);
        assert_eq!(entry.attached, "cfg");
        assert!(registry.find("N2").is_none());
    }

    #[test]
    fn register_replaces_existing_id() {
        let registry = Registry::new();
        registry.register(descriptor("N1", 9001), 1);
        assert!(registry.register(descriptor("N1", 9005), 2));

        assert_eq!(registry.len(), 1);
        let entry = registry.find("N1").unwrap();
        assert_eq!(entry.descriptor.port, 9005);
        assert_eq!(entry.attached, 2);
    }

    #[test]
    fn unregister_absent_is_noop() {
        let registry: Registry<()> = Registry::new();
        assert!(registry.unregister("ghost").is_none());

        registry.register(descriptor("N1", 9001), ());
        assert!(registry.unregister("N1").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn refresh_unknown_is_not_found() {
        let registry: Registry<()> = Registry::new();
        registry.register(descriptor("N1", 9001), ());

        assert!(matches!(registry.refresh("N2"), Err(Error::NotFound(_))));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_only_touches_timestamp() {
        let registry = Registry::new();
        registry.register(descriptor("N1", 9001), "cfg");
        let before = registry.find("N1").unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        registry.refresh("N1").unwrap();

        let after = registry.find("N1").unwrap();
        assert_eq!(after.descriptor, before.descriptor);
        assert_eq!(after.attached, before.attached);
        assert_eq!(after.registered_at, before.registered_at);
        assert_eq!(after.last_active - before.last_active, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_boundary_is_strict() {
        let registry: Registry<()> = Registry::new();
        registry.register(descriptor("old", 1), ());
        tokio::time::advance(Duration::from_secs(10)).await;
        registry.register(descriptor("young", 2), ());

        let max_age = Duration::from_secs(30);
        let now = Instant::now() + Duration::from_secs(20);

        // "old" is exactly 30s idle and survives
        assert!(registry.sweep(max_age, now).is_empty());

        let evicted = registry.sweep(max_age, now + Duration::from_millis(1));
        assert_eq!(evicted, vec!["old".to_string()]);
        assert!(registry.find("young").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_keeps_child_alive() {
        let registry: Registry<()> = Registry::new();
        registry.register(descriptor("N1", 9001), ());

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(10)).await;
            registry.refresh("N1").unwrap();
            assert!(
                registry
                    .sweep(Duration::from_secs(30), Instant::now())
                    .is_empty()
            );
        }
    }

    #[test]
    fn list_is_sorted_copy() {
        let registry: Registry<()> = Registry::new();
        registry.register(descriptor("b", 2), ());
        registry.register(descriptor("a", 1), ());

        let listed = registry.list();
        registry.clear();

        let ids: Vec<_> = listed.iter().map(|e| e.descriptor.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_register_keeps_one_entry_per_id() {
        let registry = std::sync::Arc::new(Registry::new());
        let handles: Vec<_> = (0..8u16)
            .map(|n| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for round in 0..50u16 {
                        registry.register(descriptor(&format!("N{}", round % 4), n), round);
                        registry.sweep(Duration::from_secs(60), Instant::now());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 4);
    }
}
