//! Live target registry: how many sessions are currently bridged to each
//! target.
//!
//! The registry is observability only.  Nothing in the bridge ever reads it to
//! make a decision; it exists so the operator can see at a glance which Telnet
//! servers are in use (it is logged on every change).
//!
//! # Consistency
//!
//! Every mutation goes through [`LiveTargetRegistry::adjust`], which performs
//! the whole look-up / add / prune step under one mutex.  Concurrent sessions
//! can therefore never lose an update, and a key never maps to zero.
//!
//! Sessions do not call `adjust` by hand.  They hold a [`TargetLease`]
//! obtained from [`LiveTargetRegistry::acquire`]: creating the lease counts
//! `+1`, dropping it counts `-1`.  Because a lease can only be dropped once,
//! every increment is paired with exactly one decrement on every exit path,
//! panics included.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::domain::target::Target;

/// Process-wide reference counts of in-use targets, keyed by the target's
/// canonical string form.
///
/// Construct one at startup, wrap it in an `Arc`, and inject it wherever
/// connections are opened.
#[derive(Debug, Default)]
pub struct LiveTargetRegistry {
    counts: Mutex<HashMap<String, usize>>,
}

impl LiveTargetRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically adds `delta` to the count for `target` and returns the new
    /// count.
    ///
    /// A result of zero or less removes the entry, so the returned value is
    /// `0` exactly when the target is no longer present.
    pub fn adjust(&self, target: &Target, delta: isize) -> usize {
        let key = target.to_string();

        let (new_count, snapshot) = {
            // A panic while holding this lock cannot leave the map half-updated
            // (every write is a single insert/remove), so a poisoned lock is
            // still safe to use.
            let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
            let current = counts.get(&key).copied().unwrap_or(0) as isize;
            let updated = current.saturating_add(delta);

            let new_count = if updated <= 0 {
                counts.remove(&key);
                0
            } else {
                counts.insert(key, updated as usize);
                updated as usize
            };
            (new_count, RegistrySnapshot::from_map(&counts))
        };

        info!("active telnet targets: {snapshot}");
        new_count
    }

    /// Counts `+1` for `target` and returns the lease that will count `-1`
    /// when dropped.
    pub fn acquire(self: &Arc<Self>, target: Target) -> TargetLease {
        self.adjust(&target, 1);
        TargetLease {
            registry: Arc::clone(self),
            target,
        }
    }

    /// Current count for `target` (`0` if absent).
    pub fn count(&self, target: &Target) -> usize {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.get(&target.to_string()).copied().unwrap_or(0)
    }

    /// Number of distinct targets currently in use.
    pub fn len(&self) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no target is in use.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an immutable copy of the current counts.
    ///
    /// The snapshot is advisory: it may be stale by the time it is read and
    /// must only be used for logging.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        RegistrySnapshot::from_map(&counts)
    }
}

/// Immutable, ordered copy of the registry contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot(BTreeMap<String, usize>);

impl RegistrySnapshot {
    fn from_map(counts: &HashMap<String, usize>) -> Self {
        Self(counts.iter().map(|(k, v)| (k.clone(), *v)).collect())
    }

    /// Count for the given canonical `host:port` key, if present.
    pub fn get(&self, key: &str) -> Option<usize> {
        self.0.get(key).copied()
    }

    /// Returns `true` if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates `(target, count)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl fmt::Display for RegistrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (target, count)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{target}: {count}")?;
        }
        f.write_str("}")
    }
}

/// RAII registration of one session's use of a target.
///
/// Holding the lease keeps the target counted.  Dropping it (explicitly or by
/// unwinding) decrements the count exactly once.
#[derive(Debug)]
pub struct TargetLease {
    registry: Arc<LiveTargetRegistry>,
    target: Target,
}

impl TargetLease {
    /// The target this lease counts.
    pub fn target(&self) -> &Target {
        &self.target
    }
}

impl Drop for TargetLease {
    fn drop(&mut self) {
        self.registry.adjust(&self.target, -1);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn target(s: &str) -> Target {
        s.parse().unwrap()
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = LiveTargetRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_adjust_increments_from_absent() {
        // Arrange
        let registry = LiveTargetRegistry::new();
        let t = target("a:23");

        // Act
        let count = registry.adjust(&t, 1);

        // Assert
        assert_eq!(count, 1);
        assert_eq!(registry.snapshot().get("a:23"), Some(1));
    }

    #[test]
    fn test_adjust_to_zero_removes_entry() {
        let registry = LiveTargetRegistry::new();
        let t = target("a:23");
        registry.adjust(&t, 1);

        let count = registry.adjust(&t, -1);

        assert_eq!(count, 0);
        assert!(!registry.snapshot().contains("a:23"));
    }

    #[test]
    fn test_decrement_of_absent_target_stays_absent() {
        // No key may ever map to zero or a negative count.
        let registry = LiveTargetRegistry::new();
        let t = target("a:23");

        assert_eq!(registry.adjust(&t, -1), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_counts_are_per_target() {
        let registry = LiveTargetRegistry::new();
        registry.adjust(&target("a:23"), 1);
        registry.adjust(&target("a:23"), 1);
        registry.adjust(&target("b:23"), 1);

        let snap = registry.snapshot();
        assert_eq!(snap.get("a:23"), Some(2));
        assert_eq!(snap.get("b:23"), Some(1));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_lease_counts_while_held_and_releases_on_drop() {
        let registry = Arc::new(LiveTargetRegistry::new());
        let t = target("bbs:23");

        let lease = registry.acquire(t.clone());
        assert_eq!(registry.count(&t), 1);
        assert_eq!(lease.target(), &t);

        drop(lease);
        assert_eq!(registry.count(&t), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_two_leases_on_same_target() {
        let registry = Arc::new(LiveTargetRegistry::new());
        let t = target("bbs:23");

        let first = registry.acquire(t.clone());
        let second = registry.acquire(t.clone());
        assert_eq!(registry.count(&t), 2);

        drop(first);
        assert_eq!(registry.count(&t), 1);
        drop(second);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached_from_later_updates() {
        let registry = LiveTargetRegistry::new();
        let t = target("a:23");
        registry.adjust(&t, 1);

        let snap = registry.snapshot();
        registry.adjust(&t, 1);

        assert_eq!(snap.get("a:23"), Some(1));
        assert_eq!(registry.count(&t), 2);
    }

    #[test]
    fn test_snapshot_display_is_sorted() {
        let registry = LiveTargetRegistry::new();
        registry.adjust(&target("b:2"), 1);
        registry.adjust(&target("a:1"), 3);

        assert_eq!(registry.snapshot().to_string(), "{a:1: 3, b:2: 1}");
    }

    #[test]
    fn test_concurrent_adjustments_are_not_lost() {
        // Arrange: 8 threads each take and release 500 leases.
        let registry = Arc::new(LiveTargetRegistry::new());
        let t = target("shared:23");

        // Act
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let t = t.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let lease = registry.acquire(t.clone());
                        drop(lease);
                    }
                    registry.acquire(t)
                })
            })
            .collect();
        let leases: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Assert: exactly the eight still-held leases are counted.
        assert_eq!(registry.count(&t), 8);
        drop(leases);
        assert!(registry.is_empty());
    }
}
