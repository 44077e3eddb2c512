//! Registry of live connections.
//!
//! Entries live in a slab addressed by index plus generation, so a key held
//! by a finished connection can never remove the entry that later reuses
//! its slot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use slab::Slab;
use tokio::sync::Notify;

/// Handle to one registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    index: usize,
    generation: u32,
}

#[derive(Debug)]
struct Entry<T> {
    generation: u32,
    value: T,
}

#[derive(Debug)]
struct Entries<T> {
    slab: Slab<Entry<T>>,
    next_generation: u32,
}

impl<T> Entries<T> {
    fn get_mut(&mut self, key: RegistryKey) -> Option<&mut T> {
        self.slab
            .get_mut(key.index)
            .filter(|entry| entry.generation == key.generation)
            .map(|entry| &mut entry.value)
    }
}

#[derive(Debug)]
struct Inner<T> {
    entries: Mutex<Entries<T>>,
    emptied: Notify,
}

/// Shared, cloneable set of live connection entries.
#[derive(Debug)]
pub struct ConnectionRegistry<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ConnectionRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ConnectionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConnectionRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(Entries {
                    slab: Slab::new(),
                    next_generation: 0,
                }),
                emptied: Notify::new(),
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries<T>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, value: T) -> RegistryKey {
        let mut entries = self.entries();
        let generation = entries.next_generation;
        entries.next_generation = generation.wrapping_add(1);
        let index = entries.slab.insert(Entry { generation, value });
        RegistryKey { index, generation }
    }

    /// Remove an entry. Stale keys return `None` and leave the slot alone.
    pub fn remove(&self, key: RegistryKey) -> Option<T> {
        let mut entries = self.entries();
        entries.get_mut(key)?;
        let entry = entries.slab.try_remove(key.index)?;
        if entries.slab.is_empty() {
            self.inner.emptied.notify_waiters();
        }
        Some(entry.value)
    }

    /// Mutate a live entry in place. Returns `false` for stale keys.
    pub fn update(&self, key: RegistryKey, f: impl FnOnce(&mut T)) -> bool {
        match self.entries().get_mut(key) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: RegistryKey) -> bool {
        self.update(key, |_| {})
    }

    pub fn len(&self) -> usize {
        self.entries().slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every live entry while holding the registry lock.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        let entries = self.entries();
        for (_, entry) in entries.slab.iter() {
            f(&entry.value);
        }
    }

    /// Resolves once the registry holds no entries.
    pub async fn wait_empty(&self) {
        loop {
            let notified = self.inner.emptied.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl<T: Clone> ConnectionRegistry<T> {
    /// Copy of every live entry, in slot order.
    pub fn snapshot(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each(|value| out.push(value.clone()));
        out
    }
}

/// Removes its entry from the registry when dropped.
pub struct RegistryGuard<T> {
    registry: ConnectionRegistry<T>,
    key: RegistryKey,
}

impl<T> RegistryGuard<T> {
    pub fn new(registry: ConnectionRegistry<T>, key: RegistryKey) -> Self {
        Self { registry, key }
    }
}

impl<T> Drop for RegistryGuard<T> {
    fn drop(&mut self) {
        self.registry.remove(self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::FutureExt;

    use super::*;

    #[test]
    fn stale_key_cannot_remove_reused_slot() {
        let registry = ConnectionRegistry::new();
        let first = registry.insert("first");
        assert_eq!(registry.remove(first), Some("first"));

        let second = registry.insert("second");
        assert_ne!(first, second, "reused slot should carry a new generation");
        assert_eq!(registry.remove(first), None);
        assert!(registry.contains(second));
        assert_eq!(registry.snapshot(), vec!["second"]);
    }

    #[test]
    fn freed_slots_are_reused() {
        let registry = ConnectionRegistry::new();
        let keys: Vec<_> = (0..4).map(|n| registry.insert(n)).collect();
        for key in &keys[..3] {
            registry.remove(*key);
        }
        let again: Vec<_> = (10..13).map(|n| registry.insert(n)).collect();
        for key in &again {
            assert!(keys[..3].iter().any(|old| old.index == key.index));
            assert!(!keys.contains(key), "a reused slot should get a fresh key");
        }
        assert_eq!(registry.len(), 4);
        assert!(!registry.update(keys[0], |value| *value = 99));
    }

    #[test]
    fn update_and_snapshot() {
        let registry = ConnectionRegistry::new();
        let a = registry.insert(1);
        let _b = registry.insert(2);
        assert!(registry.update(a, |value| *value = 10));
        let mut values = registry.snapshot();
        values.sort();
        assert_eq!(values, vec![2, 10]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn guard_removes_on_drop() {
        let registry = ConnectionRegistry::new();
        let key = registry.insert(());
        drop(RegistryGuard::new(registry.clone(), key));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn wait_empty_resolves_after_last_removal() {
        let registry = ConnectionRegistry::new();
        assert!(registry.wait_empty().now_or_never().is_some());

        let a = registry.insert("a");
        let b = registry.insert("b");
        let waiter = tokio::spawn({
            let registry = registry.clone();
            async move { registry.wait_empty().await }
        });

        registry.remove(a);
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        registry.remove(b);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_empty should resolve")
            .expect("waiter should not panic");
    }
}
