//! # Context Registry
//!
//! Shared index from thread identity to execution context, for process
//! context. Restricted context never touches it.
//!
//! The index lock is also taken from restricted context, so every
//! critical section runs with local interrupt delivery off: a holder that
//! could be interrupted on its own processor by a restricted-context
//! acquisition of the same lock would deadlock against itself. Critical
//! sections are bounded lookups and structural mutations only; allocation
//! always happens outside.

use crate::context::ExecutionContext;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use lockwatch_hal::{ExecutionEnv, ThreadId};
use spin::Mutex;

/// Thread-safe map from thread identity to context record.
///
/// Invariants: at most one entry per identity; an indexed record's
/// reference count is nonzero (a release that drops it to zero removes
/// the entry in the same operation).
pub struct ContextRegistry<E: ExecutionEnv> {
    env: Arc<E>,
    index: Mutex<BTreeMap<ThreadId, Arc<ExecutionContext>>>,
    /// Total index-lock acquisitions, for diagnostics
    lock_acquisitions: AtomicU64,
}

impl<E: ExecutionEnv> ContextRegistry<E> {
    /// Create an empty registry
    pub fn new(env: Arc<E>) -> Self {
        Self {
            env,
            index: Mutex::new(BTreeMap::new()),
            lock_acquisitions: AtomicU64::new(0),
        }
    }

    /// Run `f` on the index under the lock, with interrupts off
    fn with_index<R>(&self, f: impl FnOnce(&mut BTreeMap<ThreadId, Arc<ExecutionContext>>) -> R) -> R {
        let saved = self.env.disable_interrupts();
        self.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
        let mut index = self.index.lock();
        let result = f(&mut index);
        drop(index);
        self.env.restore_interrupts(saved);
        result
    }

    /// Look up the context for a thread identity
    pub fn find(&self, identity: ThreadId) -> Option<Arc<ExecutionContext>> {
        self.with_index(|index| index.get(&identity).cloned())
    }

    /// Insert a freshly allocated context.
    ///
    /// The caller allocates outside any lock and only inserts after a
    /// `find` came back empty; an existing entry for the same identity is
    /// a contract violation. Restricted slot records are never indexed.
    pub fn insert(&self, ctx: Arc<ExecutionContext>) {
        let Some(identity) = ctx.identity() else {
            debug_assert!(false, "restricted slot record cannot be indexed");
            return;
        };
        self.with_index(|index| {
            let previous = index.insert(identity, ctx);
            debug_assert!(
                previous.is_none(),
                "duplicate registry entry for thread {identity}"
            );
        });
    }

    /// Remove the entry for a thread identity.
    ///
    /// A missing entry is a contract violation.
    pub fn remove(&self, identity: ThreadId) -> Option<Arc<ExecutionContext>> {
        let removed = self.with_index(|index| index.remove(&identity));
        debug_assert!(removed.is_some(), "no registry entry for thread {identity}");
        removed
    }

    /// Number of indexed contexts
    pub fn len(&self) -> usize {
        self.with_index(|index| index.len())
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every remaining entry out of the index (teardown walk)
    pub fn drain(&self) -> Vec<(ThreadId, Arc<ExecutionContext>)> {
        self.with_index(|index| core::mem::take(index).into_iter().collect())
    }

    /// Total number of index-lock acquisitions so far
    pub fn lock_acquisitions(&self) -> u64 {
        self.lock_acquisitions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockwatch_hal::StubEnv;

    fn registry() -> ContextRegistry<StubEnv> {
        ContextRegistry::new(Arc::new(StubEnv::new()))
    }

    fn context(raw: u64) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::new_process(ThreadId::from_raw(raw)))
    }

    #[test]
    fn test_insert_find_remove() {
        let registry = registry();
        let id = ThreadId::from_raw(42);

        assert!(registry.find(id).is_none());
        registry.insert(context(42));
        let found = registry.find(id).unwrap();
        assert_eq!(found.identity(), Some(id));
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(id).unwrap();
        assert!(Arc::ptr_eq(&found, &removed));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_entries_are_independent() {
        let registry = registry();
        registry.insert(context(1));
        registry.insert(context(2));
        registry.insert(context(3));
        assert_eq!(registry.len(), 3);

        registry.remove(ThreadId::from_raw(2));
        assert!(registry.find(ThreadId::from_raw(1)).is_some());
        assert!(registry.find(ThreadId::from_raw(2)).is_none());
        assert!(registry.find(ThreadId::from_raw(3)).is_some());
    }

    #[test]
    #[should_panic(expected = "duplicate registry entry")]
    fn test_duplicate_insert_panics() {
        let registry = registry();
        registry.insert(context(5));
        registry.insert(context(5));
    }

    #[test]
    #[should_panic(expected = "no registry entry")]
    fn test_remove_missing_panics() {
        let registry = registry();
        registry.remove(ThreadId::from_raw(5));
    }

    #[test]
    fn test_drain_empties_index() {
        let registry = registry();
        registry.insert(context(1));
        registry.insert(context(2));

        let mut drained = registry.drain();
        drained.sort_by_key(|(id, _)| *id);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, ThreadId::from_raw(1));
        assert_eq!(drained[1].0, ThreadId::from_raw(2));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lock_acquisitions_are_counted() {
        let registry = registry();
        let before = registry.lock_acquisitions();
        registry.find(ThreadId::from_raw(1));
        registry.insert(context(1));
        registry.remove(ThreadId::from_raw(1));
        assert_eq!(registry.lock_acquisitions(), before + 3);
    }
}
