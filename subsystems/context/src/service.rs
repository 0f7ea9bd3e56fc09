//! # Context Lifecycle Service
//!
//! The public retain/release/query surface. Every operation inspects the
//! execution domain once at entry and dispatches:
//! - **Process context**: shared registry, lazy allocation on first
//!   retain, free-on-zero release.
//! - **Restricted context**: the calling processor's preallocated slot;
//!   no allocation, no index, no lock, no failure path.
//!
//! Allocation failure in process context is surfaced as "no context" and
//! callers degrade to running without lock-order diagnostics; it never
//! fails the surrounding operation.

use crate::context::ExecutionContext;
use crate::registry::ContextRegistry;
use crate::slots::RestrictedSlots;
use crate::tracking::LockRank;
use crate::ContextResult;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use lockwatch_hal::ExecutionEnv;

/// Process-wide context lifecycle service.
///
/// Constructed explicitly via [`ContextService::init`] and handed to
/// consumers as a reference; there is no ambient global instance.
pub struct ContextService<E: ExecutionEnv> {
    env: Arc<E>,
    registry: ContextRegistry<E>,
    slots: RestrictedSlots,
    /// Total process-context record allocations, for diagnostics
    contexts_allocated: AtomicU64,
    /// Armed allocation failures (fault injection)
    fail_allocations: AtomicU32,
}

impl<E: ExecutionEnv> ContextService<E> {
    /// Set up the service: an empty registry and one restricted-context
    /// slot per processor.
    pub fn init(env: Arc<E>) -> ContextResult<Self> {
        let slots = RestrictedSlots::new(env.cpu_count())?;
        log::debug!("context service: {} restricted slots", slots.count());
        Ok(Self {
            registry: ContextRegistry::new(env.clone()),
            env,
            slots,
            contexts_allocated: AtomicU64::new(0),
            fail_allocations: AtomicU32::new(0),
        })
    }

    /// Tear the service down.
    ///
    /// Walks every entry still in the index; each one is a thread that
    /// retained but never fully released. Each leftover is reported and
    /// freed, and its suppression nesting and held-lock state are
    /// asserted balanced. Returns the number of leaked records; zero on
    /// every correct shutdown. Shutdown completes regardless.
    pub fn teardown(&self) -> usize {
        let leftovers = self.registry.drain();
        for (identity, ctx) in &leftovers {
            log::error!(
                "left-over execution context for thread {} (ref_count {})",
                identity,
                ctx.ref_count()
            );
            debug_assert!(
                ctx.held_locks().is_empty(),
                "leaked context for thread {identity} still holds tracked locks"
            );
            debug_assert_eq!(
                ctx.suppression_depth(),
                0,
                "leaked context for thread {identity} has unbalanced tracking suppression"
            );
            debug_assert_eq!(
                Arc::strong_count(ctx),
                1,
                "leaked context for thread {identity} is still referenced elsewhere"
            );
        }
        if !self.slots.idle() {
            log::error!("restricted-context slot retained without balancing release");
        }
        let leaked = leftovers.len();
        if leaked == 0 {
            log::debug!("context service teardown: index clean");
        }
        leaked
    }

    /// The current thread's context, without retaining it.
    ///
    /// `None` if the thread has never retained (or its context was
    /// released back to zero). Does not affect the reference count.
    pub fn current(&self) -> Option<Arc<ExecutionContext>> {
        if self.env.in_restricted_context() {
            Some(self.restricted_current())
        } else {
            self.process_current()
        }
    }

    /// Retain the current thread's context, creating it if necessary.
    ///
    /// Returns `None` only on allocation failure in process context;
    /// never fails in restricted context.
    pub fn retain(&self) -> Option<Arc<ExecutionContext>> {
        if self.env.in_restricted_context() {
            Some(self.restricted_retain())
        } else {
            self.process_retain()
        }
    }

    /// Release the current thread's context.
    ///
    /// Must pair 1:1 with a prior successful [`retain`](Self::retain) on
    /// the same thread or processor; releasing without one is a contract
    /// violation.
    pub fn release(&self) {
        if self.env.in_restricted_context() {
            self.restricted_release();
        } else {
            self.process_release();
        }
    }

    /// Disable lock-order tracking for the current thread.
    ///
    /// Retains a context (creating one if necessary) and bumps its
    /// suppression depth. If the retain fails, suppression is a silent
    /// no-op: best-effort, never fatal.
    pub fn disable_tracking(&self) {
        let Some(ctx) = self.retain() else {
            return;
        };
        ctx.push_suppression();
    }

    /// Re-enable lock-order tracking for the current thread.
    ///
    /// Must pair with a preceding successful
    /// [`disable_tracking`](Self::disable_tracking) on the same thread;
    /// undoes its retain.
    pub fn enable_tracking(&self) {
        let Some(ctx) = self.current() else {
            debug_assert!(false, "tracking enabled without a matching disable");
            return;
        };
        ctx.pop_suppression();
        self.release();
    }

    /// Record a ranked lock acquisition for the current thread.
    ///
    /// A no-op when the thread has no context or tracking is suppressed.
    pub fn note_lock_acquired(&self, rank: LockRank) {
        if let Some(ctx) = self.current() {
            if ctx.tracking_enabled() {
                ctx.held_locks().record_acquire(rank);
            }
        }
    }

    /// Record a ranked lock release for the current thread.
    ///
    /// A no-op when the thread has no context or tracking is suppressed.
    pub fn note_lock_released(&self, rank: LockRank) {
        if let Some(ctx) = self.current() {
            if ctx.tracking_enabled() {
                ctx.held_locks().record_release(rank);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Process-context path
    // -------------------------------------------------------------------------

    fn process_current(&self) -> Option<Arc<ExecutionContext>> {
        self.registry.find(self.env.current_thread())
    }

    fn process_retain(&self) -> Option<Arc<ExecutionContext>> {
        let identity = self.env.current_thread();
        let ctx = match self.registry.find(identity) {
            Some(ctx) => {
                // Defends against identity-key corruption in the index.
                debug_assert_eq!(
                    ctx.identity(),
                    Some(identity),
                    "registry returned a context for another thread"
                );
                ctx
            }
            None => {
                // Allocation happens outside any lock and may sleep.
                // Nobody else inserts or removes this identity, so the
                // separate find/insert steps cannot race.
                let ctx = self.allocate_context()?;
                self.registry.insert(ctx.clone());
                ctx
            }
        };
        ctx.retain_ref();
        Some(ctx)
    }

    fn process_release(&self) {
        let identity = self.env.current_thread();
        let Some(ctx) = self.registry.find(identity) else {
            debug_assert!(false, "release without retain on thread {identity}");
            return;
        };
        debug_assert_eq!(ctx.identity(), Some(identity));
        // Releases for one identity only ever run on that thread, so the
        // zero-crossing decrement and the removal cannot interleave with
        // another release of the same record.
        if ctx.release_ref() == 0 {
            self.registry.remove(identity);
        }
    }

    fn allocate_context(&self) -> Option<Arc<ExecutionContext>> {
        if self.take_allocation_fault() {
            return None;
        }
        let identity = self.env.current_thread();
        self.contexts_allocated.fetch_add(1, Ordering::Relaxed);
        Some(Arc::new(ExecutionContext::new_process(identity)))
    }

    // -------------------------------------------------------------------------
    // Restricted-context path
    // -------------------------------------------------------------------------

    fn restricted_current(&self) -> Arc<ExecutionContext> {
        // The slot must belong to the processor that uses it, so the
        // fetch runs with migration off.
        self.env
            .with_preemption_disabled(|cpu| self.slots.slot_for(cpu).clone())
    }

    fn restricted_retain(&self) -> Arc<ExecutionContext> {
        let ctx = self.restricted_current();
        ctx.retain_ref();
        ctx
    }

    fn restricted_release(&self) {
        let ctx = self.restricted_current();
        ctx.release_ref();
    }

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    /// Arm the next `n` process-context record allocations to fail.
    ///
    /// Driver-test hook for exercising the exhaustion path; the armed
    /// count drains one per attempted allocation.
    pub fn fail_next_allocations(&self, n: u32) {
        self.fail_allocations.fetch_add(n, Ordering::Relaxed);
    }

    fn take_allocation_fault(&self) -> bool {
        let mut armed = self.fail_allocations.load(Ordering::Relaxed);
        while armed > 0 {
            match self.fail_allocations.compare_exchange_weak(
                armed,
                armed - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(seen) => armed = seen,
            }
        }
        false
    }

    /// Total process-context record allocations so far
    pub fn contexts_allocated(&self) -> u64 {
        self.contexts_allocated.load(Ordering::Relaxed)
    }

    /// The shared registry index
    pub fn registry(&self) -> &ContextRegistry<E> {
        &self.registry
    }

    /// The per-processor restricted-context slot table
    pub fn restricted_slots(&self) -> &RestrictedSlots {
        &self.slots
    }
}
