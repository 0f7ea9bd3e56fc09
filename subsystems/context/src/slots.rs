//! # Restricted-Context Slots
//!
//! One preallocated execution context per processor, reserved for
//! restricted/interrupt context. No lock, no allocation, no index: the
//! slot is fetched under a preemption-disabled scope, which is sufficient
//! exclusion because restricted execution does not migrate and does not
//! nest against itself on another processor's slot.

use crate::context::ExecutionContext;
use crate::{ContextError, ContextResult};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// The per-processor restricted-context slot table.
///
/// Built once at init, sized by the environment's processor count, alive
/// for the process lifetime. Slot records are never entered into the
/// registry index and never freed before teardown.
#[derive(Debug)]
pub struct RestrictedSlots {
    slots: Box<[Arc<ExecutionContext>]>,
}

impl RestrictedSlots {
    /// Preallocate one slot per processor
    pub fn new(cpu_count: usize) -> ContextResult<Self> {
        if cpu_count == 0 {
            return Err(ContextError::InvalidArgument);
        }
        let slots: Vec<_> = (0..cpu_count)
            .map(|_| Arc::new(ExecutionContext::new_restricted()))
            .collect();
        Ok(Self {
            slots: slots.into_boxed_slice(),
        })
    }

    /// The slot belonging to the given processor.
    ///
    /// The caller must hold the processor index stable (preemption
    /// disabled) for as long as it uses the slot.
    pub fn slot_for(&self, cpu: usize) -> &Arc<ExecutionContext> {
        &self.slots[cpu]
    }

    /// Number of slots
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// Whether every slot's reference count is back at zero.
    ///
    /// Verified, not enforced, at shutdown: a nonzero count means a
    /// restricted-context invocation retained without a balancing
    /// release.
    pub fn idle(&self) -> bool {
        self.slots.iter().all(|slot| slot.ref_count() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_processors_rejected() {
        assert_eq!(RestrictedSlots::new(0).unwrap_err(), ContextError::InvalidArgument);
    }

    #[test]
    fn test_one_slot_per_processor() {
        let slots = RestrictedSlots::new(4).unwrap();
        assert_eq!(slots.count(), 4);
        for cpu in 0..4 {
            let slot = slots.slot_for(cpu);
            assert!(slot.is_restricted_slot());
            assert_eq!(slot.identity(), None);
        }
        assert!(!Arc::ptr_eq(slots.slot_for(0), slots.slot_for(1)));
    }

    #[test]
    fn test_slot_fetch_is_stable() {
        let slots = RestrictedSlots::new(2).unwrap();
        assert!(Arc::ptr_eq(slots.slot_for(1), slots.slot_for(1)));
    }

    #[test]
    fn test_idle_tracks_slot_ref_counts() {
        let slots = RestrictedSlots::new(2).unwrap();
        assert!(slots.idle());
        slots.slot_for(1).retain_ref();
        assert!(!slots.idle());
        slots.slot_for(1).release_ref();
        assert!(slots.idle());
    }
}
