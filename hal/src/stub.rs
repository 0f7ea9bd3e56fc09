//! # Stub Environment
//!
//! Fallback [`ExecutionEnv`] implementation: a single processor, a single
//! fixed thread identity, never in restricted context, no interrupt
//! delivery to control. Suitable for bring-up and for unit tests that do
//! not need simulated threads.

use crate::env::{ExecutionEnv, InterruptState};
use crate::ThreadId;

/// Stub execution environment
#[derive(Debug, Clone, Copy, Default)]
pub struct StubEnv;

impl StubEnv {
    /// Create a new stub environment
    pub const fn new() -> Self {
        Self
    }
}

impl ExecutionEnv for StubEnv {
    fn current_thread(&self) -> ThreadId {
        ThreadId::from_raw(0)
    }

    fn in_restricted_context(&self) -> bool {
        false
    }

    fn cpu_count(&self) -> usize {
        1
    }

    fn with_preemption_disabled<R>(&self, f: impl FnOnce(usize) -> R) -> R {
        f(0)
    }

    fn disable_interrupts(&self) -> InterruptState {
        InterruptState::new(false)
    }

    fn restore_interrupts(&self, _state: InterruptState) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_identity_is_stable() {
        let env = StubEnv::new();
        assert_eq!(env.current_thread(), env.current_thread());
        assert!(!env.in_restricted_context());
    }

    #[test]
    fn test_stub_single_processor() {
        let env = StubEnv::new();
        assert_eq!(env.cpu_count(), 1);
        assert_eq!(env.with_preemption_disabled(|cpu| cpu), 0);
    }

    #[test]
    fn test_stub_interrupt_state_round_trip() {
        let env = StubEnv::new();
        let state = env.disable_interrupts();
        assert!(!state.was_enabled());
        env.restore_interrupts(state);
    }
}
