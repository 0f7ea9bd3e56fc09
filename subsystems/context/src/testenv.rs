//! Simulated execution environment for tests.
//!
//! Each OS test thread gets its own stable simulated thread identity, and
//! can flip itself in and out of restricted context. Services built on a
//! `TestEnv` therefore see real hardware concurrency from `std::thread`
//! while every simulated thread keeps a distinct identity.

use core::sync::atomic::{AtomicU64, Ordering};
use lockwatch_hal::{ExecutionEnv, InterruptState, ThreadId};
use std::cell::Cell;

static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

std::thread_local! {
    static SIM_THREAD: u64 = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);
    static RESTRICTED: Cell<bool> = Cell::new(false);
    static CPU: Cell<usize> = Cell::new(0);
}

/// Test environment with a configurable processor count
pub(crate) struct TestEnv {
    cpu_count: usize,
}

impl TestEnv {
    pub(crate) fn new(cpu_count: usize) -> Self {
        Self { cpu_count }
    }
}

impl ExecutionEnv for TestEnv {
    fn current_thread(&self) -> ThreadId {
        ThreadId::from_raw(SIM_THREAD.with(|id| *id))
    }

    fn in_restricted_context(&self) -> bool {
        RESTRICTED.with(Cell::get)
    }

    fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    fn with_preemption_disabled<R>(&self, f: impl FnOnce(usize) -> R) -> R {
        f(CPU.with(Cell::get) % self.cpu_count)
    }

    fn disable_interrupts(&self) -> InterruptState {
        InterruptState::new(true)
    }

    fn restore_interrupts(&self, _state: InterruptState) {}
}

/// Put the calling test thread into restricted context
pub(crate) fn enter_restricted() {
    RESTRICTED.with(|flag| flag.set(true));
}

/// Return the calling test thread to process context
pub(crate) fn exit_restricted() {
    RESTRICTED.with(|flag| flag.set(false));
}

/// Pin the calling test thread to a simulated processor
pub(crate) fn set_cpu(cpu: usize) {
    CPU.with(|current| current.set(cpu));
}

/// The calling test thread's simulated identity
pub(crate) fn sim_thread_id() -> ThreadId {
    ThreadId::from_raw(SIM_THREAD.with(|id| *id))
}
