//! # Lockwatch HAL - Execution Environment Abstraction
//!
//! This crate defines the traits through which the context-tracking
//! subsystem observes its host platform. The subsystem itself never asks
//! the platform anything directly; everything it needs to know — who is
//! running, whether blocking is allowed right now, how many processors
//! exist — arrives through an [`ExecutionEnv`] handle supplied at
//! construction.
//!
//! ## Design Philosophy
//!
//! The environment abstraction is designed to be:
//! - **Minimal**: Only exposes what the context subsystem consumes
//! - **Replaceable**: A test environment can simulate threads and
//!   restricted context without any real hardware
//! - **Honest about domains**: The restricted-context predicate is a
//!   first-class operation, not an afterthought

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod env;
pub mod stub;

pub use env::{ExecutionEnv, InterruptState};
pub use stub::StubEnv;

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;

/// Errors that can occur in HAL operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// The operation is not supported on this platform
    NotSupported,
    /// Invalid parameter provided
    InvalidParameter,
    /// Feature not initialized
    NotInitialized,
    /// Memory allocation failed
    OutOfMemory,
}

/// Stable unique identifier for a schedulable process-context thread.
///
/// The platform guarantees the identifier is unique for the thread's
/// lifetime. The identifier space may be recycled after a thread
/// terminates; consumers must rely on exact-match invariants, never on
/// reuse timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Create a thread ID from a raw platform value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
