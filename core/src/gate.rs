//! The intake gate ("unblock enabled" flag).
//!
//! A single boolean decides whether ticket intake is currently permitted. It
//! is written by the window evaluator and read by the ingestion worker and the
//! HTTP gate middleware.
//!
//! # Memory ordering
//!
//! The flag has no compound invariant with any other state, so a lone
//! `AtomicBool` with `SeqCst` loads and stores is enough: a write is visible
//! to every reader as soon as it completes, and no broader lock exists.
//!
//! # Ownership
//!
//! [`GateState`] is a cheap, cloneable handle around a shared flag. Every
//! component receives its own clone; there is no process-global instance, so
//! tests construct an independent gate per case.
//!
//! ```
//! use ketuk_core::GateState;
//!
//! let gate = GateState::new();
//! assert!(!gate.is_open()); // closed until the first evaluator tick
//!
//! let reader = gate.clone();
//! gate.open();
//! assert!(reader.is_open());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared handle to the process-wide intake flag.
///
/// Cloning shares the flag; [`GateState::new`] creates an independent one.
/// The default value is closed and it is never persisted, so every process
/// restart begins closed.
#[derive(Debug, Clone, Default)]
pub struct GateState {
    open: Arc<AtomicBool>,
}

impl GateState {
    /// Create a new, closed gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether intake is currently permitted.
    ///
    /// Never blocks and has no side effects.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Permit intake. Returns the previous value.
    pub fn open(&self) -> bool {
        self.open.swap(true, Ordering::SeqCst)
    }

    /// Suppress intake. Returns the previous value.
    pub fn close(&self) -> bool {
        self.open.swap(false, Ordering::SeqCst)
    }
}
