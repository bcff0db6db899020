//! Cooperative statement cancellation.
//!
//! Long-running operations check a shared [`StopSignal`] at top-of-loop
//! checkpoints: after each posting list processed, after each R-tree node
//! expanded, after each data page scanned.  Because every on-disk mutation
//! follows the write-to-temp / fsync / rename pattern, a stopped statement
//! leaves no partial state behind.

use std::io;
use std::sync::{Arc, atomic::AtomicBool};

/// Shared cancellation flag, cloned into every long-running operation of
/// one statement.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Request cancellation.  Takes effect at the next checkpoint.
    pub fn send(&self) {
        self.0.store(true, std::sync::atomic::Ordering::Release);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Checkpoint helper: error out of the current loop when stopped.
    pub fn checkpoint(&self) -> io::Result<()> {
        if self.is_stopped() {
            Err(io::Error::new(io::ErrorKind::Interrupted, "statement cancelled"))
        } else {
            Ok(())
        }
    }
}
