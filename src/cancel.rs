//! Cooperative cancellation. A [CancellationToken] is shared between the caller and a running
//! processor; the processor polls it at checkpoints and stops with
//! [SyncError::OperationCancelled] when a shutdown was requested. Inside a [CriticalSection]
//! checkpoints pass regardless, and the request is honored at the first checkpoint after the
//! section ends.
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use crate::error::SyncError;

#[derive(Debug, Default)]
struct TokenState {
    requested: AtomicBool,
    honored: AtomicBool,
    shields: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a shutdown. Takes effect at the next unshielded checkpoint.
    pub fn cancel(&self) {
        self.state.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    /// True once a checkpoint has actually stopped work because of a shutdown request.
    pub fn was_honored(&self) -> bool {
        self.state.honored.load(Ordering::SeqCst)
    }

    pub fn is_shielded(&self) -> bool {
        self.state.shields.load(Ordering::SeqCst) > 0
    }

    pub fn checkpoint(&self) -> Result<(), SyncError> {
        if self.is_cancelled() && !self.is_shielded() {
            self.state.honored.store(true, Ordering::SeqCst);
            return Err(SyncError::OperationCancelled);
        }
        Ok(())
    }

    /// Enter a region that must not be interrupted. The region lasts until the guard drops.
    pub fn critical_section(&self) -> CriticalSection {
        self.state.shields.fetch_add(1, Ordering::SeqCst);
        CriticalSection {
            token: self.clone(),
        }
    }
}

/// RAII guard returned by [CancellationToken::critical_section].
#[derive(Debug)]
#[must_use = "the critical section ends when the guard is dropped"]
pub struct CriticalSection {
    token: CancellationToken,
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        self.token.state.shields.fetch_sub(1, Ordering::SeqCst);
    }
}
