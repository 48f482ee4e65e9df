//! Explicitly passed session and UI-side shared counters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Who is acting. Passed to every write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub uid: String,
    pub admin: bool,
}

impl Session {
    pub fn admin(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            admin: true,
        }
    }

    pub fn member(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            admin: false,
        }
    }
}

/// Count of open overlays that need the page behind them scroll-locked.
///
/// Clones share the count. Each [`ClipGuard`] holds one reference and
/// releases it when dropped.
#[derive(Clone, Debug, Default)]
pub struct ClipCounter(Arc<AtomicUsize>);

impl ClipCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> ClipGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        ClipGuard(self.clone())
    }

    pub fn depth(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_clipped(&self) -> bool {
        self.depth() > 0
    }
}

/// One hold on a [`ClipCounter`].
#[derive(Debug)]
pub struct ClipGuard(ClipCounter);

impl Drop for ClipGuard {
    fn drop(&mut self) {
        (self.0).0.fetch_sub(1, Ordering::SeqCst);
    }
}
