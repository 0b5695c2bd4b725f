//! One-shot synchronization baton.
//!
//! A baton is posted exactly once and waited on at most from the other
//! side of a hand-off: the recording-notify path posts it when the last
//! reference to a recording context drops, letting the caller block until
//! every enqueued traversal has finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use event_listener::{Event, Listener};

/// Cloneable handle to a one-shot event.
#[derive(Clone)]
pub struct Baton {
    inner: Arc<BatonInner>,
}

struct BatonInner {
    posted: AtomicBool,
    event: Event,
}

impl Baton {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BatonInner {
                posted: AtomicBool::new(false),
                event: Event::new(),
            }),
        }
    }

    /// Signal the baton, waking all waiters. May be called from any thread.
    ///
    /// A baton is one-shot: posting twice is a programming error.
    pub fn post(&self) {
        let was_posted = self.inner.posted.swap(true, Ordering::Release);
        debug_assert!(!was_posted, "baton posted twice");
        self.inner.event.notify(usize::MAX);
    }

    /// True if the baton has been posted.
    pub fn try_wait(&self) -> bool {
        self.inner.posted.load(Ordering::Acquire)
    }

    /// Block the calling thread until the baton is posted.
    /// Returns immediately if it already was.
    pub fn wait(&self) {
        loop {
            if self.try_wait() {
                return;
            }
            let listener = self.inner.event.listen();
            // Re-check: the post may have raced in between.
            if self.try_wait() {
                return;
            }
            listener.wait();
        }
    }
}

impl Default for Baton {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Baton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Baton")
            .field("posted", &self.try_wait())
            .finish()
    }
}
