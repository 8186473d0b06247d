//! Per-client monotonic counter and fence handles (`spec.md` §4.1).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Notify;

/// A per-client timeline: `issued_count` advances whenever a fence is
/// minted, `signaled_count` advances to release fences at or below it.
pub struct Timeline {
    issued: AtomicU64,
    signaled: AtomicU64,
    notify: Notify,
}

impl Timeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Timeline {
            issued: AtomicU64::new(0),
            signaled: AtomicU64::new(0),
            notify: Notify::new(),
        })
    }

    /// Mint a fence bound to the current `issued_count`, then advance it.
    ///
    /// Fences hold only a weak reference to their timeline (the same
    /// back-reference idiom `spec.md` §9 uses for client membership): once
    /// the owning `HalCamera` drops its strong `Arc<Timeline>` the fence
    /// reports ready rather than hanging forever on a counter nobody will
    /// ever bump again.
    pub fn create_fence(self: &Arc<Self>) -> Fence {
        let bound = self.issued.fetch_add(1, Ordering::AcqRel) + 1;
        Fence {
            timeline: Arc::downgrade(self),
            bound,
        }
    }

    /// Advance `issued_count` without minting a fence handle.
    pub fn bump_issuance(&self) {
        self.issued.fetch_add(1, Ordering::AcqRel);
    }

    /// Release all fences at or below the new signaled count.
    pub fn bump_signal(&self) {
        self.signaled.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_waiters();
    }

    /// Force every outstanding fence ready — called on teardown so waiters
    /// are never stranded (`spec.md` §4.1).
    pub fn force_ready(&self) {
        let issued = self.issued.load(Ordering::Acquire);
        self.signaled.fetch_max(issued, Ordering::AcqRel);
        self.notify.notify_waiters();
    }

    fn is_ready(&self, bound: u64) -> bool {
        self.signaled.load(Ordering::Acquire) >= bound
    }
}

impl Drop for Timeline {
    fn drop(&mut self) {
        self.force_ready();
    }
}

/// A cheaply-duplicable handle bound to a timeline's issuance count at the
/// moment it was minted.
#[derive(Clone)]
pub struct Fence {
    timeline: Weak<Timeline>,
    bound: u64,
}

impl Fence {
    pub fn is_ready(&self) -> bool {
        match self.timeline.upgrade() {
            Some(t) => t.is_ready(self.bound),
            // Owning timeline is gone; nothing will ever signal it again.
            None => true,
        }
    }

    /// Suspend until this fence becomes ready. This is the only
    /// suspension primitive the multiplexer exposes (`spec.md` §5); the
    /// caller awaits it outside any multiplexer lock.
    pub async fn wait(&self) {
        loop {
            let timeline = match self.timeline.upgrade() {
                Some(t) => t,
                None => return,
            };
            if timeline.is_ready(self.bound) {
                return;
            }
            let notified = timeline.notify.notified();
            if timeline.is_ready(self.bound) {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_ready_once_signaled() {
        let t = Timeline::new();
        let f = t.create_fence();
        assert!(!f.is_ready());
        t.bump_signal();
        assert!(f.is_ready());
    }

    #[test]
    fn earlier_fence_ready_after_later_signal() {
        let t = Timeline::new();
        let f1 = t.create_fence();
        let f2 = t.create_fence();
        t.bump_signal();
        assert!(f1.is_ready());
        assert!(!f2.is_ready());
    }

    #[tokio::test]
    async fn wait_resolves_on_signal() {
        let t = Timeline::new();
        let f = t.create_fence();
        let t2 = t.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            t2.bump_signal();
        });
        f.wait().await;
        assert!(f.is_ready());
    }

    #[test]
    fn drop_of_owning_timeline_forces_fence_ready() {
        let t = Timeline::new();
        let f = t.create_fence();
        assert!(!f.is_ready());
        drop(t);
        assert!(f.is_ready());
    }

    #[test]
    fn wait_returns_immediately_once_already_signaled() {
        let t = Timeline::new();
        let f = t.create_fence();
        t.bump_signal();
        tokio_test::block_on(f.wait());
        assert!(f.is_ready());
    }
}
