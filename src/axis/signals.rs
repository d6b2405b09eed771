use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;

pub const STOP: u32 = 1;
pub const EMERGENCY_STOP: u32 = 1 << 1;
pub const KEEP_SPEED: u32 = 1 << 2;
pub const GUIDE: u32 = 1 << 3;

/// Signal bits shared between an axis handle and its task.
///
/// Raising is a single atomic OR plus a wakeup, so `emergency_stop` never
/// waits on a lock. The task consumes bits at every suspension point of its
/// state machine.
#[derive(Default)]
pub struct Signals {
    bits: AtomicU32,
    notify: Notify,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, mask: u32) {
        self.bits.fetch_or(mask, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Consume and return whichever bits of `mask` are raised.
    pub fn take(&self, mask: u32) -> u32 {
        self.bits.fetch_and(!mask, Ordering::SeqCst) & mask
    }

    /// Wait until at least one bit of `mask` is raised, consuming it.
    pub async fn wait(&self, mask: u32) -> u32 {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a raise in between is not lost.
            notified.as_mut().enable();
            let got = self.take(mask);
            if got != 0 {
                return got;
            }
            notified.await;
        }
    }

    /// Like [`wait`](Self::wait), but gives up after `dur` and returns 0.
    pub async fn wait_timeout(&self, mask: u32, dur: Duration) -> u32 {
        timeout(dur, self.wait(mask)).await.unwrap_or(0)
    }
}
