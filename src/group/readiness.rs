//! Single-fire readiness latch.
//!
//! A [`ReadyLatch`] resolves its [`ReadySignal`] at most once. Re-arming
//! replaces the underlying oneshot channel, so each group generation gets a
//! fresh signal; an unfired signal from a previous arming resolves as
//! "not ready" when it is replaced.

use std::sync::Mutex;
use tokio::sync::oneshot;

/// Fires a readiness signal at most once per arming.
///
/// # Examples
///
/// ```
/// use cdcwatch::group::ReadyLatch;
///
/// # tokio_test::block_on(async {
/// let (latch, first) = ReadyLatch::new();
/// let second = latch.rearm();
/// assert!(latch.fire());
/// assert!(!first.wait().await);
/// assert!(second.wait().await);
/// # });
/// ```
#[derive(Debug)]
pub struct ReadyLatch {
    slot: Mutex<Option<oneshot::Sender<()>>>,
}

/// Receiving side of a [`ReadyLatch`] arming.
#[derive(Debug)]
pub struct ReadySignal {
    rx: oneshot::Receiver<()>,
}

impl ReadyLatch {
    /// Creates an armed latch together with its first signal.
    pub fn new() -> (Self, ReadySignal) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Mutex::new(Some(tx)),
            },
            ReadySignal { rx },
        )
    }

    /// Replaces the latch with a fresh one and returns its signal.
    pub fn rearm(&self) -> ReadySignal {
        let (tx, rx) = oneshot::channel();
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(tx);
        ReadySignal { rx }
    }

    /// Fires the current arming. Returns `true` only for the first call
    /// after arming.
    pub fn fire(&self) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match sender {
            // the receiver may already be gone; firing still counts
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }
}

impl ReadySignal {
    /// Waits for the latch to fire.
    ///
    /// Returns `false` if the arming was replaced or dropped without firing.
    pub async fn wait(self) -> bool {
        self.rx.await.is_ok()
    }
}
