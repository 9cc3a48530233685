//! Single-fire shutdown event shared by the signal bridge and the host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Fires at most once; every waiter, past or future, observes it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Only the first call changes anything; it is the
    /// only one that returns `true`.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait(&self) {
        self.token.cancelled().await
    }

    /// Token for subsystems that already speak `CancellationToken`. It is
    /// cancelled when the signal fires; cancelling it does not fire the
    /// signal.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn only_the_first_fire_transitions() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(!signal.clone().fire());
        assert!(signal.is_fired());
    }

    #[test]
    fn handed_out_tokens_follow_but_cannot_fire() {
        let signal = ShutdownSignal::new();
        let token = signal.token();
        token.cancel();
        assert!(!signal.is_fired());

        let follower = signal.token();
        assert!(signal.fire());
        assert!(follower.is_cancelled());
        assert!(!signal.fire());
    }

    #[tokio::test]
    async fn all_waiters_wake() {
        let signal = ShutdownSignal::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let s = signal.clone();
                tokio::spawn(async move { s.wait().await })
            })
            .collect();

        tokio::task::yield_now().await;
        signal.fire();
        signal.fire();

        for w in waiters {
            tokio::time::timeout(Duration::from_secs(1), w)
                .await
                .expect("waiter did not wake")
                .unwrap();
        }
        // Late waiters return immediately.
        signal.wait().await;
    }
}
