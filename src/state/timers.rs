use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, sleep},
};
use uuid::Uuid;

/// Delay applied when a phase timer that already fired is armed again for the same move.
pub const REARM_DELAY: Duration = Duration::from_secs(1);

/// One cancellable resolution task per move under evaluation.
#[derive(Default)]
pub struct PhaseTimers {
    handles: DashMap<Uuid, JoinHandle<()>>,
}

impl PhaseTimers {
    /// Empty timer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `fire` after `delay` unless a timer for `move_id` is still waiting.
    ///
    /// A timer that already ran is replaced, but never sooner than [`REARM_DELAY`].
    /// Returns whether a new task was spawned.
    pub fn arm<F>(&self, move_id: Uuid, delay: Duration, fire: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = match self.handles.get(&move_id) {
            Some(handle) if !handle.is_finished() => return false,
            Some(_) => delay.max(REARM_DELAY),
            None => delay,
        };

        // Cancelling only ever interrupts the wait; a resolution already started runs to the end.
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            tokio::spawn(fire);
        });
        self.handles.insert(move_id, handle);
        true
    }

    /// Abort every pending timer except the one for `keep`.
    pub fn retain(&self, keep: Option<Uuid>) {
        self.handles.retain(|move_id, handle| {
            let kept = Some(*move_id) == keep;
            if !kept {
                handle.abort();
            }
            kept
        });
    }

    /// Abort every pending timer.
    pub fn cancel_all(&self) {
        self.retain(None);
    }
}

/// How a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    /// Poll tick or the client's own write; always runs.
    Forced,
    /// Store notification; throttled by the minimum refresh interval.
    Passive,
}

/// Outcome of asking the [`RefreshClock`] for permission to refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPermit {
    /// The refresh may run.
    Granted,
    /// Skipped; the window closes after the given delay.
    Throttled(Duration),
}

/// Throttle for passive refreshes plus the trailing refresh bookkeeping.
#[derive(Default)]
pub struct RefreshClock {
    last: Mutex<Option<Instant>>,
    trailing: AtomicBool,
}

impl RefreshClock {
    /// Clock that has never refreshed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a refresh start, or refuse a passive one inside the `min_interval` window.
    pub async fn begin(&self, kind: RefreshKind, min_interval: Duration) -> RefreshPermit {
        let mut last = self.last.lock().await;
        let now = Instant::now();
        if kind == RefreshKind::Passive {
            if let Some(previous) = *last {
                let elapsed = now.duration_since(previous);
                if elapsed < min_interval {
                    return RefreshPermit::Throttled(min_interval - elapsed);
                }
            }
        }
        *last = Some(now);
        RefreshPermit::Granted
    }

    /// Claim the single trailing refresh slot; `false` when one is already scheduled.
    pub fn claim_trailing(&self) -> bool {
        !self.trailing.swap(true, Ordering::AcqRel)
    }

    /// Release the trailing slot once the trailing refresh was requested.
    pub fn release_trailing(&self) {
        self.trailing.store(false, Ordering::Release);
    }

    /// Forget the last refresh, e.g. when switching sessions.
    pub async fn reset(&self) {
        self.last.lock().await.take();
        self.release_trailing();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn passive_refreshes_are_throttled_but_forced_ones_are_not() {
        let clock = RefreshClock::new();
        let window = Duration::from_secs(1);

        assert_eq!(
            clock.begin(RefreshKind::Passive, window).await,
            RefreshPermit::Granted
        );
        sleep(Duration::from_millis(400)).await;
        assert_eq!(
            clock.begin(RefreshKind::Passive, window).await,
            RefreshPermit::Throttled(Duration::from_millis(600))
        );
        assert_eq!(
            clock.begin(RefreshKind::Forced, window).await,
            RefreshPermit::Granted
        );

        sleep(window).await;
        assert_eq!(
            clock.begin(RefreshKind::Passive, window).await,
            RefreshPermit::Granted
        );
    }

    #[test]
    fn only_one_trailing_refresh_is_claimed() {
        let clock = RefreshClock::new();
        assert!(clock.claim_trailing());
        assert!(!clock.claim_trailing());
        clock.release_trailing();
        assert!(clock.claim_trailing());
    }

    #[tokio::test(start_paused = true)]
    async fn timers_fire_once_and_can_be_cancelled() {
        let timers = PhaseTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let kept = Uuid::new_v4();
        let dropped = Uuid::new_v4();

        for id in [kept, dropped] {
            let fired = fired.clone();
            assert!(timers.arm(id, Duration::from_secs(10), async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(!timers.arm(kept, Duration::ZERO, async {}));

        timers.retain(Some(kept));
        sleep(Duration::from_secs(11)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // a fired timer may be armed again
        assert!(timers.arm(kept, Duration::ZERO, async {}));
    }
}
