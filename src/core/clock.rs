/*!
 * Clocks
 *
 * Time source for transaction deadlines.
 *
 * # Design
 *
 * Deadlines are expressed as offsets on a clock's own timeline, so the same
 * parking code runs against wall time in production and against virtual time
 * in tests:
 *
 * - `SystemClock` maps deadlines onto `Instant`s and lets the condvar time out.
 * - `ManualClock` never times out on its own. Waiters park untimed and
 *   `advance()` notifies every subscribed listener, which expires due waiters
 *   under its own lock. Timeout tests become deterministic.
 */

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Receives clock ticks from a `ManualClock`
pub trait ClockListener: Send + Sync {
    /// Called after the clock moved to `now`
    fn on_tick(&self, now: Duration);
}

/// Time source for deadlines
pub trait Clock: Send + Sync + fmt::Debug {
    /// Time elapsed since the clock's epoch
    fn now(&self) -> Duration;

    /// Real instant a parked waiter should wake at for `deadline`
    ///
    /// `None` means park without a real timeout; the clock is then responsible
    /// for ticking its listeners when virtual time passes the deadline.
    fn park_deadline(&self, deadline: Duration) -> Option<Instant>;

    /// Register a listener for clock ticks
    fn subscribe(&self, listener: Weak<dyn ClockListener>) {
        let _ = listener;
    }

    /// Get clock name for debugging
    fn name(&self) -> &'static str;
}

/// Wall-clock time source backed by `Instant`
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Shared handle, the usual way sets hold their clock
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    #[inline]
    fn park_deadline(&self, deadline: Duration) -> Option<Instant> {
        // Saturate far-future deadlines instead of overflowing Instant
        self.epoch
            .checked_add(deadline)
            .or_else(|| Instant::now().checked_add(Duration::from_secs(86_400 * 365)))
    }

    fn name(&self) -> &'static str {
        "system"
    }
}

/// Virtual time source advanced explicitly by the caller
pub struct ManualClock {
    now_nanos: AtomicU64,
    listeners: Mutex<Vec<Weak<dyn ClockListener>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now_nanos: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Move virtual time forward and tick every live listener
    pub fn advance(&self, by: Duration) {
        let delta = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let prev = self.now_nanos.fetch_add(delta, Ordering::SeqCst);
        let now = Duration::from_nanos(prev.saturating_add(delta));

        // Snapshot outside the lock: listeners take their own locks in on_tick
        let live: Vec<Arc<dyn ClockListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        for listener in live {
            listener.on_tick(now);
        }
    }

    /// Number of listeners still alive
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &self.now())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_nanos.load(Ordering::SeqCst))
    }

    #[inline]
    fn park_deadline(&self, _deadline: Duration) -> Option<Instant> {
        None
    }

    fn subscribe(&self, listener: Weak<dyn ClockListener>) {
        self.listeners.lock().push(listener);
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}
