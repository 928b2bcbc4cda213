use crate::clock::{dur_to_nanos, AtomicInstant};
use crate::error::ConfigError;
use async_trait::async_trait;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const MICROS_PER_SEC: u64 = 1_000_000;

/// Target acquisitions per second, always greater than zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate(u32);

impl Rate {
    pub fn new(per_second: i64) -> Result<Self, ConfigError> {
        if per_second <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate",
                reason: format!("{} (must be greater than zero)", per_second),
            });
        }
        let per_second = u32::try_from(per_second).map_err(|_| ConfigError::InvalidValue {
            field: "rate",
            reason: format!("{} (must not exceed {})", per_second, u32::MAX),
        })?;
        Ok(Self(per_second))
    }

    pub fn per_second(&self) -> u32 {
        self.0
    }

    /// Spacing between permitted actions: `1_000_000 / rate` microseconds.
    ///
    /// Rates above one million per second truncate to a zero interval, which
    /// leaves the governors unthrottled.
    pub fn interval(&self) -> Duration {
        Duration::from_micros(MICROS_PER_SEC / u64::from(self.0))
    }
}

impl TryFrom<i64> for Rate {
    type Error = ConfigError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Rate::new(value)
    }
}

impl Display for Rate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/s", self.0)
    }
}

/// Pacing policy applied to connection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum GovernorKind {
    /// Token bucket with a single token: callers are parked until their slot
    #[default]
    Strict,
    /// At most one action per interval, never waits and never catches up
    BestEffort,
}

impl GovernorKind {
    pub fn build(self, rate: Rate) -> Arc<dyn RateGovernor> {
        match self {
            GovernorKind::Strict => Arc::new(StrictGovernor::new(rate)),
            GovernorKind::BestEffort => Arc::new(BestEffortGovernor::new(rate)),
        }
    }
}

impl Display for GovernorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GovernorKind::Strict => f.write_str("strict"),
            GovernorKind::BestEffort => f.write_str("best-effort"),
        }
    }
}

/// Answers "may I act now?" for the connector loop.
///
/// Implementations are shared between workers, so all state lives in atomics.
#[async_trait]
pub trait RateGovernor: Send + Sync + Debug {
    /// Returns true when the caller may perform one action.
    ///
    /// The strict governor waits for the caller's slot and always returns true;
    /// the best-effort governor returns immediately.
    async fn permit(&self) -> bool;

    fn interval(&self) -> Duration;

    fn kind(&self) -> GovernorKind;
}

/// Virtual schedule of slots, one per interval.
#[derive(Debug)]
pub struct StrictGovernor {
    interval: Duration,
    next_slot: AtomicInstant,
}

impl StrictGovernor {
    pub fn new(rate: Rate) -> Self {
        Self {
            interval: rate.interval(),
            next_slot: AtomicInstant::new(Instant::now()),
        }
    }

    /// Claim the next free slot and return the instant it opens at.
    ///
    /// An idle governor hands out the current instant, so at most one token is
    /// ever pending.
    pub fn reserve(&self) -> Instant {
        let step = dur_to_nanos(self.interval);
        loop {
            let now = self.next_slot.offset_of(Instant::now());
            let current = self.next_slot.load();
            let slot = current.map_or(now, |next| next.max(now));
            if self
                .next_slot
                .compare_exchange(current, slot.saturating_add(step))
            {
                return self.next_slot.instant_at(slot);
            }
            std::hint::spin_loop();
        }
    }
}

#[async_trait]
impl RateGovernor for StrictGovernor {
    async fn permit(&self) -> bool {
        let at = self.reserve();
        if at > Instant::now() {
            tokio::time::sleep_until(at).await;
        }
        true
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn kind(&self) -> GovernorKind {
        GovernorKind::Strict
    }
}

/// Last-fired timestamp compared against the interval.
#[derive(Debug)]
pub struct BestEffortGovernor {
    interval: Duration,
    last_fired: AtomicInstant,
}

impl BestEffortGovernor {
    pub fn new(rate: Rate) -> Self {
        Self {
            interval: rate.interval(),
            last_fired: AtomicInstant::new(Instant::now()),
        }
    }

    /// True if at least one interval passed since the last permitted action.
    /// Records the current instant when it returns true.
    pub fn allow(&self) -> bool {
        let now = self.last_fired.offset_of(Instant::now());
        let last = self.last_fired.load();
        if let Some(last) = last {
            if now.saturating_sub(last) < dur_to_nanos(self.interval) {
                return false;
            }
        }
        self.last_fired.compare_exchange(last, now)
    }

    /// Run `f` if the governor allows an action now, otherwise do nothing.
    pub fn run_if_allowed<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if self.allow() {
            Some(f())
        } else {
            None
        }
    }
}

#[async_trait]
impl RateGovernor for BestEffortGovernor {
    async fn permit(&self) -> bool {
        self.allow()
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn kind(&self) -> GovernorKind {
        GovernorKind::BestEffort
    }
}
