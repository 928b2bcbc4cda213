use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Atomic instant stored as nanoseconds since a fixed origin (0 = unset).
///
/// Offsets are shifted by one so that an instant equal to the origin is still
/// distinguishable from "never stored".
#[derive(Debug)]
pub struct AtomicInstant {
    origin: Instant,
    nanos: AtomicU64,
}

impl AtomicInstant {
    /// Create an unset instant anchored at `origin`
    pub fn new(origin: Instant) -> Self {
        Self {
            origin,
            nanos: AtomicU64::new(0),
        }
    }

    /// Offset of `at` from the origin, saturating at zero
    #[inline]
    pub fn offset_of(&self, at: Instant) -> u64 {
        dur_to_nanos(at.saturating_duration_since(self.origin))
    }

    /// Instant at `offset` nanoseconds after the origin
    #[inline]
    pub fn instant_at(&self, offset: u64) -> Instant {
        self.origin + Duration::from_nanos(offset)
    }

    /// Stored offset, if any
    #[inline]
    pub fn load(&self) -> Option<u64> {
        decode(self.nanos.load(Ordering::Acquire))
    }

    /// Replace `current` with `new`; fails if another caller got there first
    #[inline]
    pub fn compare_exchange(&self, current: Option<u64>, new: u64) -> bool {
        self.nanos
            .compare_exchange(
                encode(current),
                encode(Some(new)),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[inline]
fn encode(v: Option<u64>) -> u64 {
    match v {
        None => 0,
        Some(n) => n.saturating_add(1),
    }
}

#[inline]
fn decode(raw: u64) -> Option<u64> {
    match raw {
        0 => None,
        n => Some(n - 1),
    }
}

/// Convert Duration to nanoseconds, saturating at u64::MAX
pub fn dur_to_nanos(dur: Duration) -> u64 {
    u64::try_from(dur.as_nanos()).unwrap_or(u64::MAX)
}
