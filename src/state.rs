use crate::metrics::Metrics;
use crate::registry::Registry;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Point-in-time view of the registry and metrics
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct State {
    /// Connection ceiling
    pub max_conns: u64,
    /// Connections currently held in the registry
    pub open: u64,
    /// Slots claimed by workers (held + being acquired)
    pub claimed: u64,
    /// Successful acquisitions, dropped ones included
    pub acquired: u64,
    /// Failed acquisition attempts, timeouts included
    pub failures: u64,
    /// Attempts abandoned after the acquisition timeout
    pub timeouts: u64,
    /// Connections discarded because the registry was full
    pub dropped: u64,
    /// Total milliseconds spent in successful acquisitions
    pub acquire_millis: u64,
    /// Time since the run started
    pub elapsed: Duration,
}

impl State {
    pub fn capture<C>(registry: &Registry<C>, metrics: &Metrics) -> Self {
        State {
            max_conns: registry.max_conns(),
            open: registry.len() as u64,
            claimed: registry.claimed(),
            acquired: metrics.acquired(),
            failures: metrics.failures(),
            timeouts: metrics.timeouts(),
            dropped: metrics.dropped(),
            acquire_millis: metrics.acquire_millis(),
            elapsed: metrics.elapsed(),
        }
    }

    pub fn report(&self) -> Report {
        Report::from(self)
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ max_conns: {}, open: {}, claimed: {}, acquired: {}, failures: {}, timeouts: {}, dropped: {}, acquire_millis: {}, elapsed: {:?} }}",
            self.max_conns,
            self.open,
            self.claimed,
            self.acquired,
            self.failures,
            self.timeouts,
            self.dropped,
            self.acquire_millis,
            self.elapsed
        )
    }
}

/// Figures derived from a [`State`] for the periodic stats line.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub open: u64,
    /// `acquire_millis / open`, None while nothing is open
    pub avg_acquire_ms: Option<u64>,
    /// `open / elapsed seconds`, None before the first whole second
    pub creation_rate: Option<f64>,
    pub failures: u64,
}

impl From<&State> for Report {
    fn from(state: &State) -> Self {
        let avg_acquire_ms = state.acquire_millis.checked_div(state.open);
        let creation_rate = match state.elapsed.as_secs() {
            0 => None,
            _ => Some(state.open as f64 / state.elapsed.as_secs_f64()),
        };
        Report {
            open: state.open,
            avg_acquire_ms,
            creation_rate,
            failures: state.failures,
        }
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "OpenConnections: {}; AverageConnCreationTime: {}; CreationRate: {}; Failures: {}",
            self.open,
            OrNa(self.avg_acquire_ms.map(|ms| format!("{}ms", ms))),
            OrNa(self.creation_rate.map(|rate| format!("{:.2}/s", rate))),
            self.failures
        )
    }
}

/// Displays the inner value or `n/a`
#[derive(Debug, Clone, Copy)]
pub struct OrNa<T>(pub Option<T>);

impl<T: Display> Display for OrNa<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(v) => v.fmt(f),
            None => f.write_str("n/a"),
        }
    }
}
