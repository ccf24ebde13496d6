//! [`SourceMonitor`] – per-source freshness tracking.
//!
//! The observer records every accepted sensor sample here.  A source is
//! *stale* once no sample has arrived within its timeout; staleness is
//! reported on every published pose but never changes what the fusion step
//! does.
//!
//! Callers pass the current [`Instant`] explicitly so the monitor follows
//! Tokio's clock, including paused time in tests.

use std::collections::BTreeMap;
use std::time::Duration;

use dronepose_types::SensorKind;
use tokio::time::Instant;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Health reported for a single source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceHealth {
    /// A sample arrived within the timeout.
    Fresh,
    /// No sample within the timeout.
    Stale,
}

/// A change of [`SourceHealth`] since the previous
/// [`SourceMonitor::poll_transitions`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub source: SensorKind,
    pub health: SourceHealth,
    /// `None` if the source has never delivered a sample.
    pub silent_for: Option<Duration>,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal entry
// ────────────────────────────────────────────────────────────────────────────

struct SourceEntry {
    /// Reference point for the deadline: the last sample, or registration.
    deadline_base: Instant,
    last_sample: Option<Instant>,
    reported: SourceHealth,
}

impl SourceEntry {
    fn health_at(&self, timeout: Duration, now: Instant) -> SourceHealth {
        if now.saturating_duration_since(self.deadline_base) > timeout {
            SourceHealth::Stale
        } else {
            SourceHealth::Fresh
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SourceMonitor
// ────────────────────────────────────────────────────────────────────────────

/// Tracks the last sample time of each watched source.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use dronepose_runtime::source_monitor::{SourceHealth, SourceMonitor};
/// use dronepose_types::SensorKind;
/// use tokio::time::Instant;
///
/// let start = Instant::now();
/// let mut monitor = SourceMonitor::new(Duration::from_millis(500));
/// monitor.watch(SensorKind::Attitude, start);
/// monitor.record(SensorKind::Attitude, start);
///
/// let later = start + Duration::from_secs(1);
/// assert_eq!(monitor.health(SensorKind::Attitude, later), SourceHealth::Stale);
/// assert_eq!(monitor.stale_sources(later), vec![SensorKind::Attitude]);
/// ```
pub struct SourceMonitor {
    timeout: Duration,
    sources: BTreeMap<SensorKind, SourceEntry>,
}

impl SourceMonitor {
    /// Create an empty monitor; every watched source shares `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sources: BTreeMap::new(),
        }
    }

    /// Start watching `source`.  Its deadline runs from `now`, so a source
    /// gets one full timeout to deliver its first sample.
    ///
    /// Re-watching an existing source restarts its deadline.
    pub fn watch(&mut self, source: SensorKind, now: Instant) {
        self.sources.insert(
            source,
            SourceEntry {
                deadline_base: now,
                last_sample: None,
                reported: SourceHealth::Fresh,
            },
        );
    }

    /// Restart every deadline from `now` without forgetting sample history.
    pub fn restart(&mut self, now: Instant) {
        for entry in self.sources.values_mut() {
            entry.deadline_base = now;
            entry.reported = SourceHealth::Fresh;
        }
    }

    /// Record a sample from `source`.  No-op for unwatched sources.
    pub fn record(&mut self, source: SensorKind, now: Instant) {
        if let Some(entry) = self.sources.get_mut(&source) {
            entry.deadline_base = now;
            entry.last_sample = Some(now);
        }
    }

    pub fn is_watched(&self, source: SensorKind) -> bool {
        self.sources.contains_key(&source)
    }

    /// Health of `source` at `now`.  Unwatched sources are always fresh.
    pub fn health(&self, source: SensorKind, now: Instant) -> SourceHealth {
        match self.sources.get(&source) {
            Some(entry) => entry.health_at(self.timeout, now),
            None => SourceHealth::Fresh,
        }
    }

    /// Watched sources that are stale at `now`, in [`SensorKind`] order.
    pub fn stale_sources(&self, now: Instant) -> Vec<SensorKind> {
        self.sources
            .iter()
            .filter(|(_, entry)| entry.health_at(self.timeout, now) == SourceHealth::Stale)
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Sources whose health changed since the last call.
    pub fn poll_transitions(&mut self, now: Instant) -> Vec<HealthTransition> {
        let timeout = self.timeout;
        let mut transitions = Vec::new();
        for (kind, entry) in self.sources.iter_mut() {
            let health = entry.health_at(timeout, now);
            if health != entry.reported {
                entry.reported = health;
                transitions.push(HealthTransition {
                    source: *kind,
                    health,
                    silent_for: entry.last_sample.map(|t| now.saturating_duration_since(t)),
                });
            }
        }
        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn monitor(start: Instant, sources: &[SensorKind]) -> SourceMonitor {
        let mut m = SourceMonitor::new(TIMEOUT);
        for s in sources {
            m.watch(*s, start);
        }
        m
    }

    #[test]
    fn fresh_source_is_healthy() {
        let start = Instant::now();
        let m = monitor(start, &[SensorKind::Attitude]);
        assert_eq!(m.health(SensorKind::Attitude, start + TIMEOUT), SourceHealth::Fresh);
    }

    #[test]
    fn silent_source_goes_stale_after_grace_period() {
        let start = Instant::now();
        let m = monitor(start, &[SensorKind::GuidanceMotion]);
        let later = start + TIMEOUT + Duration::from_millis(1);
        assert_eq!(m.health(SensorKind::GuidanceMotion, later), SourceHealth::Stale);
    }

    #[test]
    fn sample_resets_deadline() {
        let start = Instant::now();
        let mut m = monitor(start, &[SensorKind::GpsHealth]);
        m.record(SensorKind::GpsHealth, start + Duration::from_millis(80));
        let later = start + Duration::from_millis(150);
        assert_eq!(m.health(SensorKind::GpsHealth, later), SourceHealth::Fresh);
    }

    #[test]
    fn unwatched_sources_are_ignored() {
        let start = Instant::now();
        let mut m = monitor(start, &[SensorKind::Attitude]);
        m.record(SensorKind::Ultrasonic, start);
        assert!(!m.is_watched(SensorKind::Ultrasonic));
        assert_eq!(
            m.stale_sources(start + Duration::from_secs(5)),
            vec![SensorKind::Attitude]
        );
    }

    #[test]
    fn stale_sources_are_ordered() {
        let start = Instant::now();
        let m = monitor(
            start,
            &[SensorKind::LocalPosition, SensorKind::Attitude, SensorKind::GpsHealth],
        );
        assert_eq!(
            m.stale_sources(start + Duration::from_secs(1)),
            vec![SensorKind::Attitude, SensorKind::GpsHealth, SensorKind::LocalPosition]
        );
    }

    #[test]
    fn transitions_are_reported_once() {
        let start = Instant::now();
        let mut m = monitor(start, &[SensorKind::Attitude]);
        m.record(SensorKind::Attitude, start);

        let stale_at = start + Duration::from_millis(250);
        let transitions = m.poll_transitions(stale_at);
        assert_eq!(
            transitions,
            vec![HealthTransition {
                source: SensorKind::Attitude,
                health: SourceHealth::Stale,
                silent_for: Some(Duration::from_millis(250)),
            }]
        );
        assert!(m.poll_transitions(stale_at + Duration::from_millis(10)).is_empty());

        m.record(SensorKind::Attitude, stale_at + Duration::from_millis(20));
        let recovered = m.poll_transitions(stale_at + Duration::from_millis(30));
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].health, SourceHealth::Fresh);
    }

    #[test]
    fn never_sampled_source_has_no_silence_duration() {
        let start = Instant::now();
        let mut m = monitor(start, &[SensorKind::Ultrasonic]);
        let transitions = m.poll_transitions(start + Duration::from_secs(1));
        assert_eq!(transitions[0].silent_for, None);
    }

    #[test]
    fn restart_gives_a_new_grace_period() {
        let start = Instant::now();
        let mut m = monitor(start, &[SensorKind::Attitude]);
        let after_warmup = start + Duration::from_secs(1);
        m.restart(after_warmup);
        assert!(m.stale_sources(after_warmup + Duration::from_millis(50)).is_empty());
    }
}
