//! Per-phase progress bookkeeping.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// A phase that reports progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Resolution of runtime dependency modules.
    Dependencies,
    /// Download of the engine image.
    Wasm,
}

impl Phase {
    /// Returns the phase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Dependencies => "dependencies",
            Phase::Wasm => "wasm",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// The phase this event belongs to.
    pub phase: Phase,
    /// Completion percentage, 0 to 100.
    pub progress: u8,
    /// Wall-clock time the phase took. Only set on the final event.
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    /// Returns true if this is the final event of its phase.
    pub fn is_complete(&self) -> bool {
        self.elapsed.is_some()
    }
}

/// Tracks completion of one phase and turns it into [`ProgressEvent`]s.
///
/// Intermediate events are emitted only when the rounded percentage grows
/// and never reach 100; [`PhaseProgress::finish`] produces the one event at
/// 100. Without a known total no intermediate events are produced.
#[derive(Debug)]
pub struct PhaseProgress {
    phase: Phase,
    started: Instant,
    total: Option<u64>,
    done: u64,
    last: Option<u8>,
}

impl PhaseProgress {
    /// Starts tracking `phase`. A total of zero counts as unknown.
    pub fn start(phase: Phase, total: Option<u64>) -> Self {
        Self {
            phase,
            started: Instant::now(),
            total: total.filter(|&t| t > 0),
            done: 0,
            last: None,
        }
    }

    /// Returns the phase being tracked.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the amount of work recorded so far.
    pub fn done(&self) -> u64 {
        self.done
    }

    /// Records `amount` more units of work.
    pub fn advance(&mut self, amount: u64) -> Option<ProgressEvent> {
        self.done = self.done.saturating_add(amount);
        let total = self.total?;

        let percent = ((self.done as f64 / total as f64) * 100.0).round();
        let percent = percent.clamp(0.0, 99.0) as u8;

        if self.last.is_some_and(|last| percent <= last) {
            return None;
        }
        self.last = Some(percent);
        Some(ProgressEvent {
            phase: self.phase,
            progress: percent,
            elapsed: None,
        })
    }

    /// Ends the phase, returning the final event.
    pub fn finish(self) -> ProgressEvent {
        ProgressEvent {
            phase: self.phase,
            progress: 100,
            elapsed: Some(self.started.elapsed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn dependency_counts_round() {
        let mut tracker = PhaseProgress::start(Phase::Dependencies, Some(3));
        assert_eq!(tracker.advance(1).unwrap().progress, 33);
        assert_eq!(tracker.advance(1).unwrap().progress, 67);
        // Third module is capped below the terminal event.
        assert_eq!(tracker.advance(1).unwrap().progress, 99);

        let last = tracker.finish();
        assert_eq!(last.progress, 100);
        assert!(last.is_complete());
    }

    #[test]
    fn repeated_percentages_are_coalesced() {
        let mut tracker = PhaseProgress::start(Phase::Wasm, Some(1_000));
        assert_eq!(tracker.advance(1).unwrap().progress, 0);
        assert!(tracker.advance(1).is_none());
        assert_eq!(tracker.advance(98).unwrap().progress, 10);
    }

    #[test]
    fn unknown_total_reports_only_completion() {
        let mut tracker = PhaseProgress::start(Phase::Wasm, None);
        assert!(tracker.advance(512).is_none());
        assert_eq!(tracker.done(), 512);
        assert_eq!(tracker.finish().progress, 100);

        let mut zero = PhaseProgress::start(Phase::Wasm, Some(0));
        assert!(zero.advance(10).is_none());
    }

    #[test]
    fn overshoot_is_clamped() {
        let mut tracker = PhaseProgress::start(Phase::Wasm, Some(10));
        assert_eq!(tracker.advance(50).unwrap().progress, 99);
        assert!(tracker.advance(50).is_none());
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::Dependencies.to_string(), "dependencies");
        assert_eq!(Phase::Wasm.as_str(), "wasm");
    }

    proptest! {
        #[test]
        fn progress_is_non_decreasing_and_ends_at_100(
            total in 1u64..100_000,
            chunks in prop::collection::vec(0u64..5_000, 0..64),
        ) {
            let mut tracker = PhaseProgress::start(Phase::Wasm, Some(total));
            let mut seen = Vec::new();
            for chunk in chunks {
                if let Some(event) = tracker.advance(chunk) {
                    prop_assert!(event.progress < 100);
                    prop_assert!(event.elapsed.is_none());
                    seen.push(event.progress);
                }
            }
            let last = tracker.finish();
            seen.push(last.progress);

            prop_assert!(seen.windows(2).all(|w| w[0] <= w[1]));
            prop_assert_eq!(*seen.last().unwrap(), 100);
        }
    }
}
