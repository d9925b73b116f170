//! Progress output on stderr.

use localdb_bootstrap::{BootstrapError, LoadingState, Phase, ProgressEvent, StateObserver};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Prints states and progress, and remembers how long each phase took.
#[derive(Debug, Default)]
pub struct ProgressPrinter {
    quiet: bool,
    elapsed: Mutex<HashMap<Phase, Duration>>,
}

impl ProgressPrinter {
    /// A printer that writes to stderr unless `quiet`.
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            elapsed: Mutex::new(HashMap::new()),
        }
    }

    /// Milliseconds `phase` took, if it completed.
    pub fn elapsed_ms(&self, phase: Phase) -> Option<u64> {
        self.elapsed
            .lock()
            .get(&phase)
            .map(|d| d.as_millis() as u64)
    }

    /// Prints one progress event.
    pub fn progress(&self, event: &ProgressEvent) {
        if let Some(elapsed) = event.elapsed {
            self.elapsed.lock().insert(event.phase, elapsed);
        }
        if self.quiet {
            return;
        }
        match event.elapsed {
            Some(elapsed) => eprintln!(
                "  {:<12} {:>3}% ({} ms)",
                event.phase.as_str(),
                event.progress,
                elapsed.as_millis()
            ),
            None => eprintln!("  {:<12} {:>3}%", event.phase.as_str(), event.progress),
        }
    }
}

impl StateObserver for ProgressPrinter {
    fn on_state_change(&self, state: LoadingState) {
        if !self.quiet {
            eprintln!("{state}");
        }
    }

    fn on_progress(&self, event: &ProgressEvent) {
        self.progress(event);
    }

    fn on_error(&self, error: &BootstrapError) {
        if !self.quiet {
            eprintln!("error: {error}");
        }
    }
}
