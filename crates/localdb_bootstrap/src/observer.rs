//! Subscribers to bootstrap state, progress and errors.

use crate::error::BootstrapError;
use crate::progress::ProgressEvent;
use crate::state::LoadingState;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives bootstrap notifications.
///
/// Every method has an empty default, so an observer implements only what it
/// needs. Calls are synchronous and arrive in the order the manager produced
/// them.
pub trait StateObserver: Send + Sync {
    /// Called on every state transition, and once on registration with the
    /// state current at that moment.
    fn on_state_change(&self, _state: LoadingState) {}

    /// Called for each progress update.
    fn on_progress(&self, _event: &ProgressEvent) {}

    /// Called when an attempt fails, after the move to [`LoadingState::Error`].
    fn on_error(&self, _error: &BootstrapError) {}
}

type StateFn = Box<dyn Fn(LoadingState) + Send + Sync>;
type ProgressFn = Box<dyn Fn(&ProgressEvent) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&BootstrapError) + Send + Sync>;

/// An observer assembled from optional closures.
///
/// ```rust
/// use localdb_bootstrap::StateCallbacks;
///
/// let callbacks = StateCallbacks::new()
///     .with_state_change(|state| println!("state: {state}"))
///     .with_progress(|event| println!("{}: {}%", event.phase, event.progress));
/// ```
#[derive(Default)]
pub struct StateCallbacks {
    state: Option<StateFn>,
    progress: Option<ProgressFn>,
    error: Option<ErrorFn>,
}

impl StateCallbacks {
    /// Creates an observer with no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the state-change callback.
    pub fn with_state_change(mut self, f: impl Fn(LoadingState) + Send + Sync + 'static) -> Self {
        self.state = Some(Box::new(f));
        self
    }

    /// Sets the progress callback.
    pub fn with_progress(mut self, f: impl Fn(&ProgressEvent) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    /// Sets the error callback.
    pub fn with_error(mut self, f: impl Fn(&BootstrapError) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }
}

impl StateObserver for StateCallbacks {
    fn on_state_change(&self, state: LoadingState) {
        if let Some(f) = &self.state {
            f(state);
        }
    }

    fn on_progress(&self, event: &ProgressEvent) {
        if let Some(f) = &self.progress {
            f(event);
        }
    }

    fn on_error(&self, error: &BootstrapError) {
        if let Some(f) = &self.error {
            f(error);
        }
    }
}

/// One notification as seen by a [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    /// A state transition.
    State(LoadingState),
    /// A progress update.
    Progress(ProgressEvent),
    /// A failure.
    Error(BootstrapError),
}

/// An observer that records everything it receives.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all events in arrival order.
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    /// Returns the observed states in arrival order.
    pub fn states(&self) -> Vec<LoadingState> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::State(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    /// Returns the observed progress events in arrival order.
    pub fn progress(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    /// Returns the observed errors in arrival order.
    pub fn errors(&self) -> Vec<BootstrapError> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ObservedEvent::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    /// Counts how many times `state` was observed.
    pub fn count_state(&self, state: LoadingState) -> usize {
        self.states().into_iter().filter(|s| *s == state).count()
    }
}

impl StateObserver for RecordingObserver {
    fn on_state_change(&self, state: LoadingState) {
        self.events.lock().push(ObservedEvent::State(state));
    }

    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().push(ObservedEvent::Progress(*event));
    }

    fn on_error(&self, error: &BootstrapError) {
        self.events.lock().push(ObservedEvent::Error(error.clone()));
    }
}

/// Identifies a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Registered observers in registration order.
#[derive(Default)]
pub(crate) struct ObserverList {
    next_id: AtomicU64,
    entries: RwLock<Vec<(SubscriptionId, Arc<dyn StateObserver>)>>,
}

impl ObserverList {
    pub(crate) fn add(&self, observer: Arc<dyn StateObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries.write().push((id, observer));
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    /// Copies the current observers so none of the list's locks are held
    /// while callbacks run.
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn StateObserver>> {
        self.entries
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Phase;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn callbacks_are_optional() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callbacks = StateCallbacks::new().with_state_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        callbacks.on_state_change(LoadingState::LoadingWasm);
        callbacks.on_progress(&ProgressEvent {
            phase: Phase::Wasm,
            progress: 10,
            elapsed: None,
        });
        callbacks.on_error(&BootstrapError::Uninitialized);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recorder_keeps_order() {
        let recorder = RecordingObserver::new();
        recorder.on_state_change(LoadingState::LoadingDependencies);
        recorder.on_progress(&ProgressEvent {
            phase: Phase::Dependencies,
            progress: 100,
            elapsed: Some(std::time::Duration::from_millis(3)),
        });
        recorder.on_state_change(LoadingState::Error);
        recorder.on_error(&BootstrapError::Compile("bad".into()));

        assert_eq!(
            recorder.states(),
            vec![LoadingState::LoadingDependencies, LoadingState::Error]
        );
        assert_eq!(recorder.progress().len(), 1);
        assert_eq!(recorder.errors(), vec![BootstrapError::Compile("bad".into())]);
        assert_eq!(recorder.events().len(), 4);
    }

    #[test]
    fn observer_list_add_remove() {
        let list = ObserverList::default();
        let first = list.add(Arc::new(RecordingObserver::new()));
        let second = list.add(Arc::new(RecordingObserver::new()));
        assert_ne!(first, second);
        assert_eq!(list.len(), 2);

        assert!(list.remove(first));
        assert!(!list.remove(first));
        assert_eq!(list.snapshot().len(), 1);
    }
}
