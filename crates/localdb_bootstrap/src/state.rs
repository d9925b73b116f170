//! Loading state machine.

use serde::Serialize;
use std::fmt;

/// The current phase of a database bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingState {
    /// Nothing has been started yet.
    Idle,
    /// Runtime dependency modules are being resolved.
    LoadingDependencies,
    /// The engine image is being downloaded.
    LoadingWasm,
    /// The downloaded image is being compiled.
    CompilingWasm,
    /// The engine and ORM binding are being constructed.
    Initializing,
    /// The handle is available.
    Ready,
    /// The last attempt failed.
    Error,
}

impl LoadingState {
    /// Returns the snake_case name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadingState::Idle => "idle",
            LoadingState::LoadingDependencies => "loading_dependencies",
            LoadingState::LoadingWasm => "loading_wasm",
            LoadingState::CompilingWasm => "compiling_wasm",
            LoadingState::Initializing => "initializing",
            LoadingState::Ready => "ready",
            LoadingState::Error => "error",
        }
    }

    /// Returns true while a bootstrap is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            LoadingState::LoadingDependencies
                | LoadingState::LoadingWasm
                | LoadingState::CompilingWasm
                | LoadingState::Initializing
        )
    }

    /// Returns true if the current attempt has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadingState::Ready | LoadingState::Error)
    }

    /// Position along the happy path; `Error` sits outside it.
    fn rank(&self) -> Option<u8> {
        match self {
            LoadingState::Idle => Some(0),
            LoadingState::LoadingDependencies => Some(1),
            LoadingState::LoadingWasm => Some(2),
            LoadingState::CompilingWasm => Some(3),
            LoadingState::Initializing => Some(4),
            LoadingState::Ready => Some(5),
            LoadingState::Error => None,
        }
    }

    /// Returns true if `next` may follow `self`.
    ///
    /// Forward moves along the happy path are allowed (the compile phase may
    /// be skipped), `Error` is reachable from every non-terminal state, and a
    /// failed attempt may only be followed by a fresh one.
    pub fn can_transition_to(&self, next: LoadingState) -> bool {
        match (self, next) {
            (LoadingState::Ready, _) => false,
            (LoadingState::Error, LoadingState::Idle)
            | (LoadingState::Error, LoadingState::LoadingDependencies) => true,
            (LoadingState::Error, _) => false,
            (_, LoadingState::Error) => true,
            (current, next) => match (current.rank(), next.rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }
}

impl Default for LoadingState {
    fn default() -> Self {
        LoadingState::Idle
    }
}

impl fmt::Display for LoadingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
