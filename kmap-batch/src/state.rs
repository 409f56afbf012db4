/// Batch run state machine
///
/// Completions and timers only *request* a state; `transition` decides the
/// next state and the side effect the engine has to perform.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchState {
    /// Dispatching while capacity allows
    Active,
    /// Waiting out a backoff; no new dispatch
    Blocked,
    /// Terminal; in-flight requests are drained, nothing new is sent
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Dispatch,
    Backoff,
    Resolve,
    None,
}

pub fn transition(current: BatchState, requested: BatchState) -> (BatchState, Action) {
    use BatchState::*;

    match (current, requested) {
        (Finished, _) => (Finished, Action::None),
        (_, Finished) => (Finished, Action::Resolve),
        (Active, Active) | (Blocked, Active) => (Active, Action::Dispatch),
        (Active, Blocked) => (Blocked, Action::Backoff),
        (Blocked, Blocked) => (Blocked, Action::None),
    }
}
