//! Per-request lifecycle.

use super::error::{ErrorKind, Stage};

/// Where a single request is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Decoding,
    Preprocessing,
    Recognizing,
    Aggregating,
    Done,
    Failed(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The current stage finished successfully.
    Advance,
    Fail(ErrorKind),
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Done | RequestState::Failed(_))
    }

    /// Stage label for errors raised in this state.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RequestState::Received => Some(Stage::Received),
            RequestState::Decoding => Some(Stage::Decoding),
            RequestState::Preprocessing => Some(Stage::Preprocessing),
            RequestState::Recognizing => Some(Stage::Recognizing),
            RequestState::Aggregating => Some(Stage::Aggregating),
            RequestState::Done | RequestState::Failed(_) => None,
        }
    }
}

/// Pure transition function. Terminal states absorb every event.
pub fn transition(state: RequestState, event: Event) -> RequestState {
    use RequestState::*;

    match (state, event) {
        (Done, _) | (Failed(_), _) => state,
        (_, Event::Fail(kind)) => Failed(kind),
        (Received, Event::Advance) => Decoding,
        (Decoding, Event::Advance) => Preprocessing,
        (Preprocessing, Event::Advance) => Recognizing,
        (Recognizing, Event::Advance) => Aggregating,
        (Aggregating, Event::Advance) => Done,
    }
}
