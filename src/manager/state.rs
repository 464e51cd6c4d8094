//! Per-identifier retrieval state machine.

use std::fmt;

use serde::Serialize;
use tracing::{trace, warn};

/// Where a retrieval is in its lifecycle.
///
/// ```text
/// Unresolved -> Locating -> FoundLocal ----------------------> Normalizing
///                        \                                  /     |
///                         -> Downloading -> Downloaded -----      |-> Normalized
///                                       \-> Unavailable           \-> NormalizationFailed
/// ```
///
/// `FoundLocal -> Normalized` is the fresh cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    Unresolved,
    Locating,
    FoundLocal,
    Downloading,
    Downloaded,
    Unavailable,
    Normalizing,
    Normalized,
    NormalizationFailed,
}

impl FetchState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Normalized | Self::Unavailable | Self::NormalizationFailed
        )
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_advance_to(self, next: FetchState) -> bool {
        use FetchState::{
            Downloaded, Downloading, FoundLocal, Locating, NormalizationFailed, Normalized,
            Normalizing, Unavailable, Unresolved,
        };
        matches!(
            (self, next),
            (Unresolved, Locating)
                | (Locating, FoundLocal | Downloading)
                | (FoundLocal, Normalizing | Normalized)
                | (Downloading, Downloaded | Unavailable)
                | (Downloaded, Normalizing)
                | (Normalizing, Normalized | NormalizationFailed)
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Locating => "locating",
            Self::FoundLocal => "found_local",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Unavailable => "unavailable",
            Self::Normalizing => "normalizing",
            Self::Normalized => "normalized",
            Self::NormalizationFailed => "normalization_failed",
        }
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The states one retrieval passed through, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StateTrail {
    states: Vec<FetchState>,
}

impl StateTrail {
    pub(crate) fn new() -> Self {
        Self {
            states: vec![FetchState::Unresolved],
        }
    }

    pub(crate) fn current(&self) -> FetchState {
        self.states
            .last()
            .copied()
            .unwrap_or(FetchState::Unresolved)
    }

    /// Records `next`; an illegal transition is logged and ignored.
    pub(crate) fn advance(&mut self, next: FetchState) {
        let current = self.current();
        if current.can_advance_to(next) {
            trace!(from = %current, to = %next, "state transition");
            self.states.push(next);
        } else {
            warn!(from = %current, to = %next, "illegal state transition ignored");
        }
    }

    pub(crate) fn into_states(self) -> Vec<FetchState> {
        self.states
    }
}
