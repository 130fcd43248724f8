//! Task lifecycle state machine.
//!
//! [`LifecycleState`] is persisted as its ordinal (`0..=4`), so the variant
//! order is part of the storage format and must never change.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TaskError;

/// Lifecycle state of a task.
///
/// # State Machine
///
/// ```text
/// Ready     -> Allocated (claim only), Dead
/// Allocated -> Ready, Started, Done, Dead
/// Started   -> Ready (failure), Done, Dead
/// Done      -> (terminal, no transitions)
/// Dead      -> (terminal, no transitions)
/// ```
///
/// Self-transitions are rejected. `Ready` is the only state a task is
/// created in.
///
/// # Examples
///
/// ```
/// use docqueue::LifecycleState;
///
/// let state = LifecycleState::Started;
/// assert!(!state.is_terminal());
/// assert!(state.can_transition_to(LifecycleState::Done));
/// assert!(!LifecycleState::Done.can_transition_to(LifecycleState::Ready));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum LifecycleState {
    /// Waiting to be claimed.
    Ready,
    /// Claimed by a worker, not yet started.
    Allocated,
    /// Being processed by its owner.
    Started,
    /// Finished with a result (terminal).
    Done,
    /// Abandoned (terminal).
    Dead,
}

impl LifecycleState {
    /// Every state, in ordinal order.
    pub const ALL: [Self; 5] = [
        Self::Ready,
        Self::Allocated,
        Self::Started,
        Self::Done,
        Self::Dead,
    ];

    /// Returns the storage ordinal of this state.
    ///
    /// # Examples
    ///
    /// ```
    /// use docqueue::LifecycleState;
    ///
    /// assert_eq!(LifecycleState::Ready.ordinal(), 0);
    /// assert_eq!(LifecycleState::Dead.ordinal(), 4);
    /// ```
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Ready => 0,
            Self::Allocated => 1,
            Self::Started => 2,
            Self::Done => 3,
            Self::Dead => 4,
        }
    }

    /// Decodes a storage ordinal. Returns `None` for values outside `0..=4`.
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(usize::from(ordinal)).copied()
    }

    /// Returns `true` for `Done` and `Dead`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Dead)
    }

    /// Returns `true` if a task may move from this state to `next`.
    ///
    /// `Ready -> Allocated` is reported as valid here; it is the claim
    /// protocol that performs it; the direct state setter refuses it
    /// separately.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return false;
        }

        match self {
            Self::Ready => matches!(next, Self::Allocated | Self::Dead),
            Self::Allocated => matches!(
                next,
                Self::Ready | Self::Started | Self::Done | Self::Dead
            ),
            Self::Started => matches!(next, Self::Ready | Self::Done | Self::Dead),
            Self::Done | Self::Dead => false,
        }
    }

    /// Validates a transition, returning [`TaskError::InvalidTransition`]
    /// if the state machine does not allow it.
    ///
    /// # Examples
    ///
    /// ```
    /// use docqueue::LifecycleState;
    ///
    /// assert!(LifecycleState::Started
    ///     .validate_transition("k1", LifecycleState::Done)
    ///     .is_ok());
    /// assert!(LifecycleState::Dead
    ///     .validate_transition("k1", LifecycleState::Ready)
    ///     .is_err());
    /// ```
    pub fn validate_transition(self, key: &str, next: Self) -> Result<(), TaskError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                key: key.to_string(),
                from: Some(self),
                to: next,
            })
        }
    }

    /// Returns `true` if a task in this state is expected to carry an owner.
    pub fn holds_owner(self) -> bool {
        matches!(self, Self::Allocated | Self::Started)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Allocated => write!(f, "allocated"),
            Self::Started => write!(f, "started"),
            Self::Done => write!(f, "done"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

impl From<LifecycleState> for u8 {
    fn from(state: LifecycleState) -> Self {
        state.ordinal()
    }
}

/// Error for a stored ordinal that names no [`LifecycleState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownOrdinal(pub u8);

impl fmt::Display for UnknownOrdinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown lifecycle state ordinal: {}", self.0)
    }
}

impl std::error::Error for UnknownOrdinal {}

impl TryFrom<u8> for LifecycleState {
    type Error = UnknownOrdinal;

    fn try_from(ordinal: u8) -> Result<Self, Self::Error> {
        Self::from_ordinal(ordinal).ok_or(UnknownOrdinal(ordinal))
    }
}
