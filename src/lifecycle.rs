//! Lifecycle state machine: which operation is legal in which state.
//!
//! ```text
//! Unmade --make--> Made --reset--> Ready --step/reset--> Ready
//!                   |                |
//!                   +----close-------+----> Closed
//! ```
//! `render` is legal from `Made` and `Ready` and leaves the state unchanged.

use std::fmt;

use crate::core::{GymError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LifecycleState {
    Unmade,
    Made,
    Ready,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operation {
    Make,
    Reset,
    Step,
    Render,
    Close,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::Make => "make",
            Operation::Reset => "reset",
            Operation::Step => "step",
            Operation::Render => "render",
            Operation::Close => "close",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl LifecycleState {
    /// State reached by performing `op` from `self`, or a lifecycle error.
    pub fn transition(self, op: Operation) -> Result<LifecycleState> {
        use LifecycleState::*;
        use Operation::*;
        let next = match (self, op) {
            (Unmade, Make) => Made,
            (Made | Ready, Reset) => Ready,
            (Ready, Step) => Ready,
            (Made | Ready, Render) => self,
            (Made | Ready, Close) => Closed,
            _ => return Err(GymError::Lifecycle { op, state: self }),
        };
        Ok(next)
    }

    pub fn allows(self, op: Operation) -> bool {
        self.transition(op).is_ok()
    }

    pub fn is_closed(self) -> bool {
        self == LifecycleState::Closed
    }
}
