//! Mode ladder
//!
//! Transitions are unidirectional and strictly sequential: a mode may only
//! move to the rung immediately after it. The canonical ladder is
//! `none -> optional -> required`; other staged rollouts supply their own.

use crate::error::HarnessError;
use crate::types::Mode;
use serde::{Deserialize, Serialize};

/// Ordered list of modes a rollout walks through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeLadder {
    rungs: Vec<Mode>,
}

impl ModeLadder {
    /// Build a ladder from rungs in migration order.
    ///
    /// Duplicates are dropped, keeping the first occurrence.
    #[must_use]
    pub fn new(rungs: impl IntoIterator<Item = Mode>) -> Self {
        let mut out: Vec<Mode> = Vec::new();
        for mode in rungs {
            if !out.contains(&mode) {
                out.push(mode);
            }
        }
        Self { rungs: out }
    }

    /// Rungs in order
    #[inline]
    #[must_use]
    pub fn rungs(&self) -> &[Mode] {
        &self.rungs
    }

    /// The rung after `mode`, if any
    #[must_use]
    pub fn successor(&self, mode: Mode) -> Option<Mode> {
        let idx = self.rungs.iter().position(|m| *m == mode)?;
        self.rungs.get(idx + 1).copied()
    }

    /// Modes reachable from `from` in one step
    #[must_use]
    pub fn allowed_transitions(&self, from: Mode) -> Vec<Mode> {
        self.successor(from).into_iter().collect()
    }

    /// Validate a single transition.
    ///
    /// # Errors
    /// `HarnessError::IllegalTransition` unless `to` is the successor of `from`.
    pub fn validate_transition(&self, from: Mode, to: Mode) -> Result<(), HarnessError> {
        if self.successor(from) == Some(to) {
            Ok(())
        } else {
            Err(HarnessError::IllegalTransition { from, to })
        }
    }
}

impl Default for ModeLadder {
    fn default() -> Self {
        Self::new([Mode::None, Mode::Optional, Mode::Required])
    }
}
