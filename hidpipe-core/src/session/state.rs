// SPDX-License-Identifier: Apache-2.0

//! Session state machine with typed transitions.
//!
//! Implements the attachment lifecycle: Unopened → Opening → Active →
//! Closing → Closed (terminal). Invalid transitions are SessionError.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No attachment has been requested yet.
    Unopened,

    /// Open in progress: entitlement and uniqueness checks running.
    Opening,

    /// Attachment established; events are flowing.
    Active,

    /// Close or teardown has begun; no new administrative requests.
    Closing,

    /// Terminal state.
    Closed,
}

impl SessionState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Unopened => "Unopened",
            Self::Opening => "Opening",
            Self::Active => "Active",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        }
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        matches!(
            (self, target),
            (Self::Unopened, Self::Opening) |
            // A failed open falls back without ever becoming Active.
            (Self::Opening, Self::Unopened) |
            (Self::Opening, Self::Active) |
            (Self::Opening, Self::Closing) |
            (Self::Active, Self::Closing) |
            (Self::Closing, Self::Closed)
        )
    }

    /// Whether administrative requests are still accepted in this state.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tracks one client attachment's lifecycle.
#[derive(Debug)]
pub struct SessionLifecycle {
    current: SessionState,
    transition_count: u64,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            current: SessionState::Unopened,
            transition_count: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.current
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a transition; fails without state change when invalid.
    pub fn transition_to(&mut self, target: SessionState) -> Result<(), SessionError> {
        if !self.current.can_transition_to(target) {
            return Err(SessionError::InvalidTransition {
                from: self.current.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            from = self.current.name(),
            to = target.name(),
            "Session transition"
        );

        self.current = target;
        self.transition_count += 1;
        Ok(())
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
