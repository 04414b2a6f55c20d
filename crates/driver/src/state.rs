//! The state module holds the state machines of the two drivers and the [PersistedState] that
//! survives restarts.

use crate::{
    ledger::{ChallengeSession, Subscription},
    types::{Bisected, ChallengeCompleted, ChallengeContext},
};
use fp_defender_solvers::bisection::BisectionGame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The [PersistedState] struct holds the only state the defender persists across restarts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    /// Whether a challenge was open against the first unresolved assertion when last observed.
    pub in_challenge: bool,
}

/// The state of the confirmation driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationState {
    /// Confirming assertions as their deadlines pass and watching for challenges.
    Idle,
    /// A challenge is being played by the challenge driver; nothing may be confirmed.
    ChallengeActive,
}

impl ConfirmationState {
    /// Restores the state from the persisted crash-recovery flag.
    pub fn from_flag(in_challenge: bool) -> Self {
        if in_challenge {
            Self::ChallengeActive
        } else {
            Self::Idle
        }
    }

    /// Returns the value of the crash-recovery flag for this state.
    pub fn in_challenge(&self) -> bool {
        matches!(self, Self::ChallengeActive)
    }
}

/// The state of the challenge driver.
pub enum ChallengeState {
    /// Waiting for the confirmation driver to hand over a challenge.
    Idle,
    /// Playing the bisection game.
    InChallenge(Box<ActiveChallenge>),
}

/// Everything the challenge driver holds while a challenge is in progress. Dropped as a whole
/// once the challenge completes, which also unsubscribes from the challenge's events.
pub struct ActiveChallenge {
    /// The snapshot received from the confirmation driver.
    pub context: ChallengeContext,
    /// The session bound to the challenge contract.
    pub session: Arc<dyn ChallengeSession>,
    /// Our execution trace of the disputed inbox range.
    pub game: BisectionGame,
    /// The contract's `Bisected` events.
    pub bisected: Subscription<Bisected>,
    /// The contract's `ChallengeCompleted` events.
    pub completed: Subscription<ChallengeCompleted>,
    /// Timestamp after which the opponent may be timed out, if it is their turn.
    pub opponent_timeout: Option<u64>,
}
