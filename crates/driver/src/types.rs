//! Domain types shared between the ledger session and the driver loops.

use anyhow::{anyhow, Result};
use ethers::types::{Address, H256, U256};
use fp_defender_solvers::bisection::Segment;

/// A proposed L2 state claim posted to the base ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    /// The monotonic assertion ID.
    pub id: u64,
    /// Commitment to the L2 state after executing up to `inbox_size`.
    pub state_hash: H256,
    /// Cumulative number of L2 inputs claimed consumed.
    pub inbox_size: u64,
    /// The ID of the assertion this one extends.
    pub parent: u64,
    /// Timestamp after which the assertion may be confirmed absent a challenge.
    pub deadline: u64,
    /// Timestamp at which the assertion was proposed.
    pub proposal_time: u64,
}

/// The subset of an L1 block header the drivers care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// The block number.
    pub number: u64,
    /// The block timestamp.
    pub timestamp: u64,
}

/// Emitted by the rollup when a proposer posts a new assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionCreated {
    pub id: u64,
    pub asserter: Address,
    pub vm_hash: H256,
    pub inbox_size: u64,
}

/// Emitted by the rollup when an assertion becomes final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionConfirmed {
    pub id: u64,
}

/// Emitted by the rollup when a challenge is opened against an assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionChallenged {
    pub id: u64,
    pub challenge_address: Address,
}

/// Emitted by a challenge contract after every bisection round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bisected {
    /// Commitment to the start state of the disputed segment.
    pub start_state: H256,
    /// Commitment to the midpoint state offered in the last round.
    pub mid_state: H256,
    /// Commitment to the end state of the disputed segment.
    pub end_state: H256,
    /// The L1 block the bisection was included in.
    pub block_number: u64,
    /// The timestamp of the L1 block the bisection was included in.
    pub block_time: u64,
    /// The segment the next responder has to act on.
    pub segment: Segment,
}

/// Emitted by a challenge contract once the game is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeCompleted {
    pub winner: Address,
    pub loser: Address,
}

/// The immutable snapshot handed from the confirmation loop to the challenge loop when a
/// challenge is raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeContext {
    /// The address of the challenge contract.
    pub challenge_address: Address,
    /// The challenged assertion.
    pub assertion: Assertion,
    /// The parent of the challenged assertion.
    pub parent: Assertion,
    /// Whether the challenge was rebuilt from chain state after a restart.
    pub resumed: bool,
}

impl ChallengeContext {
    /// Returns the inbox range `[start, end)` whose execution is disputed.
    pub fn inbox_range(&self) -> (u64, u64) {
        (self.parent.inbox_size, self.assertion.inbox_size)
    }
}

/// Narrows a [U256] read from the ledger into a [u64].
pub fn to_u64(value: U256) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        return Err(anyhow!("Value {} does not fit into u64", value));
    }
    Ok(value.as_u64())
}
