//! The types module contains all of the types relevant to the bisection game.

use super::Segment;
use ethers::{
    abi::{self, Token},
    types::{H256, U256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};

/// The [Commitment] type represents a claim on the execution trace at a given step index that is
/// offered by a participant in the bisection game.
pub type Commitment = H256;

/// A single step of L2 execution as replayed by the execution-trace generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    /// The L2 block the step belongs to.
    pub block_number: u64,
    /// The index of the transaction within the block.
    pub transaction_index: u64,
    /// The index of the step within the transaction.
    pub step_index: u64,
    /// The hash of the VM state after the step executed.
    pub vm_hash: H256,
}

impl ExecutionState {
    /// Returns the content hash of the state, which is the [Commitment] offered on-chain.
    pub fn hash(&self) -> Commitment {
        H256::from(keccak256(abi::encode(&[
            Token::Uint(U256::from(self.block_number)),
            Token::Uint(U256::from(self.transaction_index)),
            Token::Uint(U256::from(self.step_index)),
            Token::FixedBytes(self.vm_hash.as_bytes().to_vec()),
        ])))
    }
}

/// A [Response] is the action taken by the responder to narrow the disputed [Segment].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Offer a bisection of the segment: commitments to its start, midpoint and end states.
    Bisect {
        /// The segment being bisected.
        segment: Segment,
        /// The `[start, mid, end]` commitments.
        bisection: [Commitment; 3],
    },
    /// The segment covers a single step; prove it with a one-step proof starting at `step`.
    OneStepProof {
        /// The index of the pre-state of the disputed step.
        step: u64,
    },
}
