//! The game module holds the [Game] trait.

use super::{Commitment, ExecutionState, Response, Segment};
use anyhow::Result;

/// The [Game] trait defines the interface for a local view of an onchain bisection game.
pub trait Game {
    /// Respond to a bisection that left `segment` in dispute.
    ///
    /// ### Takes
    /// - `segment`: The segment of the execution trace that is currently disputed.
    ///
    /// ### Returns
    /// - `Ok(Response)`: The response to submit.
    /// - `Err(anyhow::Error)`: The segment is empty or lies outside of the local trace.
    fn respond(&self, segment: Segment) -> Result<Response>;

    /// Fetch the [ExecutionState] at the given step index. This state is always correct in
    /// the relative view of the participant.
    fn state_at(&self, index: u64) -> Result<&ExecutionState>;

    /// Fetch the [Commitment] to the state at the given step index.
    fn commitment_at(&self, index: u64) -> Result<Commitment>;
}
