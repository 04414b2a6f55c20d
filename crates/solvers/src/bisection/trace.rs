//! The trace module contains an implementation of the [Game] trait backed by a fully replayed
//! execution trace.

use super::{Commitment, ExecutionState, Game, Response, Segment};
use anyhow::{anyhow, ensure, Result};

/// The local view of a bisection game: the execution trace between the parent assertion and the
/// challenged assertion, held in memory for the lifetime of the challenge.
#[derive(Debug, Clone)]
pub struct BisectionGame {
    /// Our full execution trace, indexed by step.
    states: Vec<ExecutionState>,
}

impl BisectionGame {
    /// Creates a new [BisectionGame] over the given trace. The trace must contain at least the
    /// initial state.
    pub fn new(states: Vec<ExecutionState>) -> Result<Self> {
        ensure!(!states.is_empty(), "Execution trace contains no states");
        Ok(Self { states })
    }

    /// Returns the number of steps in the trace: one fewer than the number of states.
    pub fn num_steps(&self) -> u64 {
        self.states.len() as u64 - 1
    }

    /// Returns the segment covering the whole trace.
    pub fn full_segment(&self) -> Segment {
        Segment::new(0, self.num_steps())
    }

    /// Returns the midpoint commitment used to initialize the on-chain challenge.
    pub fn initial_commitment(&self) -> Result<Commitment> {
        self.commitment_at(self.full_segment().midpoint())
    }
}

impl Game for BisectionGame {
    fn respond(&self, segment: Segment) -> Result<Response> {
        ensure!(!segment.is_empty(), "Cannot respond to empty segment {}", segment);
        ensure!(
            segment.end <= self.num_steps(),
            "Segment {} exceeds local trace of {} steps",
            segment,
            self.num_steps()
        );

        if segment.is_single_step() {
            tracing::trace!(target: "solvers", "Segment {} is a single step", segment);
            return Ok(Response::OneStepProof {
                step: segment.start,
            });
        }

        tracing::trace!(target: "solvers", "Bisecting segment {} at step {}", segment, segment.midpoint());
        Ok(Response::Bisect {
            segment,
            bisection: [
                self.commitment_at(segment.start)?,
                self.commitment_at(segment.midpoint())?,
                self.commitment_at(segment.end)?,
            ],
        })
    }

    fn state_at(&self, index: u64) -> Result<&ExecutionState> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.states.get(i))
            .ok_or(anyhow!("Invalid step index {}", index))
    }

    fn commitment_at(&self, index: u64) -> Result<Commitment> {
        self.state_at(index).map(ExecutionState::hash)
    }
}
