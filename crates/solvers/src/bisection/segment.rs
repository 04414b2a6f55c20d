//! The segment module holds the [Segment] type, a contiguous range of step indices within an
//! execution trace that is still in dispute.

use serde::{Deserialize, Serialize};

/// A disputed range `[start, end]` of step indices. Both boundary states are committed to by
/// both parties; the disagreement lies somewhere between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    /// The index of the first state in the segment.
    pub start: u64,
    /// The index of the last state in the segment.
    pub end: u64,
}

impl Segment {
    /// Creates a new [Segment] spanning `[start, end]`.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Creates a new [Segment] from a start index and a length, as emitted by the challenge
    /// contract.
    pub fn from_start_and_length(start: u64, length: u64) -> Option<Self> {
        start.checked_add(length).map(|end| Self::new(start, end))
    }

    /// Returns the number of steps covered by the [Segment].
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Returns `true` if the [Segment] covers no steps.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the [Segment] has narrowed down to a single execution step.
    pub fn is_single_step(&self) -> bool {
        self.len() == 1
    }

    /// Returns the index of the state offered as the next commitment. Ties round toward the
    /// lower index.
    pub fn midpoint(&self) -> u64 {
        self.start + self.len() / 2
    }

    /// Splits the [Segment] at its midpoint. Returns `None` if the segment cannot be bisected
    /// any further.
    pub fn halves(&self) -> Option<(Segment, Segment)> {
        if self.len() < 2 {
            return None;
        }
        let mid = self.midpoint();
        Some((Segment::new(self.start, mid), Segment::new(mid, self.end)))
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Returns the worst-case number of bisection rounds needed to narrow a dispute over
/// `num_steps` steps down to a single step, i.e. `ceil(log2(num_steps))`.
pub fn rounds_to_single_step(num_steps: u64) -> u32 {
    if num_steps <= 1 {
        return 0;
    }
    u64::BITS - (num_steps - 1).leading_zeros()
}
