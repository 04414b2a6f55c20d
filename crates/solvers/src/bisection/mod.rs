//! Data structures, types, and the solver implementation for the execution
//! bisection game.

mod segment;
pub use segment::{rounds_to_single_step, Segment};

mod types;
pub use types::*;

mod game;
pub use game::Game;

mod trace;
pub use trace::BisectionGame;
