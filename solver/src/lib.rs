//! An approximate problem solver for discrete state-space puzzles.
//!
//! Given a declarative problem description (typed slots, typed objects with
//! movable payloads, action templates and an initial/goal configuration), the
//! solver searches for a sequence of primitive moves by driving a four-layer
//! hierarchy of cooperating planners. Each layer learns reusable
//! macro-strategies that are interned in a content-addressed cache and
//! persisted across runs, so that repeated runs converge toward shorter
//! solutions.
//!
//! The layers, bottom-up:
//! - [`task`]: the mutable world state and the two primitive (reversible) move kinds,
//! - `lct`: selects or synthesizes one primitive move,
//! - `int`: sequences primitive moves into consecutive paths ending on a destination slot,
//! - `icm`: sequences paths so that each relocates one object inside a sub-problem scope,
//! - `scm`: sequences relocations toward the goal configuration,
//! - [`control`]: the outer tick loop.

#[macro_use]
mod ids;

pub mod cache;
pub mod condition;
pub mod config;
pub mod control;
pub mod icm;
pub mod int;
pub mod lct;
pub mod logger;
pub mod paths;
pub mod problem;
pub mod scm;
pub mod solver;
pub mod strategy;
pub mod task;

#[cfg(test)]
pub mod testing;

pub use control::Outcome;
pub use problem::{Problem, SimParams};
pub use solver::Solver;
