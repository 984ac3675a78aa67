//! The outer control loop.

use tracing::{debug, info};

use crate::solver::Solver;

/// Feedback of one layer tick to the layer above, fresh every tick.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Outcome {
    /// The layer's current streak is still open; keep ticking it.
    Continue,
    /// The layer stopped this streak. A freshly closed move, if any, is in
    /// its `recent` field.
    Yield,
    /// The layer's goal configuration is reached.
    Done,
    /// The layer's truncation allowance is exhausted; the stage above must
    /// reconsider.
    DeadEnd,
}

impl Solver {
    /// Runs the simulation until the top stage reports its goal or the
    /// iteration budget runs out. Returns whether the goal was reached.
    pub fn run(&mut self) -> bool {
        for step in 0..self.params.max_its {
            debug!(step, "processing iteration");
            self.log.new_iteration(step);
            if self.tick() == Outcome::Done {
                info!(step, "arrived at the final state");
                return true;
            }
        }
        info!(max_its = self.params.max_its, "iteration budget exhausted");
        false
    }

    /// One control tick: drive the top stage once. Anything but `Done`
    /// means the loop starts over.
    pub fn tick(&mut self) -> Outcome {
        match self.scm_do() {
            Outcome::Done => Outcome::Done,
            _ => Outcome::Continue,
        }
    }
}
