//! L4: the second contextual stage, the goal-seeker.
//!
//! Drives the first stage over the full task. A streak that ends with the
//! goal configuration commits a goal-level strategy in two versions: the
//! raw relocation sequence and an optimized one (the flattened path
//! sequence reduced within the precision window and re-wrapped as a single
//! relocation).

use itertools::Itertools;
use tracing::debug;

use crate::config::Config;
use crate::control::Outcome;
use crate::paths::{build_int_path, build_triangle_from_task, reduce_int_path};
use crate::solver::Solver;
use crate::strategy::{IcmId, ScmId, ScmMove, StrategyRef, TriId};

#[derive(Default)]
pub struct ScmState {
    pub triangle: Option<TriId>,
    /// Current configuration of the full task.
    pub nmc: Config,
    /// Goal configuration of the full task.
    pub nmf: Config,
    pub gradient: f64,
    /// Last committed goal-level strategy.
    pub recent: Option<ScmId>,
    /// The cached strategy currently pursued, when the pick came from
    /// memory; the stage never synthesizes top-down.
    pub cur: Option<ScmId>,
    /// Planned remaining relocations.
    pub priors: Vec<IcmId>,
    /// Relocations executed in the current streak.
    pub posteriors: Vec<IcmId>,
    /// Whether the previous downstream tick wanted to continue.
    pub prev: bool,
    /// Snapshot before the current streak.
    pub before: Config,
    /// Configurations reached by committed streaks.
    pub seen: Vec<Config>,
    pub hard_reload: bool,
}

impl Solver {
    /// Binds the stage to the main task and a pristine virtual copy.
    pub fn scm_load(&mut self) {
        self.scm.triangle = Some(build_triangle_from_task(&mut self.cache, &self.main));
        self.scm.nmc = self.main.config();
        self.scm.nmf = self.main.goal.clone();
        self.scm_virt = crate::task::Task::new(self.problem.clone());
        self.scm.before = self.main.config();
        let seen = self.main.config();
        self.scm.seen.push(seen);
    }

    /// One step of the stage: keep or pick a goal-level strategy, reload
    /// the stage below, tick it, fold back.
    pub fn scm_do(&mut self) -> Outcome {
        self.scm_select();
        if self.scm.hard_reload {
            self.icm_load();
        } else {
            self.icm_reload();
        }
        self.scm.hard_reload = false;

        let strategy = if !self.scm.prev {
            self.scm.priors.first().copied()
        } else {
            None
        };
        self.log.record("scm", "before", "task", self.main.log_value());
        if let Some(td) = strategy {
            let name = self.cache.icm(td).name.clone();
            self.log.record("scm", "planned", "icm strategy", name.into());
        }
        let out = self.icm_do(strategy);
        self.scm.prev = out == Outcome::Continue;
        self.scm.gradient = self.icm_task.config().distance(&self.scm.before, &self.problem);
        self.main.update(&self.icm_task);
        self.scm.nmc = self.main.config();
        self.log.record("scm", "after", "task", self.main.log_value());
        if out == Outcome::Continue {
            return Outcome::Continue;
        }
        if out != Outcome::DeadEnd {
            if let Some(used) = self.icm.recent {
                self.scm.posteriors.push(used);
                if self.scm.priors.len() > 1 && used == self.scm.priors[0] {
                    self.scm.priors.remove(0);
                    return Outcome::Continue;
                }
            }
        }
        self.scm_evaluate(out)
    }

    fn scm_evaluate(&mut self, below: Outcome) -> Outcome {
        if below == Outcome::Done {
            self.scm_store();
            if self.scm_is_final() {
                return Outcome::Done;
            }
            return Outcome::Continue;
        }
        if self.scm.posteriors.len() >= self.params.max_moves_scm {
            self.scm_truncate(true);
            return Outcome::Yield;
        }
        if below == Outcome::DeadEnd {
            self.scm_truncate(true);
            return Outcome::Continue;
        }
        Outcome::Continue
    }

    pub fn scm_is_final(&mut self) -> bool {
        if self.scm.nmf.slots.is_empty() {
            return false;
        }
        let dist = self.scm.nmf.distance(&self.main.config(), &self.problem);
        self.log.record("scm", "after", "distance", dist.into());
        dist == 0.0
    }

    /// Commits the executed relocations, in an optimized and (unless the
    /// streak was driven by a cached strategy) a raw version.
    fn scm_store(&mut self) {
        if self.scm.posteriors.is_empty() {
            self.scm.recent = None;
            return;
        }
        let conf_in = {
            let before = self.scm.before.clone();
            self.cache.intern_config(before)
        };
        let conf_out = {
            let now = self.main.config();
            self.cache.intern_config(now)
        };
        // optimized version: flatten to the path sequence, reduce it within
        // the precision window, re-wrap as one relocation
        let path = build_int_path(&self.cache, &self.scm.posteriors);
        let problem = self.problem.clone();
        let path = reduce_int_path(&mut self.cache, &problem, path, self.params.precision);
        let tensoral = build_triangle_from_task(&mut self.cache, &self.icm_task);
        let way = self.cache.intern_icm(crate::strategy::IcmMove {
            tensoral,
            conceptual: path,
        });
        let optimized = self.cache.intern_scm(ScmMove {
            conf_in,
            moves: vec![way],
            conf_out,
        });
        debug!(strategy = %self.cache.scm(optimized).name, "optimized goal strategy stored");
        let committed = match self.scm.cur {
            // a streak driven by a cached strategy closes onto that strategy
            Some(known) => known,
            None => self.cache.intern_scm(ScmMove {
                conf_in,
                moves: self.scm.posteriors.clone(),
                conf_out,
            }),
        };
        self.scm.before = self.main.config();
        let seen = self.main.config();
        self.scm.seen.push(seen);
        self.scm.recent = Some(committed);
        self.scm.cur = None;
        self.scm.priors.clear();
        self.scm.posteriors.clear();
    }

    fn scm_truncate(&mut self, hard: bool) {
        if self.scm.posteriors.is_empty() {
            return;
        }
        let before = self.scm.before.clone();
        self.main.restore(&before);
        self.scm.hard_reload = hard;
        self.scm.gradient = 0.0;
        self.scm.recent = None;
        self.scm.cur = None;
        self.scm.priors.clear();
        self.scm.posteriors.clear();
    }

    /// Picks a cached goal-level strategy whose entry configuration matches
    /// the current state and whose relocations all probe through; otherwise
    /// leaves the first stage to drive bottom-up.
    fn scm_select(&mut self) {
        if self.scm.prev {
            return;
        }
        let cfg = self.main.config();
        let prev = self.scm.recent.map(StrategyRef::Scm);
        let ids = (0..self.cache.scms.len())
            .map(ScmId::from)
            .sorted_by_key(|&i| self.cache.scm(i).score);
        for id in ids {
            if !self.applies(&cfg, prev, StrategyRef::Scm(id)) {
                continue;
            }
            if self.cache.cfg(self.cache.scm(id).mv.conf_in) != &cfg {
                continue;
            }
            // rebuild the stage's virtual task and probe the strategy on it
            let scope: Vec<crate::problem::SlotId> = self
                .cache
                .cfg(self.cache.scm(id).mv.conf_in)
                .slots
                .iter()
                .map(|s| s.slot)
                .collect();
            self.icm_virt.reload(&self.main, &scope);
            if !self.icm_probe_ic(id) {
                continue;
            }
            self.scm.cur = Some(id);
            self.scm.priors = self.cache.scm(id).mv.moves.clone();
            debug!(strategy = %self.cache.scm(id).name, "goal strategy adopted top-down");
            return;
        }
        self.scm.cur = None;
        self.scm.priors.clear();
    }

    /// Top-down triangular exchange is not implemented in this revision;
    /// the probe interface stays and always declines.
    pub fn scm_probe(&mut self, _strategy: ScmId) -> bool {
        false
    }
}
