//! L2: the internal interface.
//!
//! Sequences primitive moves into consecutive paths that end on a
//! destination (`pin`) slot. A closed path is committed as a path strategy;
//! a diverging path is truncated, blocking its first primitive move; a
//! repeating pattern over the completed paths rewinds history and learns a
//! negative condition.

use itertools::Itertools;
use rand::Rng;
use tracing::debug;

use crate::config::Config;
use crate::control::Outcome;
use crate::paths::{are_consecutive, starts_loop};
use crate::problem::Modulate;
use crate::solver::{Solver, TaskRef};
use crate::strategy::{IntId, IntMove, IntSel, LctId, StrategyRef, TriId};

#[derive(Default)]
pub struct IntState {
    pub triangle: Option<TriId>,
    /// Configuration of the triangle at the start of the current path.
    pub fnmc: Config,
    /// Goal configuration of the triangle.
    pub fnmf: Config,
    /// Metric distance of the task to `fnmc` after the last tick.
    pub gradient: f64,
    /// Last committed path strategy of the current streak.
    pub recent: Option<IntId>,
    /// Completed path strategies of the current streak.
    pub recent_moves: Vec<IntId>,
    /// The path currently pursued.
    pub cur: Option<IntSel>,
    /// Planned remaining primitive moves of the current path.
    pub priors: Vec<LctId>,
    /// Primitive moves actually executed in the current path.
    pub posteriors: Vec<LctId>,
    /// Snapshot taken before the current path.
    pub before: Config,
    /// Snapshots taken before each completed path.
    pub history: Vec<Config>,
    /// Path strategies blocked top-down by the first contextual stage.
    pub blocked: Vec<IntId>,
    /// Paths proposed within the current synthesis call.
    pub gen_moves: Vec<Vec<LctId>>,
    pub num_truncs: usize,
}

impl Solver {
    /// Rebuilds the interface's tasks from the upstream task, clearing the
    /// streak bookkeeping.
    pub fn int_load(&mut self, from: TaskRef, tri: Option<TriId>) {
        self.int_reload(from, tri);
        self.int.before = self.int_task.config();
        self.int.recent_moves.clear();
        self.int.history.clear();
        self.int.blocked.clear();
    }

    /// Re-synchronizes the interface's tasks with the upstream task and the
    /// given triangle; streak bookkeeping survives.
    pub fn int_reload(&mut self, from: TaskRef, tri: Option<TriId>) {
        let tri = tri.unwrap_or_else(|| match from {
            TaskRef::Main => crate::paths::build_triangle_from_task(&mut self.cache, &self.main),
            _ => crate::paths::build_triangle_from_task(&mut self.cache, &self.icm_task),
        });
        let scope = self.cache.tri(tri).slots.clone();
        match from {
            TaskRef::Main => {
                self.int_task.reload(&self.main, &scope);
                self.int_virt.reload(&self.main, &scope);
            }
            _ => {
                self.int_task.reload(&self.icm_task, &scope);
                self.int_virt.reload(&self.icm_task, &scope);
            }
        }
        self.int.triangle = Some(tri);
        self.int.fnmc = self.int_task.config();
        self.int.fnmf = self.int_task.goal.clone();
    }

    /// One step of the interface: pick or keep a path, run one primitive
    /// move, fold the result back into the plan.
    pub fn int_do(&mut self, top_down: Option<&IntSel>) -> Outcome {
        self.int_select(top_down);
        let strategy = self.int.priors.first().copied();
        self.log.record("int", "before", "task", self.int_task.log_value());
        if let Some(s) = strategy {
            let name = self.cache.lct(s).name.clone();
            self.log.record("int", "planned", "lct strategy", name.into());
        }
        let ok = self.lct_do(strategy, TaskRef::Int, false);
        self.int.gradient = self.int_task.config().distance(&self.int.fnmc, &self.problem);
        self.log.record("int", "used", "success", ok.into());
        self.log.record("int", "after", "task", self.int_task.log_value());
        if ok {
            let used = self.lct.recent.expect("successful primitive tick sets recent");
            if self.int.posteriors.contains(&used) {
                // a circle inside the current path: block and step back
                self.lct.blocked.push(used);
                self.int_task.revert_last();
                return Outcome::Continue;
            }
            self.int.posteriors.push(used);
            if self.int.priors.len() > 1 && used == self.int.priors[0] {
                self.int.priors.remove(0);
                return Outcome::Continue;
            }
        }
        self.int_evaluate()
    }

    fn int_evaluate(&mut self) -> Outcome {
        // goal of the triangle reached
        let cur_cfg = self.int_task.config();
        if self.int.fnmf.distance(&cur_cfg, &self.problem) == 0.0 {
            self.int_store();
            return Outcome::Done;
        }
        // a repeating pattern over completed paths rewinds history
        if let Some(idx) = starts_loop(&self.int.recent_moves, self.params.size_pattern) {
            self.int_truncate_to(idx);
            return Outcome::Continue;
        }
        // an object move landing on a pin closes the path
        if let Some(&last) = self.int.posteriors.last() {
            let mv = self.cache.lct(last).mv;
            let object_move = matches!(self.problem.handle(mv.handle).modulate, Modulate::Object);
            if object_move && self.problem.slot_has_type(mv.slot_out, "pin") {
                self.int_store();
                return Outcome::Yield;
            }
        }
        if self.int.posteriors.len() >= self.params.max_moves_int {
            self.int_truncate();
            return Outcome::Continue;
        }
        self.int_truncate();
        if self.int.num_truncs >= self.params.max_truncs_int {
            self.int.num_truncs = 0;
            return Outcome::DeadEnd;
        }
        Outcome::Continue
    }

    /// Commits the executed primitive moves as a path strategy and resets
    /// the path buffers.
    fn int_store(&mut self) {
        if self.int.posteriors.is_empty() {
            // nothing executed in this streak; the stage above must not
            // re-read an older close
            self.int.recent = None;
            return;
        }
        let moves = self.int.posteriors.clone();
        let slot_in = self.cache.lct(moves[0]).mv.slot_in;
        let slot_out = self.cache.lct(*moves.last().expect("posteriors checked non-empty")).mv.slot_out;
        let id = self.cache.intern_int(IntMove { slot_in, moves, slot_out });
        debug!(strategy = %self.cache.int(id).name, "path closed");
        self.int.history.push(self.int.before.clone());
        self.int.recent_moves.push(id);
        self.int.before = self.int_task.config();
        self.int.recent = Some(id);
        self.int.cur = None;
        self.int.priors.clear();
        self.int.posteriors.clear();
        self.lct.blocked.clear();
    }

    /// Abandons the current path: revert to the path start, block its first
    /// primitive move, and drop the last completed path from the
    /// loop-detection window.
    fn int_truncate(&mut self) {
        if self.int.posteriors.is_empty() {
            return;
        }
        let before = self.int.before.clone();
        self.int_task.restore(&before);
        self.lct.blocked.push(self.int.posteriors[0]);
        self.int.recent_moves.pop();
        self.int.recent = self.int.recent_moves.last().copied();
        self.int.cur = None;
        self.int.priors.clear();
        self.int.posteriors.clear();
        self.int.num_truncs += 1;
    }

    /// Rewinds to the state before the path that opened a loop and learns
    /// that this path must not follow its predecessor there.
    fn int_truncate_to(&mut self, idx: usize) {
        if self.int.posteriors.is_empty() {
            return;
        }
        let cfg = self.int_task.config();
        let prev = idx.checked_sub(1).map(|i| StrategyRef::Int(self.int.recent_moves[i]));
        let strat = StrategyRef::Int(self.int.recent_moves[idx]);
        self.learn(&cfg, prev, strat, false);
        let snap = self.int.history[idx].clone();
        self.int_task.restore(&snap);
        self.int.before = snap;
        self.int.history.truncate(idx);
        self.int.recent_moves.truncate(idx);
        self.int.recent = self.int.recent_moves.last().copied();
        self.int.cur = None;
        self.int.priors.clear();
        self.int.posteriors.clear();
        self.int.num_truncs += 1;
    }

    /// Probes a path strategy against the virtual task, move by move.
    pub fn int_probe(&mut self, sel: &IntSel) -> bool {
        let resolved = match sel {
            IntSel::Known(id) => Some(*id),
            IntSel::New(mv) => self.cache.find_int(mv),
        };
        if let Some(id) = resolved {
            if self.int.blocked.contains(&id) {
                return false;
            }
        }
        for m in sel.lct_moves(&self.cache) {
            if !self.lct_do(Some(m), TaskRef::IntVirt, true) {
                return false;
            }
        }
        true
    }

    /// Selects the path to pursue: top-down adoption, a probed strategy from
    /// memory in ascending score order, or a freshly synthesized path.
    pub fn int_select(&mut self, top_down: Option<&IntSel>) {
        if let Some(td) = top_down {
            self.int_store();
            self.int.priors = td.lct_moves(&self.cache);
            self.int.cur = Some(td.clone());
            self.int.posteriors.clear();
            return;
        }
        let mut it = 0;
        loop {
            if it == self.params.max_recs_int {
                self.int.cur = None;
                self.int.priors.clear();
                return;
            }
            if !self.int.priors.is_empty() {
                return;
            }
            if self.cache.lcts.is_empty() {
                // nothing learned yet: let the layer below drive bottom-up
                self.int.cur = None;
                self.int.priors.clear();
                return;
            }
            if !self.rng.random_bool(self.params.prob_redo_int) {
                let Some(slot_in) = self.int_task.find_filled_slot() else {
                    return;
                };
                let cfg = self.int_task.config();
                let prev = self.int.recent.map(StrategyRef::Int);
                let ids = (0..self.cache.ints.len())
                    .map(IntId::from)
                    .sorted_by_key(|&i| self.cache.int(i).score);
                let mut adopted = false;
                for id in ids {
                    if !self.applies(&cfg, prev, StrategyRef::Int(id)) {
                        continue;
                    }
                    if self.int.blocked.contains(&id) {
                        continue;
                    }
                    let moves = self.cache.int(id).mv.moves.clone();
                    if self.cache.lct(moves[0]).mv.slot_in != slot_in {
                        continue;
                    }
                    let fnmc = self.int.fnmc.clone();
                    self.int_virt.restore(&fnmc);
                    let ok = moves.iter().all(|&m| self.lct_do(Some(m), TaskRef::IntVirt, true));
                    if !ok {
                        continue;
                    }
                    self.int.cur = Some(IntSel::Known(id));
                    self.int.priors = moves;
                    adopted = true;
                    break;
                }
                if adopted {
                    return;
                }
            }
            match self.int_new_move() {
                None => {
                    self.int.cur = None;
                    self.int.priors.clear();
                    return;
                }
                Some((sel, lcts)) => {
                    let cfg = self.int_task.config();
                    let prev = self.int.recent.map(StrategyRef::Int);
                    let acceptable = match &sel {
                        IntSel::Known(id) => {
                            self.applies(&cfg, prev, StrategyRef::Int(*id)) && !self.int.blocked.contains(id)
                        }
                        // a path no condition or block list can name yet
                        IntSel::New(_) => true,
                    };
                    if !acceptable {
                        it += 1;
                        continue;
                    }
                    self.int.priors = lcts;
                    self.int.cur = Some(sel);
                    return;
                }
            }
        }
    }

    /// Synthesizes a fresh path against the virtual task.
    fn int_new_move(&mut self) -> Option<(IntSel, Vec<LctId>)> {
        let fnmc = self.int.fnmc.clone();
        self.int_virt.restore(&fnmc);
        self.int.gen_moves.clear();
        let moves = self.int_build_random_path();
        if moves.is_empty() {
            return None;
        }
        let slot_in = self.cache.lct(moves[0]).mv.slot_in;
        let slot_out = self.cache.lct(*moves.last().expect("path checked non-empty")).mv.slot_out;
        let mv = IntMove { slot_in, moves: moves.clone(), slot_out };
        let sel = match self.cache.find_int(&mv) {
            Some(id) => IntSel::Known(id),
            None => IntSel::New(mv),
        };
        Some((sel, moves))
    }

    /// Builds a random consecutive path ending on a pin, mixing known moves
    /// with bottom-up synthesis, bounded by the interface budgets.
    fn int_build_random_path(&mut self) -> Vec<LctId> {
        let mut avail: Vec<LctId> = (0..self.cache.lcts.len()).map(LctId::from).collect();
        let mut moves: Vec<LctId> = Vec::new();
        let mut it = 0usize;
        let mut jt = 0usize;
        loop {
            if jt == self.params.max_recs_int {
                return Vec::new();
            }
            if it == self.params.max_moves_int {
                let fnmc = self.int.fnmc.clone();
                self.int_virt.restore(&fnmc);
                moves.clear();
                it = 0;
                jt += 1;
                continue;
            }
            // half the time (or when nothing is known) synthesize bottom-up
            let mut pick: Option<LctId> = None;
            if !avail.is_empty() && self.rng.random_bool(0.5) {
                let candidates: Vec<LctId> = avail
                    .iter()
                    .copied()
                    .filter(|id| !self.lct.blocked.contains(id))
                    .collect();
                if candidates.is_empty() {
                    if moves.is_empty() {
                        return Vec::new();
                    }
                    moves.clear();
                    it = 0;
                    jt += 1;
                    continue;
                }
                let cand = candidates[self.rng.random_range(0..candidates.len())];
                let mv = self.cache.lct(cand).mv;
                if let Some(&last) = moves.last() {
                    let last_mv = self.cache.lct(last).mv;
                    let obj = |m: &crate::strategy::LctMove| {
                        matches!(self.problem.handle(m.handle).modulate, Modulate::Object)
                    };
                    // two channel moves in a row are futile
                    if !obj(&mv) && !obj(&last_mv) {
                        jt += 1;
                        continue;
                    }
                }
                let prev = moves.last().map(|&m| self.cache.lct(m).mv);
                if !are_consecutive(&self.problem, prev.as_ref(), &mv) {
                    jt += 1;
                    continue;
                }
                pick = Some(cand);
            }
            let before = self.int_virt.config();
            let ok = self.lct_do(pick, TaskRef::IntVirt, pick.is_some());
            if !ok {
                self.int_virt.restore(&before);
                jt += 1;
                continue;
            }
            let mv_id = match pick {
                Some(id) => id,
                None => self.lct.recent.expect("bottom-up tick interned its move"),
            };
            moves.push(mv_id);
            avail.retain(|&x| x != mv_id);
            if !self.problem.slot_has_type(self.cache.lct(mv_id).mv.slot_out, "pin") {
                it += 1;
                jt += 1;
                continue;
            }
            // a closed path proposed before in this synthesis call starts over
            if self.int.gen_moves.contains(&moves) {
                moves.clear();
                it = 0;
                jt += 1;
                continue;
            }
            self.int.gen_moves.push(moves.clone());
            return moves;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Problem;
    use crate::strategy::LctMove;
    use crate::testing::hanoi_spec;

    fn solver() -> Solver {
        let (p, params) = Problem::from_json_str(&hanoi_spec(1, 100)).unwrap();
        let mut s = Solver::new(p, params, 11);
        s.load(None).unwrap();
        s
    }

    fn lct(s: &mut Solver, handle: &str, slot_in: &str, movable: &str, slot_out: &str) -> crate::strategy::LctId {
        let p = s.problem.clone();
        s.cache.intern_lct(LctMove {
            handle: p.handle_id(handle).unwrap(),
            slot_in: p.slot_id(slot_in).unwrap(),
            movable: p.movable_id(movable).unwrap(),
            slot_out: p.slot_id(slot_out).unwrap(),
        })
    }

    fn int_move(s: &mut Solver, moves: &[crate::strategy::LctId]) -> IntId {
        let slot_in = s.cache.lct(moves[0]).mv.slot_in;
        let slot_out = s.cache.lct(*moves.last().unwrap()).mv.slot_out;
        s.cache.intern_int(IntMove { slot_in, moves: moves.to_vec(), slot_out })
    }

    #[test]
    fn closing_on_a_pin_stores_a_path_strategy() {
        let mut s = solver();
        // drive the interface until it commits its first path
        let mut out = Outcome::Continue;
        for _ in 0..500 {
            out = s.int_do(None);
            if out != Outcome::Continue {
                break;
            }
        }
        assert_ne!(out, Outcome::Continue, "interface never closed a path");
        if out == Outcome::Yield {
            let id = s.int.recent.expect("a yield closes a path");
            let mv = &s.cache.int(id).mv;
            // the closed path ends with an object move onto a pin
            let last = s.cache.lct(*mv.moves.last().unwrap()).mv;
            assert!(s.problem.slot_has_type(last.slot_out, "pin"));
            // every adjacent pair satisfies the consecutiveness rule
            for w in mv.moves.windows(2) {
                let prev = s.cache.lct(w[0]).mv;
                let cur = s.cache.lct(w[1]).mv;
                assert!(are_consecutive(&s.problem, Some(&prev), &cur));
            }
        }
    }

    #[test]
    fn a_two_cycle_learns_a_negative_condition() {
        let mut s = solver();
        let t1 = lct(&mut s, "take", "pa", "d1", "hand");
        let s1 = lct(&mut s, "shift", "qa", "hand", "qb");
        let p1 = lct(&mut s, "put", "hand", "d1", "pb");
        let a = int_move(&mut s, &[t1, s1, p1]);
        let t2 = lct(&mut s, "take", "pb", "d1", "hand");
        let s2 = lct(&mut s, "shift", "qb", "hand", "qa");
        let p2 = lct(&mut s, "put", "hand", "d1", "pa");
        let b = int_move(&mut s, &[t2, s2, p2]);
        // fabricate a streak that went a,b,a,b
        let snap = s.int_task.config();
        s.int.recent_moves = vec![a, b, a, b];
        s.int.history = vec![snap.clone(), snap.clone(), snap.clone(), snap.clone()];
        s.int.before = snap.clone();
        s.int.posteriors = vec![t1];
        let out = s.int_evaluate();
        assert_eq!(out, Outcome::Continue);
        // the rewind learned exactly one negative condition on (config, none, a)
        assert_eq!(s.cache.cnds.len(), 1);
        let cnd = &s.cache.cnds[0];
        assert!(!cnd.is_pos);
        assert_eq!(cnd.prev, None);
        assert_eq!(cnd.strategy, StrategyRef::Int(a));
        assert_eq!(s.cache.cfg(cnd.config), &snap);
        // the next selection refuses the blocked strategy in that state
        assert!(!s.applies(&snap, None, StrategyRef::Int(a)));
        assert!(s.applies(&snap, Some(StrategyRef::Int(b)), StrategyRef::Int(a)));
        // history and the streak rewound to the loop start
        assert!(s.int.recent_moves.is_empty());
        assert!(s.int.posteriors.is_empty());
    }

    #[test]
    fn reaching_the_sub_goal_reports_done() {
        let mut s = solver();
        // restrict the interface to a triangle that is already in its goal state
        let p = s.problem.clone();
        let tri = crate::config::Triangle::canonical(
            &p,
            [p.slot_id("pb").unwrap(), p.slot_id("qb").unwrap()],
        );
        let tri = s.cache.intern_triangle(tri);
        s.int_load(TaskRef::Main, Some(tri));
        assert_eq!(s.int_do(None), Outcome::Done);
        // nothing was executed, so nothing was stored and recent is clear
        assert_eq!(s.int.recent, None);
        assert!(s.cache.ints.is_empty());
    }
}
