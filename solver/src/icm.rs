//! L3: the first contextual stage.
//!
//! Sequences path strategies so that each one relocates an object inside a
//! chosen sub-problem scope (the tensoral triangle). A streak that changes
//! the weighted configuration without revisiting a seen state closes into a
//! relocation strategy; dead ends below force a hard reload and propagate.

use itertools::Itertools;
use rand::Rng;
use tracing::debug;

use crate::config::Config;
use crate::control::Outcome;
use crate::paths::build_triangle_from_task;
use crate::problem::{Movable, ObjId, SlotId};
use crate::solver::{Solver, TaskRef};
use crate::strategy::{IcmId, IcmMove, IcmSel, IntId, IntSel, StrategyRef, TriId};

#[derive(Default)]
pub struct IcmState {
    pub triangle: Option<TriId>,
    /// Current configuration of the extended sub-state.
    pub nmc: Config,
    /// Goal configuration of the extended sub-state.
    pub nmf: Config,
    pub gradient: f64,
    /// Last committed relocation strategy.
    pub recent: Option<IcmId>,
    /// The relocation currently pursued.
    pub cur: Option<IcmSel>,
    /// Planned remaining path strategies.
    pub priors: Vec<IntSel>,
    /// Path strategies executed in the current streak.
    pub posteriors: Vec<IntId>,
    /// Whether the previous downstream tick wanted to continue.
    pub prev: bool,
    /// Snapshot before the current streak.
    pub before: Config,
    /// Configurations visited within the current attempt (pin slots only).
    pub seen: Vec<Config>,
    pub num_truncs: usize,
    /// Forces a full downstream rebuild on the next tick.
    pub hard_reload: bool,
}

impl Solver {
    /// Full rebuild of the stage's tasks from the main task.
    pub fn icm_load(&mut self) {
        self.icm_reload();
        self.icm.before = self.icm_task.config();
        let seen = self.icm_task.config();
        self.icm.seen.push(seen);
    }

    /// Re-synchronizes the stage's tasks with the main task.
    pub fn icm_reload(&mut self) {
        let tri = build_triangle_from_task(&mut self.cache, &self.main);
        let scope = self.cache.tri(tri).slots.clone();
        self.icm_task.reload(&self.main, &scope);
        self.icm_virt.reload(&self.main, &scope);
        self.icm.triangle = Some(tri);
        self.icm.nmc = self.icm_task.config();
        self.icm.nmf = self.icm_task.goal.clone();
    }

    /// One step of the stage: keep or pick a relocation, reload the
    /// interface below onto its tensoral scope, tick it, fold back.
    pub fn icm_do(&mut self, top_down: Option<IcmId>) -> Outcome {
        self.icm_select(top_down);
        // the interface works on the tensoral triangle of the pursued move
        let tri = match &self.icm.cur {
            Some(IcmSel::Known(id)) => Some(self.cache.icm(*id).mv.tensoral),
            Some(IcmSel::New { tensoral, .. }) => Some(*tensoral),
            None => self.icm.triangle,
        };
        if self.icm.hard_reload {
            self.int_load(TaskRef::Icm, tri);
        } else {
            self.int_reload(TaskRef::Icm, tri);
        }
        self.icm.hard_reload = false;

        let strategy = if !self.icm.prev {
            self.icm.priors.first().cloned()
        } else {
            None
        };
        self.log.record("icm", "before", "task", self.icm_task.log_value());
        let out = self.int_do(strategy.as_ref());
        self.icm.prev = out == Outcome::Continue;
        // propagate the new configuration bottom-up
        self.icm.gradient = self.int_task.config().distance(&self.icm.before, &self.problem);
        self.icm_task.update(&self.int_task);
        self.icm.nmc = self.icm_task.config();
        self.log.record("icm", "after", "task", self.icm_task.log_value());
        if out == Outcome::Continue {
            return Outcome::Continue;
        }
        if out != Outcome::DeadEnd {
            if let Some(used) = self.int.recent {
                // a relocation whose top-down path failed will fail the same
                // way again: truncate the whole attempt, ask upstream
                if self.icm.priors.is_empty() && self.icm.posteriors.contains(&used) {
                    self.icm_truncate(false);
                    return Outcome::Yield;
                }
                self.icm.posteriors.push(used);
                if self.icm.priors.len() > 1 && self.icm_prior_matches(used) {
                    self.icm.priors.remove(0);
                    return Outcome::Continue;
                }
            }
        }
        self.icm_evaluate(out)
    }

    fn icm_prior_matches(&self, used: IntId) -> bool {
        match &self.icm.priors[0] {
            IntSel::Known(id) => *id == used,
            IntSel::New(mv) => self.cache.int(used).mv == *mv,
        }
    }

    fn icm_evaluate(&mut self, below: Outcome) -> Outcome {
        // the interface reached its sub-goal
        if below == Outcome::Done {
            self.icm_store();
            if self.icm_is_final() {
                return Outcome::Done;
            }
            return Outcome::Continue;
        }
        // a streak that moved the metric into an unseen state closes
        if !self.icm.posteriors.is_empty() && self.icm.gradient != 0.0 && !self.icm_seen(&self.icm.nmc.clone()) {
            self.icm_store();
            return Outcome::Yield;
        }
        if self.icm.posteriors.len() >= self.params.max_moves_icm {
            self.icm_truncate(false);
            return Outcome::Continue;
        }
        if below == Outcome::DeadEnd {
            self.icm_truncate(true);
            self.icm.num_truncs = 0;
            self.icm.seen.clear();
            return Outcome::DeadEnd;
        }
        if self.icm.num_truncs + 1 >= self.params.max_truncs_icm {
            self.icm_truncate(true);
            self.icm.num_truncs = 0;
            self.icm.seen.clear();
            return Outcome::DeadEnd;
        }
        self.icm_truncate(false);
        Outcome::Continue
    }

    pub fn icm_is_final(&mut self) -> bool {
        if self.icm.nmf.slots.is_empty() {
            return false;
        }
        let dist = self.icm.nmf.distance(&self.icm_task.config(), &self.problem);
        self.log.record("icm", "after", "distance", dist.into());
        dist == 0.0
    }

    fn icm_seen(&self, cfg: &Config) -> bool {
        self.icm.seen.iter().any(|s| s.eq_pins(cfg, &self.problem))
    }

    /// Commits the executed path strategies as a relocation strategy over
    /// the triangle of the current task.
    fn icm_store(&mut self) {
        if self.icm.posteriors.is_empty() {
            self.icm.recent = None;
            return;
        }
        let conceptual = self.icm.posteriors.clone();
        let tensoral = build_triangle_from_task(&mut self.cache, &self.icm_task);
        let id = self.cache.intern_icm(IcmMove { tensoral, conceptual });
        debug!(strategy = %self.cache.icm(id).name, "relocation closed");
        self.icm.before = self.icm_task.config();
        let seen = self.icm_task.config();
        self.icm.seen.push(seen);
        self.icm.recent = Some(id);
        self.icm.cur = None;
        self.icm.priors.clear();
        self.icm.posteriors.clear();
        self.int.blocked.clear();
        self.icm.num_truncs = 0;
    }

    /// Abandons the current streak. A soft truncation blocks the first path
    /// strategy of the failed attempt; a hard one forces the downstream
    /// rebuild. Either way the interface steps back one completed path.
    fn icm_truncate(&mut self, hard: bool) {
        self.icm.num_truncs += 1;
        if !hard && !self.icm.posteriors.is_empty() {
            self.int.blocked.push(self.icm.posteriors[0]);
        }
        if !self.icm.posteriors.is_empty() {
            let before = self.icm.before.clone();
            self.icm_task.restore(&before);
            self.icm.hard_reload = hard;
            self.icm.gradient = 0.0;
            self.icm.recent = None;
            self.icm.cur = None;
            self.icm.priors.clear();
            self.icm.posteriors.clear();
        }
        self.int.recent_moves.pop();
        self.int.recent = self.int.recent_moves.last().copied();
        self.int.cur = None;
    }

    /// Selects the relocation to pursue: top-down adoption, a probed
    /// strategy from memory, or a fresh random one.
    fn icm_select(&mut self, top_down: Option<IcmId>) {
        if let Some(td) = top_down {
            self.icm_store();
            self.icm.priors = self
                .cache
                .icm(td)
                .mv
                .conceptual
                .iter()
                .map(|&i| IntSel::Known(i))
                .collect();
            self.icm.cur = Some(IcmSel::Known(td));
            self.icm.posteriors.clear();
            return;
        }
        if self.icm.prev {
            return;
        }
        if !self.icm.priors.is_empty() {
            return;
        }
        let mut it = 0;
        loop {
            if it == self.params.max_recs_icm {
                self.icm.cur = None;
                self.icm.priors.clear();
                return;
            }
            if !self.rng.random_bool(self.params.prob_redo_icm) {
                // memory scan in ascending score order
                let cfg = self.icm_task.config();
                let prev = self.icm.recent.map(StrategyRef::Icm);
                let ids = (0..self.cache.icms.len())
                    .map(IcmId::from)
                    .sorted_by_key(|&i| self.cache.icm(i).score);
                let triangle = self.icm.triangle.expect("stage is loaded");
                let mut adopted = false;
                for id in ids {
                    if !self.applies(&cfg, prev, StrategyRef::Icm(id)) {
                        continue;
                    }
                    let tensoral = self.cache.icm(id).mv.tensoral;
                    let inside = {
                        let tri = self.cache.tri(triangle);
                        self.cache.tri(tensoral).slots.iter().all(|&s| tri.contains(s))
                    };
                    if !inside {
                        continue;
                    }
                    // probe the whole conceptual sequence on the virtual tasks
                    let scope = self.cache.tri(tensoral).slots.clone();
                    self.int_virt.reload(&self.icm_task, &scope);
                    let conceptual = self.cache.icm(id).mv.conceptual.clone();
                    let ok = conceptual.iter().all(|&im| {
                        let sel = IntSel::Known(im);
                        self.int_probe(&sel)
                    });
                    if !ok {
                        continue;
                    }
                    self.icm.priors = conceptual.into_iter().map(IntSel::Known).collect();
                    self.icm.cur = Some(IcmSel::Known(id));
                    adopted = true;
                    break;
                }
                if adopted {
                    return;
                }
            }
            match self.icm_new_move() {
                None => {
                    self.icm.cur = None;
                    self.icm.priors.clear();
                    return;
                }
                Some((tensoral, conceptual)) => {
                    let cfg = self.icm_task.config();
                    let prev = self.icm.recent.map(StrategyRef::Icm);
                    // resolvable candidates are checked against the learned
                    // conditions; a truly new sequence trivially applies
                    let resolved: Option<Vec<IntId>> = conceptual
                        .iter()
                        .map(|sel| match sel {
                            IntSel::Known(id) => Some(*id),
                            IntSel::New(mv) => self.cache.find_int(mv),
                        })
                        .collect();
                    let acceptable = match resolved {
                        Some(ids) => match self.cache.find_icm(&IcmMove { tensoral, conceptual: ids }) {
                            Some(id) => self.applies(&cfg, prev, StrategyRef::Icm(id)),
                            None => true,
                        },
                        None => true,
                    };
                    if !acceptable {
                        it += 1;
                        continue;
                    }
                    self.icm.priors = conceptual.clone();
                    self.icm.cur = Some(IcmSel::New { tensoral, conceptual });
                    return;
                }
            }
        }
    }

    /// Synthesizes a fresh relocation: a random slot subset as the tensoral
    /// triangle plus a random path sequence over it.
    fn icm_new_move(&mut self) -> Option<(TriId, Vec<IntSel>)> {
        let tensoral = self.icm_random_triangle()?;
        let scope = self.cache.tri(tensoral).slots.clone();
        self.int_virt.reload(&self.icm_task, &scope);
        let conceptual = self.icm_build_random_path(tensoral);
        if conceptual.is_empty() {
            return None;
        }
        Some((tensoral, conceptual))
    }

    /// A random non-empty subset of the stage's slots, at least one of
    /// which holds an object.
    fn icm_random_triangle(&mut self) -> Option<TriId> {
        let slots: Vec<SlotId> = self.icm_task.scope().to_vec();
        if slots.iter().all(|&s| self.icm_task.holds(s).is_empty()) {
            return None;
        }
        loop {
            let size = self.rng.random_range(1..=slots.len());
            let mut sample = slots.clone();
            for i in (1..sample.len()).rev() {
                let j = self.rng.random_range(0..=i);
                sample.swap(i, j);
            }
            sample.truncate(size);
            if sample.iter().all(|&s| self.icm_task.holds(s).is_empty()) {
                continue;
            }
            let tri = crate::config::Triangle::canonical(&self.problem, sample);
            return Some(self.cache.intern_triangle(tri));
        }
    }

    /// Objects already placed as in the goal configuration (same slot and
    /// same layer).
    fn icm_final_objects(&self) -> Vec<ObjId> {
        let mut placed = Vec::new();
        for fslot in &self.icm.nmf.slots {
            if fslot.holds.is_empty() {
                continue;
            }
            for (i, &obj) in self.icm_task.holds(fslot.slot).iter().enumerate() {
                if fslot.holds.get(i) == Some(&obj) {
                    placed.push(obj);
                }
            }
        }
        placed
    }

    /// Builds a random sequence of path strategies over the triangle: each
    /// step relocates an object not yet touched and not already in its goal
    /// position, probed against the virtual tasks; the sequence closes when
    /// every object of the triangle is touched or already placed.
    fn icm_build_random_path(&mut self, tensoral: TriId) -> Vec<IntSel> {
        let scope = self.cache.tri(tensoral).slots.clone();
        let mut avail: Vec<IntId> = (0..self.cache.ints.len()).map(IntId::from).collect();
        let mut moves: Vec<IntSel> = Vec::new();
        let mut touched: Vec<Movable> = Vec::new();
        let mut it = 0usize;
        let mut jt = 0usize;
        loop {
            if jt == self.params.max_recs_icm {
                return Vec::new();
            }
            if it == self.params.max_moves_icm {
                self.int_virt.reload(&self.icm_task, &scope);
                moves.clear();
                touched.clear();
                it = 0;
                jt += 1;
                continue;
            }
            if avail.is_empty() {
                return Vec::new();
            }
            let all_objs: Vec<ObjId> = scope
                .iter()
                .flat_map(|&s| self.icm_task.holds(s).iter().copied())
                .collect();
            let placed = self.icm_final_objects();
            let covered = |o: &ObjId| touched.contains(&Movable::Object(*o)) || placed.contains(o);
            if all_objs.iter().all(covered) {
                return moves;
            }
            // pick an occupied slot of the triangle and a path from it
            let occupied: Vec<SlotId> = scope
                .iter()
                .copied()
                .filter(|&s| !self.icm_task.holds(s).is_empty())
                .collect();
            if occupied.is_empty() {
                return moves;
            }
            let slot_in = occupied[self.rng.random_range(0..occupied.len())];
            let vcfg = self.int_virt.config();
            let prev = moves.last().and_then(|sel| match sel {
                IntSel::Known(id) => Some(StrategyRef::Int(*id)),
                IntSel::New(mv) => self.cache.find_int(mv).map(StrategyRef::Int),
            });
            let prev_resolvable = moves.is_empty() || prev.is_some();
            let applicable: Vec<IntId> = avail
                .iter()
                .copied()
                .filter(|&id| self.cache.int(id).mv.slot_in == slot_in)
                .filter(|&id| !prev_resolvable || self.applies(&vcfg, prev, StrategyRef::Int(id)))
                .collect();
            let pick: IntSel = if !applicable.is_empty() {
                IntSel::Known(applicable[self.rng.random_range(0..applicable.len())])
            } else {
                match self.icm_make_move() {
                    Some(sel) => sel,
                    None => {
                        jt += 1;
                        continue;
                    }
                }
            };
            // the payloads this move touches
            let mut objs: Vec<Movable> = Vec::new();
            for m in pick.lct_moves(&self.cache) {
                let mv = self.cache.lct(m).mv.movable;
                if !objs.contains(&mv) {
                    objs.push(mv);
                }
            }
            if objs.iter().any(|m| touched.contains(m)) {
                jt += 1;
                continue;
            }
            if objs.iter().any(|m| matches!(m, Movable::Object(o) if placed.contains(o))) {
                jt += 1;
                continue;
            }
            let before = self.int_virt.config();
            if !self.int_probe(&pick) {
                self.int_virt.restore(&before);
                jt += 1;
                continue;
            }
            touched.extend(objs);
            if let IntSel::Known(id) = pick {
                avail.retain(|&x| x != id);
            }
            moves.push(pick);
            it += 1;
            jt += 1;
        }
    }

    /// Asks the interface's own selector for a fresh path strategy.
    fn icm_make_move(&mut self) -> Option<IntSel> {
        for _ in 0..self.params.max_recs_icm {
            self.int_select(None);
            if self.int.cur.is_none() {
                continue;
            }
            let sel = self.int.cur.take();
            self.int.priors.clear();
            return sel;
        }
        None
    }

    /// Probes a whole goal-level strategy: every relocation's conceptual
    /// sequence, each over its own tensoral scope of the stage's virtual
    /// task.
    pub fn icm_probe_ic(&mut self, id: crate::strategy::ScmId) -> bool {
        let ways = self.cache.scm(id).mv.moves.clone();
        for way in ways {
            let scope = {
                let tens = self.cache.icm(way).mv.tensoral;
                self.cache.tri(tens).slots.clone()
            };
            self.int_virt.reload(&self.icm_virt, &scope);
            let conceptual = self.cache.icm(way).mv.conceptual.clone();
            for im in conceptual {
                if !self.int_probe(&IntSel::Known(im)) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Problem;
    use crate::testing::hanoi_spec;

    fn solver() -> Solver {
        let (p, params) = Problem::from_json_str(&hanoi_spec(1, 100)).unwrap();
        let mut s = Solver::new(p, params, 23);
        s.load(None).unwrap();
        s
    }

    #[test]
    fn random_triangles_hold_at_least_one_object() {
        let mut s = solver();
        for _ in 0..20 {
            let tri = s.icm_random_triangle().expect("main task holds objects");
            let slots = s.cache.tri(tri).slots.clone();
            assert!(!slots.is_empty());
            assert!(slots.iter().any(|&sl| !s.icm_task.holds(sl).is_empty()));
        }
    }

    #[test]
    fn final_objects_track_slot_and_layer() {
        let mut s = solver();
        // nothing is in goal position at the start
        assert!(s.icm_final_objects().is_empty());
        // moving the whole tower to pc by hand puts all three in place
        let p = s.problem.clone();
        let goal = s.main.goal.clone();
        s.main.restore(&goal);
        s.icm_reload();
        let placed = s.icm_final_objects();
        assert_eq!(placed.len(), 3);
        let pc = p.slot_id("pc").unwrap();
        assert!(placed.iter().all(|&o| s.icm_task.object_at(o) == Some(pc)));
    }

    #[test]
    fn a_closed_streak_interns_a_relocation() {
        let mut s = solver();
        let mut done = false;
        for _ in 0..2000 {
            let out = s.icm_do(None);
            if !s.cache.icms.is_empty() {
                done = true;
                break;
            }
            if out == Outcome::Done {
                done = true;
                break;
            }
        }
        assert!(done, "stage never closed a relocation");
        if let Some(way) = s.cache.icms.first() {
            // the tensoral triangle names slots of the base task
            let tri = &s.cache.tris[way.mv.tensoral.idx()].1;
            assert!(!tri.slots.is_empty());
            for &sl in &tri.slots {
                assert!(sl.idx() < s.problem.slots.len());
            }
            // the conceptual members resolve in the path collection
            for &im in &way.mv.conceptual {
                assert!(im.idx() < s.cache.ints.len());
            }
            assert!(way.symbolic.is_empty());
        }
    }
}
