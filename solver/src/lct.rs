//! L1: primitive-move selection.
//!
//! One tick either applies a top-down move, replays a learned move that was
//! not tried in the current slice, or synthesizes a random new move within
//! its recursion budget. A rejected move is retried with a different pick
//! inside the same tick; only success commits the move to the cache.

use rand::Rng;

use crate::problem::{Binding, HandleId, Modulate, Movable, SlotId};
use crate::solver::{Solver, TaskRef};
use crate::strategy::{LctId, LctMove};

#[derive(Default)]
pub struct LctState {
    /// Last move committed in real mode.
    pub recent: Option<LctId>,
    /// Moves tried in the current outer slice; cleared by a top-down pick.
    pub recent_moves: Vec<LctMove>,
    /// Moves blocked top-down by the internal interface.
    pub blocked: Vec<LctId>,
}

#[derive(Clone, Copy)]
enum LctPick {
    Known(LctId),
    New(LctMove),
}

impl Solver {
    /// Runs one primitive-move step against the given task. In probe mode
    /// the move is applied without committing or retrying.
    pub fn lct_do(&mut self, top_down: Option<LctId>, task: TaskRef, probe: bool) -> bool {
        let mut top_down = top_down;
        loop {
            let Some(pick) = self.lct_select(task, top_down.take()) else {
                return false;
            };
            let mv = match pick {
                LctPick::Known(id) => self.cache.lct(id).mv,
                LctPick::New(mv) => mv,
            };
            let ok = self.task_mut(task).apply(mv.handle, mv.slot_in, mv.movable, mv.slot_out);
            if probe {
                return ok;
            }
            if !ok {
                // retry with a different pick within the same tick
                continue;
            }
            let id = match pick {
                LctPick::Known(id) => id,
                LctPick::New(mv) => self.cache.intern_lct(mv),
            };
            self.lct.recent = Some(id);
            self.lct.recent_moves.push(mv);
            let name = self.cache.lct(id).name.clone();
            self.log.record("lct", "used", "strategy", name.into());
            return true;
        }
    }

    fn lct_select(&mut self, task: TaskRef, top_down: Option<LctId>) -> Option<LctPick> {
        if let Some(id) = top_down {
            // a fresh top-down pick opens a new slice
            self.lct.recent_moves.clear();
            return Some(LctPick::Known(id));
        }
        if !self.rng.random_bool(self.params.prob_redo_lct) {
            let mut found = None;
            for (i, s) in self.cache.lcts.iter().enumerate() {
                let id = LctId::from(i);
                if self.lct.recent_moves.contains(&s.mv) || self.lct.blocked.contains(&id) {
                    continue;
                }
                found = Some((id, s.mv));
                break;
            }
            if let Some((id, mv)) = found {
                self.lct.recent_moves.push(mv);
                return Some(LctPick::Known(id));
            }
        }
        self.lct_synthesize(task)
    }

    /// Synthesizes a random move that is neither cached, recent nor
    /// blocked. Synthesis never returns an existing move.
    fn lct_synthesize(&mut self, task: TaskRef) -> Option<LctPick> {
        if self.problem.handles.is_empty() {
            return None;
        }
        for _ in 0..self.params.max_recs_lct {
            let h = HandleId::from(self.rng.random_range(0..self.problem.handles.len()));
            let Some(movable) = self.lct_pick_movable(task, h) else {
                continue;
            };
            let Some(slot_in) = self.task(task).slot_of(movable) else {
                continue;
            };
            let terminal = self.problem.handle(h).terminal;
            let Some(slot_out) = self.lct_pick_slot(task, terminal, Some(slot_in)) else {
                continue;
            };
            let mv = LctMove { handle: h, slot_in, movable, slot_out };
            if self.cache.find_lct(&mv).is_some()
                || self.lct.recent_moves.contains(&mv)
                || self.lct.blocked.iter().any(|&b| self.cache.lct(b).mv == mv)
            {
                continue;
            }
            self.lct.recent_moves.push(mv);
            return Some(LctPick::New(mv));
        }
        None
    }

    /// A random payload for the handle: an object from a slot matching the
    /// handle's origin, or the channel slot the handle names.
    fn lct_pick_movable(&mut self, task: TaskRef, h: HandleId) -> Option<Movable> {
        match self.problem.handle(h).modulate {
            Modulate::Object => {
                let initial = self.problem.handle(h).initial;
                let slot = self.lct_pick_slot(task, initial, None)?;
                let n = self.task(task).holds(slot).len();
                if n == 0 {
                    return None;
                }
                let k = self.rng.random_range(0..n);
                Some(Movable::Object(self.task(task).holds(slot)[k]))
            }
            Modulate::Channel(c) => {
                if self.task(task).in_scope(c) && self.problem.slot(c).is_movable {
                    Some(Movable::Channel(c))
                } else {
                    None
                }
            }
        }
    }

    /// A random slot matching the binding; a binding that names a channel
    /// slot resolves to it directly.
    fn lct_pick_slot(&mut self, task: TaskRef, binding: Binding, exclude: Option<SlotId>) -> Option<SlotId> {
        if let Binding::Slot(s) = binding {
            if self.task(task).in_scope(s) && self.problem.slot_has_type(s, "channel") {
                return Some(s);
            }
        }
        let candidates: Vec<SlotId> = match binding {
            Binding::Type(t) => self
                .task(task)
                .scope()
                .iter()
                .copied()
                .filter(|&s| self.problem.slot(s).ty == t)
                .filter(|&s| exclude != Some(s))
                .collect(),
            Binding::Slot(_) => Vec::new(),
        };
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[self.rng.random_range(0..candidates.len())])
    }
}
