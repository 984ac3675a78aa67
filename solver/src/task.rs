//! The mutable world state and the primitive (reversible) move kinds.
//!
//! A `Task` is a view over the shared problem arena: a slot subset (the
//! scope, i.e. the triangle of the owning layer), the held objects per slot,
//! the current slot of every object and the current position of every
//! movable slot, plus the init/goal snapshots restricted to the scope.
//!
//! `apply` either commits an entire move and records an undo event, or
//! leaves the task untouched and reports `false`. Rejection is a normal
//! signal, never an error. Layer-level rollback goes through canonical
//! snapshots ([`Task::snapshot`] / [`Task::restore`]).

use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::{Config, ConfigSlot};
use crate::problem::{Binding, HandleId, Modulate, Movable, ObjId, Problem, SlotId};

/// One committed primitive move, journaled for undo.
#[derive(Clone, Copy, Debug)]
enum Event {
    Moved { obj: ObjId, from: SlotId, to: SlotId },
    Shifted { chan: SlotId, from: SlotId, to: SlotId },
}

#[derive(Clone)]
pub struct Task {
    base: Arc<Problem>,
    /// Member slots, ascending by id (which is input order).
    scope: Vec<SlotId>,
    /// Held objects per slot, indexed by slot id; empty outside the scope.
    holds: Vec<Vec<ObjId>>,
    /// Current slot per object; `None` for objects outside the scope.
    obj_at: Vec<Option<SlotId>>,
    /// Current position per movable slot; `None` for fixed slots.
    chan_at: Vec<Option<SlotId>>,
    /// Initial contents, restricted to the scope.
    pub init: Config,
    /// Goal contents, restricted to the scope.
    pub goal: Config,
    journal: Vec<Event>,
}

impl Task {
    /// A full-scope task in the problem's initial state.
    pub fn new(base: Arc<Problem>) -> Task {
        let n_slots = base.slots.len();
        let n_objs = base.objects.len();
        let mut task = Task {
            scope: base.all_slot_ids().collect(),
            holds: vec![Vec::new(); n_slots],
            obj_at: vec![None; n_objs],
            chan_at: vec![None; n_slots],
            init: base.initial.clone(),
            goal: base.goal.clone(),
            base,
            journal: Vec::new(),
        };
        let init = task.init.clone();
        task.restore(&init);
        task
    }

    pub fn base(&self) -> &Problem {
        &self.base
    }

    pub fn scope(&self) -> &[SlotId] {
        &self.scope
    }

    pub fn in_scope(&self, s: SlotId) -> bool {
        self.scope.binary_search(&s).is_ok()
    }

    pub fn holds(&self, s: SlotId) -> &[ObjId] {
        &self.holds[s.idx()]
    }

    pub fn object_at(&self, o: ObjId) -> Option<SlotId> {
        self.obj_at[o.idx()]
    }

    pub fn channel_at(&self, c: SlotId) -> Option<SlotId> {
        self.chan_at[c.idx()]
    }

    pub fn has_object(&self, o: ObjId) -> bool {
        self.obj_at[o.idx()].is_some()
    }

    /// Current slot of a movable payload.
    pub fn slot_of(&self, m: Movable) -> Option<SlotId> {
        match m {
            Movable::Object(o) => self.object_at(o),
            Movable::Channel(c) => self.channel_at(c),
        }
    }

    /// First scope slot holding anything, in input order.
    pub fn find_filled_slot(&self) -> Option<SlotId> {
        self.scope.iter().copied().find(|s| !self.holds[s.idx()].is_empty())
    }

    /// Rebuilds this task as a scoped view of `upstream`.
    pub fn reload(&mut self, upstream: &Task, scope: &[SlotId]) {
        self.base = upstream.base.clone();
        self.scope = scope.iter().copied().filter(|&s| upstream.in_scope(s)).collect();
        self.scope.sort();
        self.scope.dedup();
        self.holds.iter_mut().for_each(Vec::clear);
        self.obj_at.iter_mut().for_each(|o| *o = None);
        self.chan_at.iter_mut().for_each(|c| *c = None);
        for &s in &self.scope {
            self.holds[s.idx()] = upstream.holds[s.idx()].clone();
            for &o in &self.holds[s.idx()] {
                self.obj_at[o.idx()] = Some(s);
            }
            self.chan_at[s.idx()] = upstream.chan_at[s.idx()];
        }
        self.init = upstream.init.restrict(&self.scope);
        self.goal = upstream.goal.restrict(&self.scope);
        self.journal.clear();
    }

    /// Copies the positions of a smaller (scoped) task back into this one.
    pub fn update(&mut self, smaller: &Task) {
        for &s in &smaller.scope {
            self.holds[s.idx()] = smaller.holds[s.idx()].clone();
            for &o in &self.holds[s.idx()] {
                self.obj_at[o.idx()] = Some(s);
            }
            if self.base.slot(s).is_movable {
                self.chan_at[s.idx()] = smaller.chan_at[s.idx()];
            }
        }
    }

    /// Canonical contents of the current state.
    pub fn config(&self) -> Config {
        Config::canonical(
            &self.base,
            self.scope.iter().map(|&s| ConfigSlot {
                slot: s,
                at: if self.base.slot(s).is_movable { self.chan_at[s.idx()] } else { None },
                holds: self.holds[s.idx()].clone(),
            }),
        )
    }

    pub fn snapshot(&self) -> Config {
        self.config()
    }

    /// Resets slot contents to a configuration over (a subset of) the scope.
    pub fn restore(&mut self, cfg: &Config) {
        for cs in &cfg.slots {
            for &o in &self.holds[cs.slot.idx()] {
                self.obj_at[o.idx()] = None;
            }
            self.holds[cs.slot.idx()].clear();
        }
        for cs in &cfg.slots {
            self.holds[cs.slot.idx()] = cs.holds.clone();
            for &o in &cs.holds {
                self.obj_at[o.idx()] = Some(cs.slot);
            }
            if self.base.slot(cs.slot).is_movable {
                self.chan_at[cs.slot.idx()] = cs.at;
            }
        }
        self.journal.clear();
    }

    /// Slot contents in loggable form.
    pub fn log_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        for &s in &self.scope {
            let names: Vec<String> = self.holds[s.idx()]
                .iter()
                .map(|&o| self.base.object(o).name.clone())
                .collect();
            map.insert(self.base.slot(s).name.clone(), json!(names));
        }
        Value::Object(map)
    }

    // --------------------------------------------------------------------
    // Primitive moves

    /// Applies one primitive move. Success commits the whole move and
    /// journals it; failure leaves the task unchanged.
    pub fn apply(&mut self, handle: HandleId, slot_in: SlotId, movable: Movable, slot_out: SlotId) -> bool {
        if !self.in_scope(slot_in) || !self.in_scope(slot_out) {
            return false;
        }
        match (self.base.handle(handle).modulate, movable) {
            (Modulate::Object, Movable::Object(obj)) => self.apply_object(handle, slot_in, obj, slot_out),
            (Modulate::Channel(_), Movable::Channel(chan)) => self.apply_channel(handle, slot_in, chan, slot_out),
            _ => false,
        }
    }

    fn apply_object(&mut self, handle: HandleId, slot_in: SlotId, obj: ObjId, slot_out: SlotId) -> bool {
        let p = self.base.clone();
        let h = p.handle(handle);
        let out = p.slot(slot_out);
        if !self.has_object(obj) {
            return false;
        }
        // a position slot never holds objects directly
        if p.slot_has_type(slot_out, "pos") {
            return false;
        }
        if self.holds[slot_out.idx()].len() >= out.capacity {
            return false;
        }
        // the handle must couple to the output slot
        match h.terminal {
            Binding::Slot(s) if s != slot_out => return false,
            Binding::Type(t) if t != out.ty => return false,
            _ => {}
        }
        // gradient constraints against the topmost held object
        if let Some(&top) = self.holds[slot_out.idx()].last() {
            for prop in &out.gradient_asc {
                if p.prop(top, prop) >= p.prop(obj, prop) {
                    return false;
                }
            }
            for prop in &out.gradient_desc {
                if p.prop(top, prop) <= p.prop(obj, prop) {
                    return false;
                }
            }
        }
        // sum constraints at the output slot (only once it holds something)
        if !self.holds[slot_out.idx()].is_empty() {
            for prop in &out.no_neg_sum {
                if self.prop_sum(slot_out, prop, None) + p.prop(obj, prop) < 0.0 {
                    return false;
                }
            }
            for prop in &out.no_pos_sum {
                if self.prop_sum(slot_out, prop, None) + p.prop(obj, prop) > 0.0 {
                    return false;
                }
            }
        }
        // the object must sit on the requested input slot
        let myslot = match self.object_at(obj) {
            Some(s) => s,
            None => return false,
        };
        if myslot != slot_in {
            return false;
        }
        // the handle must couple to the input slot
        match h.initial {
            Binding::Slot(s) if s != myslot => return false,
            Binding::Type(t) if t != p.slot(myslot).ty => return false,
            _ => {}
        }
        // sum constraints at the input slot after removal
        let sin = p.slot(slot_in);
        if !self.holds[slot_in.idx()].is_empty() {
            for prop in &sin.no_neg_sum {
                if self.prop_sum(slot_in, prop, Some(obj)) < 0.0 {
                    return false;
                }
            }
            for prop in &sin.no_pos_sum {
                if self.prop_sum(slot_in, prop, Some(obj)) > 0.0 {
                    return false;
                }
            }
        }
        // an ordered slot releases only its topmost object
        if p.slot_ordered(slot_in) && self.holds[slot_in.idx()].last() != Some(&obj) {
            return false;
        }
        // a channel endpoint must be positioned at the other endpoint
        if p.slot_has_type(slot_out, "channel") && self.chan_at[slot_out.idx()] != sin.pos {
            return false;
        }
        if p.slot_has_type(slot_in, "channel") && self.chan_at[slot_in.idx()] != out.pos {
            return false;
        }
        // commit
        self.holds[slot_out.idx()].push(obj);
        self.holds[slot_in.idx()].retain(|&o| o != obj);
        self.obj_at[obj.idx()] = Some(slot_out);
        self.journal.push(Event::Moved { obj, from: slot_in, to: slot_out });
        true
    }

    fn apply_channel(&mut self, handle: HandleId, slot_in: SlotId, chan: SlotId, slot_out: SlotId) -> bool {
        let p = self.base.clone();
        let h = p.handle(handle);
        if !self.in_scope(chan) {
            return false;
        }
        if p.binding_name(h.initial) != "pos" || p.binding_name(h.terminal) != "pos" {
            return false;
        }
        if !p.slot_has_type(slot_out, "pos") {
            return false;
        }
        if !p.slot(chan).bound.contains(&slot_out) {
            return false;
        }
        let myslot = match self.channel_at(chan) {
            Some(s) => s,
            None => return false,
        };
        if !p.slot_has_type(myslot, "pos") {
            return false;
        }
        if myslot != slot_in {
            return false;
        }
        // commit
        self.chan_at[chan.idx()] = Some(slot_out);
        self.journal.push(Event::Shifted { chan, from: myslot, to: slot_out });
        true
    }

    /// Undoes the most recent committed move, if any.
    pub fn revert_last(&mut self) {
        let Some(event) = self.journal.pop() else { return };
        match event {
            Event::Moved { obj, from, to } => {
                debug_assert_eq!(self.holds[to.idx()].last(), Some(&obj));
                self.holds[to.idx()].retain(|&o| o != obj);
                self.holds[from.idx()].push(obj);
                self.obj_at[obj.idx()] = Some(from);
            }
            Event::Shifted { chan, from, .. } => {
                self.chan_at[chan.idx()] = Some(from);
            }
        }
    }

    fn prop_sum(&self, slot: SlotId, prop: &str, without: Option<ObjId>) -> f64 {
        self.holds[slot.idx()]
            .iter()
            .filter(|&&o| Some(o) != without)
            .map(|&o| self.base.prop(o, prop))
            .sum()
    }
}
