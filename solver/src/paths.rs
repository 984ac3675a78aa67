//! Shared path algorithms: the consecutiveness rule for primitive moves,
//! the repeated-window pattern detector, the two path reducers and the
//! triangle builders.

use itertools::Itertools;

use crate::cache::Cache;
use crate::config::Triangle;
use crate::problem::{Modulate, Movable, ObjId, Problem, SlotId};
use crate::strategy::{IcmId, IntId, IntMove, LctId, LctMove, TriId};
use crate::task::Task;

fn is_object_move(p: &Problem, mv: &LctMove) -> bool {
    matches!(p.handle(mv.handle).modulate, Modulate::Object)
}

/// Whether `cur` may follow `prev` inside one path. An object move hands
/// over to a channel move (and back) through the position slots bound to
/// its endpoint; two object moves must chain slot-to-slot on the same
/// payload.
pub fn are_consecutive(p: &Problem, prev: Option<&LctMove>, cur: &LctMove) -> bool {
    let Some(prev) = prev else { return true };
    let prev_obj = is_object_move(p, prev);
    let cur_obj = is_object_move(p, cur);
    if prev_obj && !cur_obj {
        return p.slot_has_type(cur.slot_in, "pos") && p.slot(prev.slot_out).bound.contains(&cur.slot_in);
    }
    if !prev_obj && cur_obj {
        return p.slot_has_type(prev.slot_out, "pos") && p.slot(cur.slot_in).bound.contains(&prev.slot_out);
    }
    prev.slot_out == cur.slot_in && prev.movable == cur.movable
}

/// Finds the smallest repeating window (size `min_len` up to half the
/// sequence) and returns the first one that occurs at least twice.
pub fn find_move_pattern<T: PartialEq + Clone>(moves: &[T], min_len: usize) -> Option<Vec<T>> {
    let max_len = moves.len().div_ceil(2);
    for size in min_len..=max_len {
        let windows: Vec<&[T]> = moves.windows(size).collect();
        for (i, w) in windows.iter().enumerate() {
            if windows.iter().skip(i + 1).any(|other| other == w) {
                return Some(w.to_vec());
            }
        }
    }
    None
}

/// Index of the first occurrence of the detected pattern, if any.
pub fn starts_loop<T: PartialEq + Clone>(moves: &[T], min_len: usize) -> Option<usize> {
    let pattern = find_move_pattern(moves, min_len)?;
    moves.windows(pattern.len()).position(|w| w == pattern)
}

/// Collapses futile four-move windows `a,b,c,d` where `a` is a channel move,
/// `a` and `d` share handle and payload, and `b`/`c` chain into each other.
/// The window is replaced by one synthesized (and interned) move from `a`'s
/// origin to `d`'s destination, until no window matches.
pub fn reduce_lct_moves(cache: &mut Cache, p: &Problem, mut moves: Vec<LctId>) -> Vec<LctId> {
    loop {
        if moves.len() < 4 {
            return moves;
        }
        let mut merged = None;
        for i in 0..=moves.len() - 4 {
            let a = cache.lct(moves[i]).mv;
            let b = cache.lct(moves[i + 1]).mv;
            let c = cache.lct(moves[i + 2]).mv;
            let d = cache.lct(moves[i + 3]).mv;
            if is_object_move(p, &a) || a.movable != d.movable || a.handle != d.handle || b.slot_out != c.slot_in {
                continue;
            }
            let id = cache.intern_lct(LctMove {
                handle: a.handle,
                slot_in: a.slot_in,
                movable: a.movable,
                slot_out: d.slot_out,
            });
            merged = Some((i, id));
            break;
        }
        match merged {
            Some((i, id)) => {
                moves.splice(i..i + 4, [id]);
            }
            None => return moves,
        }
    }
}

/// The unique non-channel object a path strategy touches, if there is
/// exactly one.
fn unique_object(cache: &Cache, id: IntId) -> Option<ObjId> {
    let mut found = None;
    for &m in &cache.int(id).mv.moves {
        if let Movable::Object(o) = cache.lct(m).mv.movable {
            match found {
                None => found = Some(o),
                Some(prev) if prev == o => {}
                Some(_) => return None,
            }
        }
    }
    found
}

fn touches_object(cache: &Cache, id: IntId, obj: ObjId) -> bool {
    cache
        .int(id)
        .mv
        .moves
        .iter()
        .any(|&m| cache.lct(m).mv.movable == Movable::Object(obj))
}

/// Whether the first and last strategy of a window relocate the same unique
/// object, untouched in between, with chaining endpoints.
fn can_merge_int(cache: &Cache, first: IntId, last: IntId, between: &[IntId]) -> bool {
    let Some(obj) = unique_object(cache, first) else { return false };
    if unique_object(cache, last) != Some(obj) {
        return false;
    }
    if between.iter().any(|&m| touches_object(cache, m, obj)) {
        return false;
    }
    cache.int(first).mv.slot_out == cache.int(last).mv.slot_in
}

/// Merges two path strategies into one interned strategy, collapsing the
/// concatenated primitive moves first.
pub fn merge_int(cache: &mut Cache, p: &Problem, first: IntId, last: IntId) -> IntId {
    let mut moves = cache.int(first).mv.moves.clone();
    moves.extend_from_slice(&cache.int(last).mv.moves);
    let moves = reduce_lct_moves(cache, p, moves);
    let slot_in = cache.lct(moves[0]).mv.slot_in;
    let slot_out = cache.lct(*moves.last().expect("merged path is never empty")).mv.slot_out;
    cache.intern_int(IntMove { slot_in, moves, slot_out })
}

fn reduce_int_moves(cache: &mut Cache, p: &Problem, mut moves: Vec<IntId>, size: usize) -> Vec<IntId> {
    loop {
        if moves.len() < size {
            return moves;
        }
        let mut merged = None;
        for i in 0..=moves.len() - size {
            let first = moves[i];
            let last = moves[i + size - 1];
            let between: Vec<IntId> = moves[i + 1..i + size - 1].to_vec();
            if !can_merge_int(cache, first, last, &between) {
                continue;
            }
            let m = merge_int(cache, p, first, last);
            merged = Some((i, m, between));
            break;
        }
        match merged {
            Some((i, m, between)) => {
                let mut next = moves[..i].to_vec();
                next.push(m);
                next.extend_from_slice(&between);
                next.extend_from_slice(&moves[i + size..]);
                moves = next;
            }
            None => return moves,
        }
    }
}

/// Optimizes a path of path strategies with growing windows up to
/// `precision`.
pub fn reduce_int_path(cache: &mut Cache, p: &Problem, mut moves: Vec<IntId>, precision: usize) -> Vec<IntId> {
    if precision <= 1 {
        return moves;
    }
    for size in 2..=precision {
        moves = reduce_int_moves(cache, p, moves, size);
    }
    moves
}

/// Flattens relocation strategies into the underlying path sequence.
pub fn build_int_path(cache: &Cache, posteriors: &[IcmId]) -> Vec<IntId> {
    posteriors
        .iter()
        .flat_map(|&w| cache.icm(w).mv.conceptual.clone())
        .collect()
}

/// The slots referenced by the given path strategies, closed under the
/// pin/pos neighborhood, interned as a triangle.
pub fn build_triangle_from_moves(cache: &mut Cache, task: &Task, int_moves: &[IntId]) -> TriId {
    let p = task.base();
    let mut slots: Vec<SlotId> = int_moves
        .iter()
        .flat_map(|&im| cache.int(im).mv.moves.clone())
        .flat_map(|lm| {
            let mv = cache.lct(lm).mv;
            [mv.slot_in, mv.slot_out]
        })
        .unique()
        .collect();
    // pins reachable from any included position slot
    let pins: Vec<SlotId> = task
        .scope()
        .iter()
        .copied()
        .filter(|&s| p.slot_has_type(s, "pin"))
        .collect();
    let poss: Vec<SlotId> = task
        .scope()
        .iter()
        .copied()
        .filter(|&s| p.slot_has_type(s, "pos"))
        .collect();
    let included_pos: Vec<SlotId> = slots.iter().copied().filter(|&s| p.slot_has_type(s, "pos")).collect();
    for &pin in &pins {
        if included_pos.iter().any(|q| p.slot(pin).bound.contains(q)) && !slots.contains(&pin) {
            slots.push(pin);
        }
    }
    // position slots bound to any included pin
    let included_pins: Vec<SlotId> = slots.iter().copied().filter(|&s| p.slot_has_type(s, "pin")).collect();
    for &q in &poss {
        if included_pins.iter().any(|&pin| p.slot(pin).bound.contains(&q)) && !slots.contains(&q) {
            slots.push(q);
        }
    }
    let tri = Triangle::canonical(p, slots);
    cache.intern_triangle(tri)
}

/// All slots of a task as an interned triangle.
pub fn build_triangle_from_task(cache: &mut Cache, task: &Task) -> TriId {
    let tri = Triangle::canonical(task.base(), task.scope().iter().copied());
    cache.intern_triangle(tri)
}
