//! The learned strategy kinds.
//!
//! Every layer commits its successful streaks as a strategy value; the cache
//! interns those values and mints their names. Equality is structural on the
//! payloads (children are themselves interned, so index equality is
//! structural equality one level down). Selection may produce candidates
//! that are not interned yet; those only become cache entries at the commit
//! points.

use serde_json::Value;

ref_id!(CfgId);
ref_id!(TriId);
ref_id!(LctId);
ref_id!(IntId);
ref_id!(IcmId);
ref_id!(ScmId);
ref_id!(CndId);

use crate::problem::{HandleId, Movable, SlotId};

/// A primitive move: handle, input slot, payload, output slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LctMove {
    pub handle: HandleId,
    pub slot_in: SlotId,
    pub movable: Movable,
    pub slot_out: SlotId,
}

/// A consecutive path of primitive moves ending on a destination slot.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IntMove {
    pub slot_in: SlotId,
    pub moves: Vec<LctId>,
    pub slot_out: SlotId,
}

/// One relocation step: a sub-problem scope (tensoral) plus the path
/// sequence (conceptual). The symbolic member is reserved and stays empty.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IcmMove {
    pub tensoral: TriId,
    pub conceptual: Vec<IntId>,
}

/// A goal-directed sequence of relocations, content-addressed by its
/// endpoint configurations.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ScmMove {
    pub conf_in: CfgId,
    pub moves: Vec<IcmId>,
    pub conf_out: CfgId,
}

#[derive(Clone, Debug)]
pub struct StrategyLct {
    pub name: String,
    pub mv: LctMove,
}

#[derive(Clone, Debug)]
pub struct StrategyInt {
    pub name: String,
    pub mv: IntMove,
    /// One point per primitive move.
    pub score: u32,
}

#[derive(Clone, Debug)]
pub struct ThreefoldWay {
    pub name: String,
    pub mv: IcmMove,
    /// Reserved third member; never populated in this revision.
    pub symbolic: Vec<Value>,
    /// Sum of the conceptual members' scores.
    pub score: u32,
}

#[derive(Clone, Debug)]
pub struct StrategyIc {
    pub name: String,
    pub mv: ScmMove,
    pub score: u32,
}

/// A strategy reference carrying its kind. Conditions compare these by tag
/// first, so strategies of different layers never match even with equal
/// payload fields.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StrategyRef {
    Lct(LctId),
    Int(IntId),
    Icm(IcmId),
    Scm(ScmId),
}

/// A selected path for the internal interface: either a cached strategy or
/// a fresh candidate that will only be interned if its streak commits.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum IntSel {
    Known(IntId),
    New(IntMove),
}

impl IntSel {
    pub fn lct_moves(&self, cache: &crate::cache::Cache) -> Vec<LctId> {
        match self {
            IntSel::Known(id) => cache.int(*id).mv.moves.clone(),
            IntSel::New(mv) => mv.moves.clone(),
        }
    }
}

/// A selected relocation for the first contextual stage.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum IcmSel {
    Known(IcmId),
    New {
        tensoral: TriId,
        conceptual: Vec<IntSel>,
    },
}
