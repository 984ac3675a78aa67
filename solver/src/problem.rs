//! Problem description: the JSON input model and the immutable arena built
//! from it.
//!
//! The arena is constructed once at load time and shared (behind an `Arc`)
//! by every task instance. All cross-references between entities are typed
//! indices; names only appear when reading the input or writing the cache.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;

use crate::config::{Config, ConfigSlot};

ref_id!(SlotTypeId);
ref_id!(ObjectTypeId);
ref_id!(SlotId);
ref_id!(ObjId);
ref_id!(HandleId);

/// A movable payload: either an object or a movable (channel) slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Movable {
    Object(ObjId),
    Channel(SlotId),
}

/// What a handle moves: an object, or the channel slot it names.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Modulate {
    Object,
    Channel(SlotId),
}

/// A handle endpoint bound either to a specific slot or to a slot type.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Binding {
    Slot(SlotId),
    Type(SlotTypeId),
}

#[derive(Clone, Debug)]
pub struct SlotType {
    pub name: String,
    pub layer_capacity: usize,
    pub ordered: bool,
    pub gradient_asc: Vec<String>,
    pub gradient_desc: Vec<String>,
    pub no_neg_sum: Vec<String>,
    pub no_pos_sum: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ObjectType {
    pub name: String,
    pub properties: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Handle {
    pub name: String,
    pub modulate: Modulate,
    pub initial: Binding,
    pub terminal: Binding,
}

/// Static description of a slot: its constraint sets are the slot type's,
/// overridden by the per-slot entries of the `constraints` block.
#[derive(Clone, Debug)]
pub struct SlotInfo {
    pub name: String,
    pub ty: SlotTypeId,
    pub score: f64,
    /// Position slot this slot sits on (destination slots of channel moves).
    pub pos: Option<SlotId>,
    /// Position slots reachable by this slot when it is movable.
    pub bound: Vec<SlotId>,
    pub is_movable: bool,
    pub capacity: usize,
    pub gradient_asc: Vec<String>,
    pub gradient_desc: Vec<String>,
    pub no_neg_sum: Vec<String>,
    pub no_pos_sum: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ObjInfo {
    pub name: String,
    pub ty: ObjectTypeId,
    pub props: Vec<(String, f64)>,
}

/// The immutable problem arena.
#[derive(Clone, Debug)]
pub struct Problem {
    pub slot_types: Vec<SlotType>,
    pub object_types: Vec<ObjectType>,
    pub handles: Vec<Handle>,
    pub slots: Vec<SlotInfo>,
    pub objects: Vec<ObjInfo>,
    /// Slot contents at the start of the run.
    pub initial: Config,
    /// Slot contents of the goal. Channel positions stay at their defaults.
    pub goal: Config,
}

impl Problem {
    pub fn slot(&self, s: SlotId) -> &SlotInfo {
        &self.slots[s.idx()]
    }

    pub fn object(&self, o: ObjId) -> &ObjInfo {
        &self.objects[o.idx()]
    }

    pub fn handle(&self, h: HandleId) -> &Handle {
        &self.handles[h.idx()]
    }

    pub fn slot_type(&self, t: SlotTypeId) -> &SlotType {
        &self.slot_types[t.idx()]
    }

    /// True iff the slot's type carries the given name ("pin", "pos", "channel", ...).
    pub fn slot_has_type(&self, s: SlotId, type_name: &str) -> bool {
        self.slot_type(self.slot(s).ty).name == type_name
    }

    pub fn slot_ordered(&self, s: SlotId) -> bool {
        self.slot_type(self.slot(s).ty).ordered
    }

    /// Numeric property of an object; absent properties count as zero.
    pub fn prop(&self, o: ObjId, name: &str) -> f64 {
        self.object(o)
            .props
            .iter()
            .find(|(p, _)| p == name)
            .map(|(_, v)| *v)
            .unwrap_or(0.0)
    }

    pub fn binding_name(&self, b: Binding) -> &str {
        match b {
            Binding::Slot(s) => &self.slot(s).name,
            Binding::Type(t) => &self.slot_type(t).name,
        }
    }

    pub fn slot_id(&self, name: &str) -> Option<SlotId> {
        self.slots.iter().position(|s| s.name == name).map(SlotId::from)
    }

    pub fn object_id(&self, name: &str) -> Option<ObjId> {
        self.objects.iter().position(|o| o.name == name).map(ObjId::from)
    }

    pub fn handle_id(&self, name: &str) -> Option<HandleId> {
        self.handles.iter().position(|h| h.name == name).map(HandleId::from)
    }

    /// A movable by name: slots shadow objects, as during input resolution.
    pub fn movable_id(&self, name: &str) -> Option<Movable> {
        if let Some(s) = self.slot_id(name) {
            return Some(Movable::Channel(s));
        }
        self.object_id(name).map(Movable::Object)
    }

    pub fn movable_name(&self, m: Movable) -> &str {
        match m {
            Movable::Object(o) => &self.object(o).name,
            Movable::Channel(s) => &self.slot(s).name,
        }
    }

    pub fn all_slot_ids(&self) -> impl Iterator<Item = SlotId> + '_ {
        (0..self.slots.len()).map(SlotId::from)
    }
}

// ------------------------------------------------------------------------
// Simulation parameters

/// Tuning block of the input file. Budgets bound every selection loop; the
/// `prob_redo_*` values are the probabilities of skipping the learned-memory
/// lookup of a layer and synthesizing a fresh move instead.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimParams {
    pub reset: u8,
    pub max_its: usize,
    pub max_moves_int: usize,
    pub max_moves_icm: usize,
    pub max_moves_scm: usize,
    pub max_recs_lct: usize,
    pub max_recs_int: usize,
    pub max_recs_icm: usize,
    pub max_truncs_int: usize,
    pub max_truncs_icm: usize,
    pub prob_redo_lct: f64,
    pub prob_redo_int: f64,
    pub prob_redo_icm: f64,
    pub size_pattern: usize,
    pub precision: usize,
}

impl SimParams {
    pub fn reset_cache(&self) -> bool {
        self.reset == 1
    }
}

// ------------------------------------------------------------------------
// JSON input model

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemSpec {
    pub object_types: Vec<ObjectTypeSpec>,
    pub slot_types: Vec<SlotTypeSpec>,
    pub handles: Vec<HandleSpec>,
    pub task: TaskSpec,
    pub simulation: SimParams,
}

#[derive(Debug, Deserialize)]
pub struct ObjectTypeSpec {
    pub name: String,
    pub properties: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotTypeSpec {
    pub name: String,
    pub number_of_layers: usize,
    pub ordered: u8,
    #[serde(default)]
    pub gradient_asc: Vec<String>,
    #[serde(default)]
    pub gradient_desc: Vec<String>,
    #[serde(default)]
    pub no_neg_sum: Vec<String>,
    #[serde(default)]
    pub no_pos_sum: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct HandleSpec {
    pub name: String,
    pub initial: String,
    #[serde(rename = "final")]
    pub terminal: String,
    pub modulate: String,
}

#[derive(Debug, Deserialize)]
pub struct ObjectSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    /// Remaining keys are the numeric property values of the object's type.
    #[serde(flatten)]
    pub properties: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
pub struct SlotSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub holds: Vec<String>,
    pub score: f64,
    #[serde(default)]
    pub pos: Option<String>,
    #[serde(default)]
    pub bound: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct StateSpec {
    pub name: String,
    pub holds: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaskSpec {
    pub objects: Vec<ObjectSpec>,
    pub slots: Vec<SlotSpec>,
    pub initial: Vec<StateSpec>,
    #[serde(rename = "final")]
    pub terminal: Vec<StateSpec>,
    #[serde(default)]
    pub constraints: Vec<BTreeMap<String, serde_json::Value>>,
}

// ------------------------------------------------------------------------
// Arena construction

/// Loads a problem description and its simulation block from a JSON file.
pub fn load_problem(path: &Path) -> Result<(Problem, SimParams)> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read problem file {}", path.display()))?;
    let spec: ProblemSpec = serde_json::from_str(&raw)
        .with_context(|| format!("invalid problem file {}", path.display()))?;
    let params = spec.simulation;
    let problem = Problem::from_spec(spec)?;
    Ok((problem, params))
}

impl Problem {
    pub fn from_json_str(raw: &str) -> Result<(Problem, SimParams)> {
        let spec: ProblemSpec = serde_json::from_str(raw).context("invalid problem description")?;
        let params = spec.simulation;
        Ok((Problem::from_spec(spec)?, params))
    }

    pub fn from_spec(spec: ProblemSpec) -> Result<Problem> {
        let slot_types: Vec<SlotType> = spec
            .slot_types
            .iter()
            .map(|t| SlotType {
                name: t.name.clone(),
                layer_capacity: t.number_of_layers,
                ordered: t.ordered == 1,
                gradient_asc: t.gradient_asc.clone(),
                gradient_desc: t.gradient_desc.clone(),
                no_neg_sum: t.no_neg_sum.clone(),
                no_pos_sum: t.no_pos_sum.clone(),
            })
            .collect();
        let object_types: Vec<ObjectType> = spec
            .object_types
            .iter()
            .map(|t| ObjectType {
                name: t.name.clone(),
                properties: t.properties.clone(),
            })
            .collect();

        let slot_type_id = |name: &str| -> Result<SlotTypeId> {
            slot_types
                .iter()
                .position(|t| t.name == name)
                .map(SlotTypeId::from)
                .with_context(|| format!("unknown slot type `{name}`"))
        };
        let object_type_id = |name: &str| -> Result<ObjectTypeId> {
            object_types
                .iter()
                .position(|t| t.name == name)
                .map(ObjectTypeId::from)
                .with_context(|| format!("unknown object type `{name}`"))
        };

        // objects
        let mut objects = Vec::new();
        for o in &spec.task.objects {
            let ty = object_type_id(&o.ty)?;
            let mut props = Vec::new();
            for p in &object_types[ty.idx()].properties {
                let v = o
                    .properties
                    .get(p)
                    .with_context(|| format!("object `{}` misses property `{p}`", o.name))?;
                props.push((p.clone(), *v));
            }
            objects.push(ObjInfo {
                name: o.name.clone(),
                ty,
                props,
            });
        }
        let object_id = |name: &str| -> Result<ObjId> {
            objects
                .iter()
                .position(|o| o.name == name)
                .map(ObjId::from)
                .with_context(|| format!("unknown object `{name}`"))
        };

        // slots, constraint sets inherited from the slot type
        let mut slots = Vec::new();
        for s in &spec.task.slots {
            let ty = slot_type_id(&s.ty)?;
            let t = &slot_types[ty.idx()];
            slots.push(SlotInfo {
                name: s.name.clone(),
                ty,
                score: s.score,
                pos: None,
                bound: Vec::new(),
                is_movable: false,
                capacity: t.layer_capacity,
                gradient_asc: t.gradient_asc.clone(),
                gradient_desc: t.gradient_desc.clone(),
                no_neg_sum: t.no_neg_sum.clone(),
                no_pos_sum: t.no_pos_sum.clone(),
            });
        }
        let slot_id = |slots: &[SlotInfo], name: &str| -> Result<SlotId> {
            slots
                .iter()
                .position(|s| s.name == name)
                .map(SlotId::from)
                .with_context(|| format!("unknown slot `{name}`"))
        };

        // link slots to one another
        for (i, s) in spec.task.slots.iter().enumerate() {
            let pos = match &s.pos {
                Some(p) => Some(slot_id(&slots, p)?),
                None => None,
            };
            let bound = s
                .bound
                .iter()
                .map(|b| slot_id(&slots, b))
                .collect::<Result<Vec<_>>>()?;
            let is_movable = bound.len() > 1;
            let slot = &mut slots[i];
            slot.pos = pos;
            slot.bound = bound;
            slot.is_movable = is_movable;
        }

        // per-slot constraint overrides
        for entry in &spec.task.constraints {
            for (key, overrides) in entry {
                if key == "name" {
                    continue;
                }
                let sid = slot_id(&slots, key)?;
                apply_overrides(&mut slots[sid.idx()], overrides)
                    .with_context(|| format!("invalid constraint override for slot `{key}`"))?;
            }
        }

        // handles
        let binding = |slots: &[SlotInfo], name: &str| -> Result<Binding> {
            if let Ok(s) = slot_id(slots, name) {
                return Ok(Binding::Slot(s));
            }
            Ok(Binding::Type(slot_type_id(name)?))
        };
        let mut handles = Vec::new();
        for h in &spec.handles {
            let modulate = if h.modulate == "object" {
                Modulate::Object
            } else {
                let s = slot_id(&slots, &h.modulate)
                    .with_context(|| format!("handle `{}` modulates neither an object nor a slot", h.name))?;
                Modulate::Channel(s)
            };
            handles.push(Handle {
                name: h.name.clone(),
                modulate,
                initial: binding(&slots, &h.initial)?,
                terminal: binding(&slots, &h.terminal)?,
            });
        }

        // default holds per slot, then goal = defaults + `final` overrides,
        // then initial = defaults + `initial` overrides
        let mut default_holds: Vec<Vec<ObjId>> = Vec::new();
        for s in &spec.task.slots {
            let holds = s
                .holds
                .iter()
                .map(|o| object_id(o))
                .collect::<Result<Vec<_>>>()?;
            default_holds.push(holds);
        }
        for holds in &default_holds {
            for (i, o) in holds.iter().enumerate() {
                ensure!(
                    !holds[..i].contains(o),
                    "object `{}` appears twice in a slot",
                    objects[o.idx()].name
                );
            }
        }

        let overridden = |base: &[Vec<ObjId>], entries: &[StateSpec]| -> Result<Vec<Vec<ObjId>>> {
            let mut holds = base.to_vec();
            for e in entries {
                let sid = slot_id(&slots, &e.name)?;
                holds[sid.idx()] = e.holds.iter().map(|o| object_id(o)).collect::<Result<Vec<_>>>()?;
            }
            Ok(holds)
        };
        let goal_holds = overridden(&default_holds, &spec.task.terminal)?;
        let initial_holds = overridden(&default_holds, &spec.task.initial)?;

        for (what, holds) in [("initial", &initial_holds), ("final", &goal_holds)] {
            let mut seen = vec![false; objects.len()];
            for h in holds {
                for o in h {
                    if seen[o.idx()] {
                        bail!("object `{}` held by two slots in the {what} state", objects[o.idx()].name);
                    }
                    seen[o.idx()] = true;
                }
            }
        }

        let problem = Problem {
            slot_types,
            object_types,
            handles,
            slots,
            objects,
            initial: Config::default(),
            goal: Config::default(),
        };
        // channel positions default to the first bound slot in both states
        let state = |holds: &[Vec<ObjId>]| -> Config {
            Config::canonical(
                &problem,
                problem.slots.iter().enumerate().map(|(i, s)| ConfigSlot {
                    slot: SlotId::from(i),
                    at: if s.is_movable { Some(s.bound[0]) } else { None },
                    holds: holds[i].clone(),
                }),
            )
        };
        let initial = state(&initial_holds);
        let goal = state(&goal_holds);
        Ok(Problem { initial, goal, ..problem })
    }
}

fn apply_overrides(slot: &mut SlotInfo, overrides: &serde_json::Value) -> Result<()> {
    let map = overrides
        .as_object()
        .context("constraint override must be an object")?;
    for (key, value) in map {
        match key.as_str() {
            "numberOfLayers" => {
                slot.capacity = value.as_u64().context("numberOfLayers must be an integer")? as usize
            }
            "score" => slot.score = value.as_f64().context("score must be a number")?,
            "gradientAsc" => slot.gradient_asc = string_list(value)?,
            "gradientDesc" => slot.gradient_desc = string_list(value)?,
            "noNegSum" => slot.no_neg_sum = string_list(value)?,
            "noPosSum" => slot.no_pos_sum = string_list(value)?,
            other => bail!("unsupported constraint key `{other}`"),
        }
    }
    Ok(())
}

fn string_list(value: &serde_json::Value) -> Result<Vec<String>> {
    let arr = value.as_array().context("expected a list of property names")?;
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(str::to_owned)
                .context("expected a property name")
        })
        .collect()
}
