//! Canonical configurations and triangles.
//!
//! A [`Config`] is the canonical serialization of slot contents: slots sorted
//! by name, each carrying its channel position (movable slots only) and its
//! held objects, sorted by name unless the slot type is ordered. Structural
//! equality on this form is the content address used by the cache and the
//! condition system. A [`Triangle`] is a sub-problem scope: a set of slots,
//! equal up to ordering.

use serde_json::{json, Value};

use crate::problem::{ObjId, Problem, SlotId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigSlot {
    pub slot: SlotId,
    /// Current position of the slot, when it is movable.
    pub at: Option<SlotId>,
    pub holds: Vec<ObjId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub slots: Vec<ConfigSlot>,
}

impl Config {
    /// Builds the canonical form: slots sorted by name, holds sorted by
    /// object name iff the slot type is unordered.
    pub fn canonical(p: &Problem, slots: impl IntoIterator<Item = ConfigSlot>) -> Config {
        let mut slots: Vec<ConfigSlot> = slots.into_iter().collect();
        slots.sort_by(|a, b| p.slot(a.slot).name.cmp(&p.slot(b.slot).name));
        for s in &mut slots {
            if !p.slot_ordered(s.slot) {
                s.holds.sort_by(|&a, &b| p.object(a).name.cmp(&p.object(b).name));
            }
        }
        Config { slots }
    }

    /// The configuration restricted to a slot subset (already canonical).
    pub fn restrict(&self, scope: &[SlotId]) -> Config {
        Config {
            slots: self
                .slots
                .iter()
                .filter(|s| scope.contains(&s.slot))
                .cloned()
                .collect(),
        }
    }

    /// Score of a configuration: per slot `(score · |holds|)²`, summed and
    /// square-rooted.
    pub fn metric(&self, p: &Problem) -> f64 {
        metric(p, &self.slots)
    }

    /// Signed metric distance over the slots shared with `other`. Zero means
    /// both configurations weigh the same on their common slots.
    pub fn distance(&self, other: &Config, p: &Problem) -> f64 {
        let shared: Vec<SlotId> = self
            .slots
            .iter()
            .map(|s| s.slot)
            .filter(|s| other.slots.iter().any(|o| o.slot == *s))
            .collect();
        let mine: Vec<ConfigSlot> = self.slots.iter().filter(|s| shared.contains(&s.slot)).cloned().collect();
        let theirs: Vec<ConfigSlot> = other.slots.iter().filter(|s| shared.contains(&s.slot)).cloned().collect();
        metric(p, &mine) - metric(p, &theirs)
    }

    /// Equality restricted to `pin`-type slots, ignoring channel positions.
    /// Used for the seen-configuration checks of the contextual stages.
    pub fn eq_pins(&self, other: &Config, p: &Problem) -> bool {
        let pins = |c: &Config| -> Vec<(SlotId, Vec<ObjId>)> {
            c.slots
                .iter()
                .filter(|s| p.slot_has_type(s.slot, "pin"))
                .map(|s| (s.slot, s.holds.clone()))
                .collect()
        };
        pins(self) == pins(other)
    }

    pub fn to_value(&self, p: &Problem, name: &str) -> Value {
        let slots: Vec<Value> = self
            .slots
            .iter()
            .map(|s| {
                json!([
                    p.slot(s.slot).name,
                    s.at.map(|a| p.slot(a).name.clone()),
                    s.holds.iter().map(|&o| p.object(o).name.clone()).collect::<Vec<_>>(),
                ])
            })
            .collect();
        json!({ "name": name, "slots": slots })
    }

    /// Decodes a persisted configuration. An unknown slot clears the whole
    /// entry (known soft corruption); an unknown object is skipped; an
    /// unknown channel position becomes `None`.
    pub fn from_value(p: &Problem, v: &Value) -> Option<(String, Config)> {
        let name = v.get("name")?.as_str()?.to_owned();
        let mut slots = Vec::new();
        for raw in v.get("slots")?.as_array()? {
            let parts = raw.as_array()?;
            let Some(slot) = parts.first().and_then(Value::as_str).and_then(|n| p.slot_id(n)) else {
                return Some((name, Config::default()));
            };
            let at = parts.get(1).and_then(Value::as_str).and_then(|n| p.slot_id(n));
            let mut holds = Vec::new();
            for o in parts.get(2)?.as_array()? {
                if let Some(obj) = o.as_str().and_then(|n| p.object_id(n)) {
                    holds.push(obj);
                }
            }
            slots.push(ConfigSlot { slot, at, holds });
        }
        Some((name, Config::canonical(p, slots)))
    }
}

fn metric(p: &Problem, slots: &[ConfigSlot]) -> f64 {
    slots
        .iter()
        .map(|s| (p.slot(s.slot).score * s.holds.len() as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}

// ------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Triangle {
    pub slots: Vec<SlotId>,
}

impl Triangle {
    /// Canonical form: slots sorted by name, deduplicated.
    pub fn canonical(p: &Problem, slots: impl IntoIterator<Item = SlotId>) -> Triangle {
        let mut slots: Vec<SlotId> = slots.into_iter().collect();
        slots.sort_by(|&a, &b| p.slot(a).name.cmp(&p.slot(b).name));
        slots.dedup();
        Triangle { slots }
    }

    pub fn contains(&self, s: SlotId) -> bool {
        self.slots.contains(&s)
    }

    pub fn to_value(&self, p: &Problem, name: &str) -> Value {
        json!({
            "name": name,
            "slots": self.slots.iter().map(|&s| p.slot(s).name.clone()).collect::<Vec<_>>(),
        })
    }

    /// Decodes a persisted triangle; an unknown slot clears it.
    pub fn from_value(p: &Problem, v: &Value) -> Option<(String, Triangle)> {
        let name = v.get("name")?.as_str()?.to_owned();
        let mut slots = Vec::new();
        for raw in v.get("slots")?.as_array()? {
            let Some(slot) = raw.as_str().and_then(|n| p.slot_id(n)) else {
                return Some((name, Triangle::default()));
            };
            slots.push(slot);
        }
        Some((name, Triangle::canonical(p, slots)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Problem;
    use crate::testing::hanoi_spec;

    fn problem() -> Problem {
        Problem::from_json_str(&hanoi_spec(1, 100)).unwrap().0
    }

    #[test]
    fn canonical_round_trip() {
        let p = problem();
        let cfg = p.initial.clone();
        let v = cfg.to_value(&p, "cfg_001");
        let (name, back) = Config::from_value(&p, &v).unwrap();
        assert_eq!(name, "cfg_001");
        assert_eq!(back, cfg);
    }

    #[test]
    fn unknown_slot_clears_the_config() {
        let p = problem();
        let v = json!({ "name": "cfg_bad", "slots": [["nowhere", null, []]] });
        let (_, cfg) = Config::from_value(&p, &v).unwrap();
        assert!(cfg.slots.is_empty());
    }

    #[test]
    fn distance_is_zero_between_equal_configs() {
        let p = problem();
        assert_eq!(p.initial.distance(&p.initial, &p), 0.0);
        assert_ne!(p.initial.distance(&p.goal, &p), 0.0);
    }

    #[test]
    fn distance_ignores_unshared_slots() {
        let p = problem();
        let pa = p.slot_id("pa").unwrap();
        let sub = p.initial.restrict(&[pa]);
        // the restricted config agrees with the full one on `pa`
        assert_eq!(sub.distance(&p.initial, &p), 0.0);
    }

    #[test]
    fn pin_equality_ignores_the_hand() {
        let p = problem();
        let hand = p.slot_id("hand").unwrap();
        let mut moved = p.initial.clone();
        let pb = p.slot_id("pb").unwrap();
        for s in &mut moved.slots {
            if s.slot == hand {
                s.at = Some(p.slot(pb).pos.unwrap_or(pb));
            }
        }
        assert!(moved.eq_pins(&p.initial, &p));
        assert_ne!(moved, p.initial);
    }

    #[test]
    fn triangles_are_order_insensitive() {
        let p = problem();
        let a = p.slot_id("pa").unwrap();
        let b = p.slot_id("pb").unwrap();
        let t1 = Triangle::canonical(&p, [a, b]);
        let t2 = Triangle::canonical(&p, [b, a, b]);
        assert_eq!(t1, t2);
    }
}
