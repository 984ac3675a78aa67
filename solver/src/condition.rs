//! Learned applicability predicates.
//!
//! A condition records whether a strategy may (`is_pos`) or may not be
//! applied in a configuration, given the strategy executed just before.
//! Lookup is by equality on the `(config, prev, strategy)` triple;
//! `prev`/`strategy` carry their kind through [`StrategyRef`], so a
//! condition on a path-level strategy never matches a primitive move with
//! equal fields. Without a matching condition every strategy applies.

use crate::cache::Cache;
use crate::config::Config;
use crate::strategy::{CfgId, StrategyRef};

#[derive(Clone, Debug)]
pub struct Condition {
    pub name: String,
    pub config: CfgId,
    pub prev: Option<StrategyRef>,
    pub strategy: StrategyRef,
    pub is_pos: bool,
}

impl Condition {
    pub fn matches(&self, config: CfgId, prev: Option<StrategyRef>, strategy: StrategyRef) -> bool {
        self.config == config && self.prev == prev && self.strategy == strategy
    }
}

/// True iff the learned conditions allow `strategy` after `prev` in `cfg`.
/// A configuration or strategy the cache has never seen cannot be named by
/// any condition, so it trivially applies.
pub fn applies(cache: &Cache, cfg: &Config, prev: Option<StrategyRef>, strategy: StrategyRef) -> bool {
    let Some(cfg_id) = cache.find_config(cfg) else {
        return true;
    };
    cache
        .cnds
        .iter()
        .find(|c| c.matches(cfg_id, prev, strategy))
        .map(|c| c.is_pos)
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{Movable, Problem};
    use crate::strategy::{IntMove, LctMove};
    use crate::testing::hanoi_spec;

    #[test]
    fn kind_tags_keep_layers_apart() {
        let (p, _) = Problem::from_json_str(&hanoi_spec(1, 100)).unwrap();
        let mut cache = Cache::default();
        let lct = cache.intern_lct(LctMove {
            handle: p.handle_id("take").unwrap(),
            slot_in: p.slot_id("pa").unwrap(),
            movable: Movable::Object(p.object_id("d1").unwrap()),
            slot_out: p.slot_id("hand").unwrap(),
        });
        let int = cache.intern_int(IntMove {
            slot_in: p.slot_id("pa").unwrap(),
            moves: vec![lct],
            slot_out: p.slot_id("hand").unwrap(),
        });
        let cfg = p.initial.clone();
        let cfg_id = cache.intern_config(cfg.clone());
        cache.intern_condition(cfg_id, None, StrategyRef::Int(int), false);

        // the negative condition hits the path strategy with that exact key
        assert!(!applies(&cache, &cfg, None, StrategyRef::Int(int)));
        // but not a primitive move, another prev, or another config
        assert!(applies(&cache, &cfg, None, StrategyRef::Lct(lct)));
        assert!(applies(&cache, &cfg, Some(StrategyRef::Int(int)), StrategyRef::Int(int)));
        assert!(applies(&cache, &p.goal, None, StrategyRef::Int(int)));
    }

    #[test]
    fn positive_conditions_still_apply() {
        let (p, _) = Problem::from_json_str(&hanoi_spec(1, 100)).unwrap();
        let mut cache = Cache::default();
        let lct = cache.intern_lct(LctMove {
            handle: p.handle_id("take").unwrap(),
            slot_in: p.slot_id("pa").unwrap(),
            movable: Movable::Object(p.object_id("d1").unwrap()),
            slot_out: p.slot_id("hand").unwrap(),
        });
        let cfg = p.initial.clone();
        let cfg_id = cache.intern_config(cfg.clone());
        cache.intern_condition(cfg_id, None, StrategyRef::Lct(lct), true);
        assert!(applies(&cache, &cfg, None, StrategyRef::Lct(lct)));
    }
}
