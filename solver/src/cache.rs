//! Long-term memory: the interned strategy collections and their on-disk
//! round trip.
//!
//! Collections are append-only sets under the structural equality of their
//! payloads; interning an equal value returns the existing entry. Names are
//! minted on insertion (`lct_001`, ...) and are the keys of the persisted
//! files. One JSON file per collection, loaded in the fixed order
//! `cfg, tri, lct, int, icm, scm, cnd` so that later collections resolve
//! references to earlier ones by name.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::condition::Condition;
use crate::config::{Config, Triangle};
use crate::problem::Problem;
use crate::strategy::{
    CfgId, CndId, IcmId, IcmMove, IntId, IntMove, LctId, LctMove, ScmId, ScmMove, StrategyIc,
    StrategyInt, StrategyLct, StrategyRef, ThreefoldWay, TriId,
};

#[derive(Default)]
pub struct Cache {
    pub cfgs: Vec<(String, Config)>,
    pub tris: Vec<(String, Triangle)>,
    pub lcts: Vec<StrategyLct>,
    pub ints: Vec<StrategyInt>,
    pub icms: Vec<ThreefoldWay>,
    pub scms: Vec<StrategyIc>,
    pub cnds: Vec<Condition>,
}

impl Cache {
    // --------------------------------------------------------------------
    // Accessors

    pub fn cfg(&self, id: CfgId) -> &Config {
        &self.cfgs[id.idx()].1
    }

    pub fn tri(&self, id: TriId) -> &Triangle {
        &self.tris[id.idx()].1
    }

    pub fn lct(&self, id: LctId) -> &StrategyLct {
        &self.lcts[id.idx()]
    }

    pub fn int(&self, id: IntId) -> &StrategyInt {
        &self.ints[id.idx()]
    }

    pub fn icm(&self, id: IcmId) -> &ThreefoldWay {
        &self.icms[id.idx()]
    }

    pub fn scm(&self, id: ScmId) -> &StrategyIc {
        &self.scms[id.idx()]
    }

    pub fn cnd(&self, id: CndId) -> &Condition {
        &self.cnds[id.idx()]
    }

    pub fn strategy_name(&self, r: StrategyRef) -> &str {
        match r {
            StrategyRef::Lct(id) => &self.lct(id).name,
            StrategyRef::Int(id) => &self.int(id).name,
            StrategyRef::Icm(id) => &self.icm(id).name,
            StrategyRef::Scm(id) => &self.scm(id).name,
        }
    }

    // --------------------------------------------------------------------
    // Structural lookup

    pub fn find_config(&self, cfg: &Config) -> Option<CfgId> {
        self.cfgs.iter().position(|(_, c)| c == cfg).map(CfgId::from)
    }

    pub fn find_triangle(&self, tri: &Triangle) -> Option<TriId> {
        self.tris.iter().position(|(_, t)| t == tri).map(TriId::from)
    }

    pub fn find_lct(&self, mv: &LctMove) -> Option<LctId> {
        self.lcts.iter().position(|s| s.mv == *mv).map(LctId::from)
    }

    pub fn find_int(&self, mv: &IntMove) -> Option<IntId> {
        self.ints.iter().position(|s| s.mv == *mv).map(IntId::from)
    }

    pub fn find_icm(&self, mv: &IcmMove) -> Option<IcmId> {
        self.icms.iter().position(|s| s.mv == *mv).map(IcmId::from)
    }

    pub fn find_scm(&self, mv: &ScmMove) -> Option<ScmId> {
        self.scms.iter().position(|s| s.mv == *mv).map(ScmId::from)
    }

    /// Scans the strategy collections for a name, in the fixed kind order.
    pub fn find_strategy_by_name(&self, name: &str) -> Option<StrategyRef> {
        if let Some(i) = self.lcts.iter().position(|s| s.name == name) {
            return Some(StrategyRef::Lct(LctId::from(i)));
        }
        if let Some(i) = self.ints.iter().position(|s| s.name == name) {
            return Some(StrategyRef::Int(IntId::from(i)));
        }
        if let Some(i) = self.icms.iter().position(|s| s.name == name) {
            return Some(StrategyRef::Icm(IcmId::from(i)));
        }
        if let Some(i) = self.scms.iter().position(|s| s.name == name) {
            return Some(StrategyRef::Scm(ScmId::from(i)));
        }
        None
    }

    // --------------------------------------------------------------------
    // Interning

    pub fn intern_config(&mut self, cfg: Config) -> CfgId {
        if let Some(id) = self.find_config(&cfg) {
            return id;
        }
        let name = format!("cfg_{:03}", self.cfgs.len() + 1);
        self.cfgs.push((name, cfg));
        CfgId::from(self.cfgs.len() - 1)
    }

    pub fn intern_triangle(&mut self, tri: Triangle) -> TriId {
        if let Some(id) = self.find_triangle(&tri) {
            return id;
        }
        let name = format!("tri_{:03}", self.tris.len() + 1);
        self.tris.push((name, tri));
        TriId::from(self.tris.len() - 1)
    }

    pub fn intern_lct(&mut self, mv: LctMove) -> LctId {
        if let Some(id) = self.find_lct(&mv) {
            return id;
        }
        let name = format!("lct_{:03}", self.lcts.len() + 1);
        self.lcts.push(StrategyLct { name, mv });
        LctId::from(self.lcts.len() - 1)
    }

    pub fn intern_int(&mut self, mv: IntMove) -> IntId {
        if let Some(id) = self.find_int(&mv) {
            return id;
        }
        let name = format!("int_{:03}", self.ints.len() + 1);
        let score = mv.moves.len() as u32;
        self.ints.push(StrategyInt { name, mv, score });
        IntId::from(self.ints.len() - 1)
    }

    pub fn intern_icm(&mut self, mv: IcmMove) -> IcmId {
        if let Some(id) = self.find_icm(&mv) {
            return id;
        }
        let name = format!("icm_{:03}", self.icms.len() + 1);
        let score = mv.conceptual.iter().map(|&i| self.int(i).score).sum();
        self.icms.push(ThreefoldWay {
            name,
            mv,
            symbolic: Vec::new(),
            score,
        });
        IcmId::from(self.icms.len() - 1)
    }

    pub fn intern_scm(&mut self, mv: ScmMove) -> ScmId {
        if let Some(id) = self.find_scm(&mv) {
            return id;
        }
        let name = format!("scm_{:03}", self.scms.len() + 1);
        let score = mv.moves.iter().map(|&i| self.icm(i).score).sum();
        self.scms.push(StrategyIc { name, mv, score });
        ScmId::from(self.scms.len() - 1)
    }

    /// Interns a condition if its `(config, prev, strategy)` key is new.
    pub fn intern_condition(&mut self, config: CfgId, prev: Option<StrategyRef>, strategy: StrategyRef, is_pos: bool) -> CndId {
        if let Some(i) = self
            .cnds
            .iter()
            .position(|c| c.config == config && c.prev == prev && c.strategy == strategy)
        {
            return CndId::from(i);
        }
        let name = format!("cnd_{:03}", self.cnds.len() + 1);
        self.cnds.push(Condition {
            name,
            config,
            prev,
            strategy,
            is_pos,
        });
        CndId::from(self.cnds.len() - 1)
    }

    // --------------------------------------------------------------------
    // Persistence

    const ORDER: [&'static str; 7] = ["cfg", "tri", "lct", "int", "icm", "scm", "cnd"];

    /// Writes every non-empty collection to `dir/<kind>.json`.
    pub fn write(&self, dir: &Path, p: &Problem) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create cache directory {}", dir.display()))?;
        for kind in Self::ORDER {
            let entries = self.dump(kind, p);
            if entries.is_empty() {
                continue;
            }
            let rows: Vec<Value> = entries
                .into_iter()
                .map(|(name, payload)| json!({ name: payload }))
                .collect();
            let path = dir.join(format!("{kind}.json"));
            let raw = serde_json::to_string(&rows)?;
            std::fs::write(&path, raw)
                .with_context(|| format!("cannot write cache file {}", path.display()))?;
        }
        Ok(())
    }

    /// Loads the collections from `dir`, resolving names in the fixed order.
    /// Missing files are fine; a config/triangle entry naming an unknown
    /// slot or object is cleared and loading continues.
    pub fn read(&mut self, dir: &Path, p: &Problem) -> Result<()> {
        for kind in Self::ORDER {
            let path = dir.join(format!("{kind}.json"));
            if !path.exists() {
                continue;
            }
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read cache file {}", path.display()))?;
            let rows: Vec<Value> = serde_json::from_str(&raw)
                .with_context(|| format!("invalid cache file {}", path.display()))?;
            for row in &rows {
                let obj = row.as_object().context("cache entry must be an object")?;
                for payload in obj.values() {
                    self.load_entry(kind, payload, p)
                        .with_context(|| format!("invalid entry in {}", path.display()))?;
                }
            }
        }
        Ok(())
    }

    pub fn dump(&self, kind: &str, p: &Problem) -> Vec<(String, Value)> {
        match kind {
            "cfg" => self
                .cfgs
                .iter()
                .map(|(name, c)| (name.clone(), c.to_value(p, name)))
                .collect(),
            "tri" => self
                .tris
                .iter()
                .map(|(name, t)| (name.clone(), t.to_value(p, name)))
                .collect(),
            "lct" => self
                .lcts
                .iter()
                .map(|s| {
                    let v = json!({
                        "name": s.name,
                        "handle": p.handle(s.mv.handle).name,
                        "slotin": p.slot(s.mv.slot_in).name,
                        "movable": p.movable_name(s.mv.movable),
                        "slotout": p.slot(s.mv.slot_out).name,
                    });
                    (s.name.clone(), v)
                })
                .collect(),
            "int" => self
                .ints
                .iter()
                .map(|s| {
                    let v = json!({
                        "name": s.name,
                        "slotin": p.slot(s.mv.slot_in).name,
                        "moves": s.mv.moves.iter().map(|&m| self.lct(m).name.clone()).collect::<Vec<_>>(),
                        "slotout": p.slot(s.mv.slot_out).name,
                    });
                    (s.name.clone(), v)
                })
                .collect(),
            "icm" => self
                .icms
                .iter()
                .map(|s| {
                    let v = json!({
                        "name": s.name,
                        "tensoral": self.tris[s.mv.tensoral.idx()].0,
                        "conceptual": s.mv.conceptual.iter().map(|&m| self.int(m).name.clone()).collect::<Vec<_>>(),
                        "symbolic": s.symbolic,
                    });
                    (s.name.clone(), v)
                })
                .collect(),
            "scm" => self
                .scms
                .iter()
                .map(|s| {
                    let v = json!({
                        "name": s.name,
                        "confin": self.cfgs[s.mv.conf_in.idx()].0,
                        "moves": s.mv.moves.iter().map(|&m| self.icm(m).name.clone()).collect::<Vec<_>>(),
                        "confout": self.cfgs[s.mv.conf_out.idx()].0,
                    });
                    (s.name.clone(), v)
                })
                .collect(),
            "cnd" => self
                .cnds
                .iter()
                .map(|c| {
                    let v = json!({
                        "name": c.name,
                        "config": self.cfgs[c.config.idx()].0,
                        "prev": c.prev.map(|r| self.strategy_name(r).to_owned()),
                        "strategy": self.strategy_name(c.strategy),
                        "isPos": if c.is_pos { 1 } else { 0 },
                    });
                    (c.name.clone(), v)
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn load_entry(&mut self, kind: &str, v: &Value, p: &Problem) -> Result<()> {
        let str_field = |key: &str| -> Result<&str> {
            v.get(key)
                .and_then(Value::as_str)
                .with_context(|| format!("missing field `{key}`"))
        };
        let str_list = |key: &str| -> Result<Vec<&str>> {
            v.get(key)
                .and_then(Value::as_array)
                .with_context(|| format!("missing field `{key}`"))?
                .iter()
                .map(|x| x.as_str().context("expected a name"))
                .collect()
        };
        match kind {
            "cfg" => {
                let (name, cfg) = Config::from_value(p, v).context("malformed config entry")?;
                self.cfgs.push((name, cfg));
            }
            "tri" => {
                let (name, tri) = Triangle::from_value(p, v).context("malformed triangle entry")?;
                self.tris.push((name, tri));
            }
            "lct" => {
                let mv = LctMove {
                    handle: p.handle_id(str_field("handle")?).context("unknown handle")?,
                    slot_in: p.slot_id(str_field("slotin")?).context("unknown slot")?,
                    movable: p.movable_id(str_field("movable")?).context("unknown movable")?,
                    slot_out: p.slot_id(str_field("slotout")?).context("unknown slot")?,
                };
                self.lcts.push(StrategyLct {
                    name: str_field("name")?.to_owned(),
                    mv,
                });
            }
            "int" => {
                let moves = str_list("moves")?
                    .into_iter()
                    .map(|n| {
                        self.lcts
                            .iter()
                            .position(|s| s.name == n)
                            .map(LctId::from)
                            .with_context(|| format!("unknown primitive move `{n}`"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let mv = IntMove {
                    slot_in: p.slot_id(str_field("slotin")?).context("unknown slot")?,
                    moves,
                    slot_out: p.slot_id(str_field("slotout")?).context("unknown slot")?,
                };
                let score = mv.moves.len() as u32;
                self.ints.push(StrategyInt {
                    name: str_field("name")?.to_owned(),
                    mv,
                    score,
                });
            }
            "icm" => {
                let tri_name = str_field("tensoral")?;
                let tensoral = self
                    .tris
                    .iter()
                    .position(|(tn, _)| tn.as_str() == tri_name)
                    .map(TriId::from)
                    .with_context(|| format!("unknown triangle `{tri_name}`"))?;
                let conceptual = str_list("conceptual")?
                    .into_iter()
                    .map(|n| {
                        self.ints
                            .iter()
                            .position(|s| s.name == n)
                            .map(IntId::from)
                            .with_context(|| format!("unknown path strategy `{n}`"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let mv = IcmMove { tensoral, conceptual };
                let score = mv.conceptual.iter().map(|&i| self.int(i).score).sum();
                self.icms.push(ThreefoldWay {
                    name: str_field("name")?.to_owned(),
                    mv,
                    symbolic: Vec::new(),
                    score,
                });
            }
            "scm" => {
                let cfg_by_name = |cache: &Cache, n: &str| -> Result<CfgId> {
                    cache
                        .cfgs
                        .iter()
                        .position(|(cn, _)| cn.as_str() == n)
                        .map(CfgId::from)
                        .with_context(|| format!("unknown configuration `{n}`"))
                };
                let conf_in = cfg_by_name(self, str_field("confin")?)?;
                let conf_out = cfg_by_name(self, str_field("confout")?)?;
                let moves = str_list("moves")?
                    .into_iter()
                    .map(|n| {
                        self.icms
                            .iter()
                            .position(|s| s.name == n)
                            .map(IcmId::from)
                            .with_context(|| format!("unknown relocation strategy `{n}`"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let mv = ScmMove { conf_in, moves, conf_out };
                let score = mv.moves.iter().map(|&i| self.icm(i).score).sum();
                self.scms.push(StrategyIc {
                    name: str_field("name")?.to_owned(),
                    mv,
                    score,
                });
            }
            "cnd" => {
                let cfg_name = str_field("config")?;
                let config = self
                    .cfgs
                    .iter()
                    .position(|(cn, _)| cn.as_str() == cfg_name)
                    .map(CfgId::from)
                    .with_context(|| format!("unknown configuration `{cfg_name}` in condition"))?;
                let prev = match v.get("prev").and_then(Value::as_str) {
                    Some(n) => Some(
                        self.find_strategy_by_name(n)
                            .with_context(|| format!("unknown strategy `{n}`"))?,
                    ),
                    None => None,
                };
                let strategy = {
                    let n = str_field("strategy")?;
                    self.find_strategy_by_name(n)
                        .with_context(|| format!("unknown strategy `{n}`"))?
                };
                let is_pos = v.get("isPos").and_then(Value::as_i64).unwrap_or(0) == 1;
                self.cnds.push(Condition {
                    name: str_field("name")?.to_owned(),
                    config,
                    prev,
                    strategy,
                    is_pos,
                });
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Movable;
    use crate::testing::hanoi_spec;

    fn problem() -> Problem {
        Problem::from_json_str(&hanoi_spec(1, 100)).unwrap().0
    }

    fn sample_lct(p: &Problem) -> LctMove {
        LctMove {
            handle: p.handle_id("take").unwrap(),
            slot_in: p.slot_id("pa").unwrap(),
            movable: Movable::Object(p.object_id("d1").unwrap()),
            slot_out: p.slot_id("hand").unwrap(),
        }
    }

    #[test]
    fn interning_is_idempotent() {
        let p = problem();
        let mut cache = Cache::default();
        let mv = sample_lct(&p);
        let a = cache.intern_lct(mv);
        let b = cache.intern_lct(mv);
        assert_eq!(a, b);
        assert_eq!(cache.lcts.len(), 1);
        assert_eq!(cache.lct(a).name, "lct_001");

        let cfg = p.initial.clone();
        let c1 = cache.intern_config(cfg.clone());
        let c2 = cache.intern_config(cfg);
        assert_eq!(c1, c2);
        assert_eq!(cache.cfgs.len(), 1);
    }

    #[test]
    fn scores_sum_over_children() {
        let p = problem();
        let mut cache = Cache::default();
        let a = cache.intern_lct(sample_lct(&p));
        let b = cache.intern_lct(LctMove {
            slot_out: p.slot_id("pb").unwrap(),
            handle: p.handle_id("put").unwrap(),
            slot_in: p.slot_id("hand").unwrap(),
            ..sample_lct(&p)
        });
        let int = cache.intern_int(IntMove {
            slot_in: p.slot_id("pa").unwrap(),
            moves: vec![a, b],
            slot_out: p.slot_id("pb").unwrap(),
        });
        assert_eq!(cache.int(int).score, 2);
        let tri = cache.intern_triangle(crate::config::Triangle::canonical(
            &p,
            p.all_slot_ids(),
        ));
        let icm = cache.intern_icm(IcmMove {
            tensoral: tri,
            conceptual: vec![int, int],
        });
        assert_eq!(cache.icm(icm).score, 4);
    }

    #[test]
    fn round_trip_preserves_names_and_structure() {
        let p = problem();
        let dir = tempfile::tempdir().unwrap();
        let mut cache = Cache::default();
        let a = cache.intern_lct(sample_lct(&p));
        let b = cache.intern_lct(LctMove {
            handle: p.handle_id("put").unwrap(),
            slot_in: p.slot_id("hand").unwrap(),
            movable: Movable::Object(p.object_id("d1").unwrap()),
            slot_out: p.slot_id("pb").unwrap(),
        });
        let int = cache.intern_int(IntMove {
            slot_in: p.slot_id("pa").unwrap(),
            moves: vec![a, b],
            slot_out: p.slot_id("pb").unwrap(),
        });
        let tri = cache.intern_triangle(crate::config::Triangle::canonical(&p, p.all_slot_ids()));
        let icm = cache.intern_icm(IcmMove {
            tensoral: tri,
            conceptual: vec![int],
        });
        let ci = cache.intern_config(p.initial.clone());
        let co = cache.intern_config(p.goal.clone());
        cache.intern_scm(ScmMove {
            conf_in: ci,
            moves: vec![icm],
            conf_out: co,
        });
        cache.intern_condition(ci, None, StrategyRef::Int(int), false);
        cache.write(dir.path(), &p).unwrap();

        let mut back = Cache::default();
        back.read(dir.path(), &p).unwrap();
        assert_eq!(back.lcts.len(), 2);
        assert_eq!(back.ints.len(), 1);
        assert_eq!(back.icms.len(), 1);
        assert_eq!(back.scms.len(), 1);
        assert_eq!(back.cnds.len(), 1);
        assert_eq!(back.lct(a).mv, cache.lct(a).mv);
        assert_eq!(back.int(int).mv, cache.int(int).mv);
        assert_eq!(back.cfg(ci), cache.cfg(ci));
        assert_eq!(back.cnds[0].strategy, StrategyRef::Int(int));
        // re-interning a loaded entry does not grow the collection
        let again = back.intern_lct(cache.lct(a).mv);
        assert_eq!(again, a);
        assert_eq!(back.lcts.len(), 2);
    }

    #[test]
    fn corrupt_config_entries_are_cleared_not_fatal() {
        let p = problem();
        let dir = tempfile::tempdir().unwrap();
        let rows = json!([
            { "cfg_001": { "name": "cfg_001", "slots": [["nowhere", null, ["d1"]]] } }
        ]);
        std::fs::write(dir.path().join("cfg.json"), rows.to_string()).unwrap();
        let mut cache = Cache::default();
        cache.read(dir.path(), &p).unwrap();
        assert_eq!(cache.cfgs.len(), 1);
        assert!(cache.cfgs[0].1.slots.is_empty());
    }

    #[test]
    fn condition_keys_are_unique() {
        let p = problem();
        let mut cache = Cache::default();
        let ci = cache.intern_config(p.initial.clone());
        let int = cache.intern_int(IntMove {
            slot_in: p.slot_id("pa").unwrap(),
            moves: vec![],
            slot_out: p.slot_id("pb").unwrap(),
        });
        let a = cache.intern_condition(ci, None, StrategyRef::Int(int), false);
        let b = cache.intern_condition(ci, None, StrategyRef::Int(int), true);
        assert_eq!(a, b);
        assert_eq!(cache.cnds.len(), 1);
        assert!(!cache.cnd(a).is_pos);
    }
}
