//! The solver: single owner of the problem, the task hierarchy, the cache
//! and the per-layer working state.
//!
//! All mutation routes through `&mut Solver`; the layer logic lives in
//! `impl Solver` blocks spread over the layer modules. Tasks are addressed
//! by [`TaskRef`] so that a layer can hand "its" task to the layer below
//! without aliasing.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::cache::Cache;
use crate::condition;
use crate::config::Config;
use crate::icm::IcmState;
use crate::int::IntState;
use crate::lct::LctState;
use crate::logger::Logger;
use crate::problem::{Problem, SimParams};
use crate::scm::ScmState;
use crate::strategy::StrategyRef;
use crate::task::Task;

/// Addresses one of the solver-owned task instances.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskRef {
    /// The main task; also the task of the top stage.
    Main,
    /// Real task of the internal interface (its triangle view).
    Int,
    /// Virtual task of the internal interface, used for probing.
    IntVirt,
    /// Real task of the first contextual stage (the extended triangle).
    Icm,
    /// Virtual task of the first contextual stage.
    IcmVirt,
    /// Virtual task of the top stage.
    ScmVirt,
}

pub struct Solver {
    pub problem: Arc<Problem>,
    pub params: SimParams,
    pub cache: Cache,
    pub rng: SmallRng,
    pub log: Logger,

    pub main: Task,
    pub int_task: Task,
    pub int_virt: Task,
    pub icm_task: Task,
    pub icm_virt: Task,
    pub scm_virt: Task,

    pub lct: LctState,
    pub int: IntState,
    pub icm: IcmState,
    pub scm: ScmState,
}

impl Solver {
    pub fn new(problem: Problem, params: SimParams, seed: u64) -> Solver {
        let problem = Arc::new(problem);
        let main = Task::new(problem.clone());
        let int_task = main.clone();
        let int_virt = main.clone();
        let icm_task = main.clone();
        let icm_virt = main.clone();
        let scm_virt = main.clone();
        Solver {
            problem,
            params,
            cache: Cache::default(),
            rng: SmallRng::seed_from_u64(seed),
            log: Logger::default(),
            main,
            int_task,
            int_virt,
            icm_task,
            icm_virt,
            scm_virt,
            lct: LctState::default(),
            int: IntState::default(),
            icm: IcmState::default(),
            scm: ScmState::default(),
        }
    }

    /// Reads the cache (unless the simulation asks for a reset) and brings
    /// every layer into its loaded state. Must run before the first tick.
    pub fn load(&mut self, cache_dir: Option<&Path>) -> Result<()> {
        if let Some(dir) = cache_dir {
            if !self.params.reset_cache() && dir.exists() {
                self.cache.read(dir, &self.problem)?;
            }
        }
        self.int_load(TaskRef::Main, None);
        self.icm_load();
        self.scm_load();
        Ok(())
    }

    pub fn task(&self, r: TaskRef) -> &Task {
        match r {
            TaskRef::Main => &self.main,
            TaskRef::Int => &self.int_task,
            TaskRef::IntVirt => &self.int_virt,
            TaskRef::Icm => &self.icm_task,
            TaskRef::IcmVirt => &self.icm_virt,
            TaskRef::ScmVirt => &self.scm_virt,
        }
    }

    pub fn task_mut(&mut self, r: TaskRef) -> &mut Task {
        match r {
            TaskRef::Main => &mut self.main,
            TaskRef::Int => &mut self.int_task,
            TaskRef::IntVirt => &mut self.int_virt,
            TaskRef::Icm => &mut self.icm_task,
            TaskRef::IcmVirt => &mut self.icm_virt,
            TaskRef::ScmVirt => &mut self.scm_virt,
        }
    }

    /// Learned applicability of a strategy after `prev` in `cfg`.
    pub fn applies(&self, cfg: &Config, prev: Option<StrategyRef>, strategy: StrategyRef) -> bool {
        condition::applies(&self.cache, cfg, prev, strategy)
    }

    /// Learns a condition; the configuration is interned on the way.
    pub fn learn(&mut self, cfg: &Config, prev: Option<StrategyRef>, strategy: StrategyRef, is_pos: bool) {
        let cfg_id = self.cache.intern_config(cfg.clone());
        self.cache.intern_condition(cfg_id, prev, strategy, is_pos);
    }

    /// Dumps the learned collections into the iteration log.
    pub fn log_strategies(&mut self) {
        for kind in ["cfg", "tri", "lct", "int", "icm", "scm", "cnd"] {
            let mut map = serde_json::Map::new();
            for (name, payload) in self.cache.dump(kind, &self.problem) {
                map.insert(name, payload);
            }
            self.log.add("strategies", kind, serde_json::Value::Object(map));
        }
    }

    /// Writes the iteration log and the cache to disk.
    pub fn close(&mut self, base: &Path, run: &str) -> Result<()> {
        self.log_strategies();
        let outdir = base.join("output");
        std::fs::create_dir_all(&outdir)?;
        self.log.write(&outdir.join(format!("{run}.json")))?;
        self.cache.write(&base.join("cache").join(run), &self.problem)?;
        Ok(())
    }
}
