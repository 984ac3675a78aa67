//! Structured per-iteration records.
//!
//! One record per outer iteration, holding per-component sections under the
//! fixed step keys, plus a closing `strategies` section. The whole run is
//! written as a single JSON document; human-readable progress goes through
//! `tracing` instead.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};

const COMPONENTS: [&str; 4] = ["lct", "int", "icm", "scm"];
const STEPS: [&str; 6] = ["before", "after", "top-down", "bottom-up", "used", "planned"];

#[derive(Default)]
pub struct Logger {
    iterations: Vec<Map<String, Value>>,
}

impl Logger {
    /// Opens a new iteration record with empty sections for every
    /// component and step.
    pub fn new_iteration(&mut self, idx: usize) {
        let mut data = Map::new();
        data.insert("iteration".into(), json!({ "i": idx }));
        for comp in COMPONENTS {
            let mut steps = Map::new();
            for step in STEPS {
                steps.insert(step.into(), json!({}));
            }
            data.insert(comp.into(), Value::Object(steps));
        }
        self.iterations.push(data);
    }

    /// Records a value for a component under a step key of the current
    /// iteration.
    pub fn record(&mut self, comp: &str, step: &str, key: &str, value: Value) {
        if self.iterations.is_empty() {
            self.new_iteration(0);
        }
        let data = self.iterations.last_mut().expect("an iteration is open");
        let section = data
            .entry(comp.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(steps) = section {
            let entry = steps
                .entry(step.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(slot) = entry {
                slot.insert(key.to_owned(), value);
            }
        }
    }

    /// Records a value outside the per-step sections (e.g. the strategy
    /// dump).
    pub fn add(&mut self, comp: &str, key: &str, value: Value) {
        if self.iterations.is_empty() {
            self.new_iteration(0);
        }
        let data = self.iterations.last_mut().expect("an iteration is open");
        let section = data
            .entry(comp.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = section {
            map.insert(key.to_owned(), value);
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if self.iterations.is_empty() {
            return Ok(());
        }
        let all: Vec<Value> = self.iterations.iter().cloned().map(Value::Object).collect();
        let raw = serde_json::to_string(&all)?;
        std::fs::write(path, raw).with_context(|| format!("cannot write log file {}", path.display()))?;
        Ok(())
    }
}
