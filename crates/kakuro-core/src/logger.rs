//! Structured JSONL event logger.
//!
//! Emits one JSON object per line describing each generation step, for
//! consumption by external visualization tooling. Disabled by default;
//! every log call is a cheap no-op until a sink is attached. Logging never
//! alters control flow.

use crate::config::{FillParams, TopologyParams};
use crate::estimator::DifficultyResult;
use serde_json::json;
use std::io::Write;
use std::time::Instant;

/// Stage codes.
pub mod stage {
    pub const TOPOLOGY: &str = "tc";
    pub const FILLING: &str = "f";
    pub const UNIQUENESS: &str = "uv";
    pub const DIFFICULTY: &str = "de";
    pub const PROFILE: &str = "p";
    pub const PARAMS: &str = "params";
}

/// Substage codes.
pub mod substage {
    pub const START: &str = "s";
    pub const COMPLETE: &str = "c";
    pub const FAILED: &str = "f";
    pub const VALIDATION_FAILED: &str = "vf";

    // Topology
    pub const STAMP_PLACEMENT: &str = "sp";
    pub const SEED_PLACEMENT: &str = "sep";
    pub const LATTICE_GROWTH: &str = "lg";
    pub const SLICE_RUNS: &str = "sr";
    pub const BREAK_PATCHES: &str = "bp";
    pub const PRUNE_SINGLES: &str = "ps";
    pub const BREAK_SINGLE_RUNS: &str = "bsr";
    pub const STABILIZE_GRID: &str = "sg";
    pub const FIX_INVALID_RUNS: &str = "fir";
    pub const CONNECTIVITY_CHECK: &str = "cc";

    // Filling
    pub const NUMBER_PLACEMENT: &str = "np";
    pub const BACKTRACK: &str = "bt";
    pub const CONSISTENCY_FAILED: &str = "cf";
    pub const AMBIGUITY_REJECTION: &str = "ambiguity_rejection";
    pub const UNIQUENESS_CONFLICT: &str = "uniqueness_conflict";

    // Uniqueness
    pub const ALTERNATIVE_FOUND: &str = "af";
    pub const REPAIR_ATTEMPT: &str = "ra";

    // Difficulty
    pub const LOGIC_STEP: &str = "ls";
    pub const TIMING: &str = "tm";
}

/// White-cells-only grid serialization: `(row, col, value)`, value 0 when
/// unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridSnapshot {
    pub width: usize,
    pub height: usize,
    pub whites: Vec<(usize, usize, u8)>,
}

impl GridSnapshot {
    fn to_json(&self) -> serde_json::Value {
        json!(self
            .whites
            .iter()
            .map(|&(r, c, v)| [r, c, v as usize])
            .collect::<Vec<_>>())
    }
}

pub struct GenerationLogger {
    sink: Option<Box<dyn Write + Send>>,
    step_id: u64,
    last_step: Instant,
}

impl GenerationLogger {
    /// A logger that drops everything.
    pub fn disabled() -> Self {
        Self {
            sink: None,
            step_id: 0,
            last_step: Instant::now(),
        }
    }

    /// Log to an arbitrary sink (a file, a pipe, an in-memory buffer).
    pub fn to_writer(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Some(sink),
            step_id: 0,
            last_step: Instant::now(),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    fn emit(&mut self, mut record: serde_json::Value) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let dur_ms = self.last_step.elapsed().as_secs_f64() * 1000.0;
        self.last_step = Instant::now();
        if let Some(obj) = record.as_object_mut() {
            obj.insert("id".into(), json!(self.step_id));
            obj.insert("dur_ms".into(), json!((dur_ms * 100.0).round() / 100.0));
        }
        self.step_id += 1;
        // A failed write only loses the log line.
        let _ = writeln!(sink, "{}", record);
        let _ = sink.flush();
    }

    /// Log one pipeline step with the current grid state.
    pub fn log_step(&mut self, stage: &str, substage: &str, message: &str, grid: &GridSnapshot) {
        if !self.is_enabled() {
            return;
        }
        self.emit(json!({
            "stage": stage,
            "substage": substage,
            "message": message,
            "wh": [grid.width, grid.height],
            "g": grid.to_json(),
        }));
    }

    /// Log a step with highlighted cells and an optional alternative-grid
    /// overlay (used when a second solution is found).
    pub fn log_step_with_highlights(
        &mut self,
        stage: &str,
        substage: &str,
        message: &str,
        grid: &GridSnapshot,
        highlights: &[(usize, usize)],
        alt_grid: Option<&GridSnapshot>,
    ) {
        if !self.is_enabled() {
            return;
        }
        let mut data = json!({ "hc": highlights });
        if let Some(alt) = alt_grid {
            data["ag"] = alt.to_json();
        }
        self.emit(json!({
            "stage": stage,
            "substage": substage,
            "message": message,
            "wh": [grid.width, grid.height],
            "g": grid.to_json(),
            "d": data,
        }));
    }

    /// Log the resolved generation parameters once per run.
    pub fn log_params(&mut self, fill: &FillParams, topo: &TopologyParams) {
        if !self.is_enabled() {
            return;
        }
        self.emit(json!({
            "stage": stage::PARAMS,
            "substage": "init",
            "message": "Generation parameters",
            "fill": fill,
            "topo": topo,
        }));
    }

    /// Log the final difficulty record.
    pub fn log_difficulty(&mut self, result: &DifficultyResult, grid: &GridSnapshot) {
        if !self.is_enabled() {
            return;
        }
        self.emit(json!({
            "stage": stage::DIFFICULTY,
            "substage": substage::COMPLETE,
            "message": format!("Difficulty estimation complete: {}", result.rating),
            "difficulty": {
                "rating": result.rating.to_string(),
                "score": result.score,
                "max_tier": result.max_tier as u8,
                "solution_count": result.solution_count,
                "uniqueness": result.uniqueness.to_string(),
            },
            "wh": [grid.width, grid.height],
            "g": grid.to_json(),
        }));
    }

    /// Log a profile timing sample.
    pub fn log_profile(&mut self, name: &str, duration_ms: f64) {
        if !self.is_enabled() {
            return;
        }
        self.emit(json!({
            "stage": stage::PROFILE,
            "substage": substage::TIMING,
            "message": format!("Profile: {}", name),
            "d": { "ms": duration_ms },
        }));
    }
}

impl std::fmt::Debug for GenerationLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationLogger")
            .field("enabled", &self.is_enabled())
            .field("step_id", &self.step_id)
            .finish()
    }
}
