//! Generation orchestration.
//!
//! Composes topology generation, filling, uniqueness checking and
//! difficulty estimation into the retry/repair/learn loop. When a fill
//! turns out ambiguous, the loop learns a forbidden value at the
//! highest-degree differing cell; after enough ambiguous fills it repairs
//! the topology around the witness instead. The whole run is bounded by a
//! wall-clock budget and fails cleanly when it expires.

use crate::board::Board;
use crate::config::{Difficulty, FillParams, PartitionPreference, TopologyParams};
use crate::estimator::{DifficultyResult, Estimator};
use crate::filler::{domain_size, Filler, ValueConstraint, ValueSource};
use crate::logger::{stage, substage};
use crate::uniqueness::{robust_check, UniquenessOutcome, Witness};
use crate::{Deadline, DigitSet};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_TOPOLOGY_RETRIES: usize = 50;
const MAX_FILL_ATTEMPTS: usize = 100;
const MAX_REPAIR_ROUNDS: usize = 5;
const UNIQUENESS_NODES: u32 = 150_000;
const MIN_USABLE_CELLS: usize = 12;
const MAX_REPAIR_CANDIDATES: usize = 15;
const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(30);

/// How topology repair may modify the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStrategy {
    /// Only turn white cells into blocks.
    BlockOnly,
    /// Also promote a block to white when that re-bridges a split.
    BlockOrBridge,
}

/// One cell of the exported puzzle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleCell {
    #[serde(rename = "type")]
    pub kind: PuzzleCellKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clue_h: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clue_v: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PuzzleCellKind {
    #[serde(rename = "BLOCK")]
    Block,
    #[serde(rename = "WHITE")]
    White,
}

/// A finished puzzle: the grid in row-major order plus its difficulty
/// record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedPuzzle {
    pub width: usize,
    pub height: usize,
    pub grid: Vec<Vec<PuzzleCell>>,
    pub difficulty: DifficultyResult,
}

pub struct PuzzleGenerator {
    pub board: Board,
    time_limit: Duration,
    repair_strategy: RepairStrategy,
}

impl PuzzleGenerator {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            board: Board::new(width, height),
            time_limit: DEFAULT_TIME_LIMIT,
            repair_strategy: RepairStrategy::BlockOrBridge,
        }
    }

    pub fn with_seed(width: usize, height: usize, seed: u64) -> Self {
        Self {
            board: Board::with_seed(width, height, seed),
            time_limit: DEFAULT_TIME_LIMIT,
            repair_strategy: RepairStrategy::BlockOrBridge,
        }
    }

    pub fn set_time_limit(&mut self, limit: Duration) {
        self.time_limit = limit;
    }

    pub fn set_repair_strategy(&mut self, strategy: RepairStrategy) {
        self.repair_strategy = strategy;
    }

    /// Generate a puzzle with both parameter sets taken from the
    /// difficulty tables.
    pub fn generate_with_difficulty(&mut self, difficulty: Difficulty) -> bool {
        let fill = FillParams::for_difficulty(difficulty);
        let topo = TopologyParams::for_difficulty(difficulty);
        self.generate(&fill, &topo)
    }

    /// Run the full pipeline. On success the board holds the committed
    /// solution and clues; on failure (including timeout) it returns false
    /// with no partial puzzle.
    pub fn generate(&mut self, fill: &FillParams, topo: &TopologyParams) -> bool {
        let deadline = Deadline::new(self.time_limit);
        self.board.logger.log_params(fill, topo);

        for _ in 0..MAX_TOPOLOGY_RETRIES {
            if deadline.expired() {
                self.log_filling(substage::FAILED, "Generation timeout exceeded");
                return false;
            }
            if !self.prepare_new_topology(topo) {
                continue;
            }
            if self.attempt_fill_and_validate(fill, deadline) {
                self.log_filling(substage::COMPLETE, "Puzzle generation successful");
                return true;
            }
        }

        self.log_filling(substage::FAILED, "Puzzle generation failed after max retries");
        false
    }

    /// Random-size entry point: draws the grid dimensions, density, stamp
    /// subset and partition preference, then retries with bumped density
    /// until a puzzle lands.
    pub fn generate_random(&mut self) -> Option<GeneratedPuzzle> {
        let width = self.board.rng.gen_range(8..=18usize);
        let height = self.board.rng.gen_range(8..=16usize);
        let density = self.board.rng.gen_range(0.55..0.68);
        let stamp_scale = self.board.rng.gen_range(8..=20usize);
        let min_cells_frac = self.board.rng.gen_range(0.18..0.35);
        let max_run_len = self.board.rng.gen_range(6..=9usize);
        let max_patch = self.board.rng.gen_range(2..=4usize);
        let preference = match self.board.rng.gen_range(0..3) {
            0 => PartitionPreference::Unbiased,
            1 => PartitionPreference::Few,
            _ => PartitionPreference::Unique,
        };
        let mut all_stamps: Vec<(usize, usize)> = vec![
            (1, 3),
            (3, 1),
            (2, 2),
            (1, 4),
            (4, 1),
            (2, 3),
            (3, 2),
            (1, 5),
            (5, 1),
            (2, 4),
            (4, 2),
            (3, 3),
            (1, 6),
            (6, 1),
            (2, 5),
            (5, 2),
            (3, 4),
            (1, 7),
            (7, 1),
            (1, 8),
            (8, 1),
        ];
        all_stamps.shuffle(&mut self.board.rng);
        let n_stamps = self.board.rng.gen_range(5..=12usize).min(all_stamps.len());

        let area = (width - 2) * (height - 2);
        self.board = Board::new(width, height);

        let mut topo = TopologyParams::for_difficulty(Difficulty::Medium);
        topo.density = Some(density);
        topo.num_stamps = Some(stamp_scale * area / 100);
        topo.max_sector_length = Some(9);
        topo.island_mode = Some(true);
        topo.min_cells = Some((area as f64 * min_cells_frac) as usize);
        topo.max_run_len = Some(max_run_len);
        topo.max_patch_size = Some(max_patch);
        topo.stamps = Some(all_stamps[..n_stamps].to_vec());

        let mut fill = FillParams::for_difficulty(Difficulty::Medium);
        fill.partition_preference = Some(preference);

        for _ in 0..5 {
            if self.generate(&fill, &topo) {
                return Some(self.export());
            }
            topo.density = Some((topo.density.unwrap() + 0.05).min(0.75));
            topo.num_stamps = Some((topo.num_stamps.unwrap() as f64 * 1.2) as usize);
        }
        None
    }

    /// Rate the committed puzzle and export it cell by cell.
    pub fn export(&mut self) -> GeneratedPuzzle {
        let difficulty = Estimator::new(&mut self.board).estimate();
        let mut grid = Vec::with_capacity(self.board.height);
        for r in 0..self.board.height {
            let mut row = Vec::with_capacity(self.board.width);
            for c in 0..self.board.width {
                let cell = self.board.get(r, c).unwrap();
                row.push(if cell.is_white() {
                    PuzzleCell {
                        kind: PuzzleCellKind::White,
                        clue_h: None,
                        clue_v: None,
                        solution: cell.value(),
                    }
                } else {
                    PuzzleCell {
                        kind: PuzzleCellKind::Block,
                        clue_h: cell.clue_h(),
                        clue_v: cell.clue_v(),
                        solution: None,
                    }
                });
            }
            grid.push(row);
        }
        GeneratedPuzzle {
            width: self.board.width,
            height: self.board.height,
            grid,
            difficulty,
        }
    }

    // ==================== Inner loop ====================

    fn prepare_new_topology(&mut self, topo: &TopologyParams) -> bool {
        if !self.board.generate_topology(topo) {
            return false;
        }
        if self.board.whites().len() < MIN_USABLE_CELLS {
            return false;
        }
        self.board.collect_whites();
        self.board.identify_sectors();
        true
    }

    fn attempt_fill_and_validate(&mut self, params: &FillParams, deadline: Deadline) -> bool {
        let mut constraints: Vec<ValueConstraint> = Vec::new();
        let mut fills_for_topology = 0usize;

        for _ in 0..MAX_FILL_ATTEMPTS * MAX_REPAIR_ROUNDS {
            if deadline.expired() {
                return false;
            }
            self.board.reset_values();

            if !Filler::with_deadline(&mut self.board, deadline).fill(
                params,
                &[],
                &constraints,
                true,
            ) {
                // Learned constraints may have over-constrained the search;
                // drop them once. An unconstrained failure damns the
                // topology itself.
                if !constraints.is_empty() {
                    constraints.clear();
                    continue;
                }
                return false;
            }

            self.board.derive_clues();

            if self.has_high_global_ambiguity() {
                continue;
            }

            let witness = match robust_check(&mut self.board, UNIQUENESS_NODES, Some(deadline)) {
                UniquenessOutcome::Unique => {
                    let result = Estimator::new(&mut self.board).estimate();
                    if result.solution_count == 1 {
                        return true;
                    }
                    // The counter disagrees; treat as ambiguous without a
                    // witness to learn from.
                    None
                }
                UniquenessOutcome::Multiple(w) => Some(w),
                UniquenessOutcome::Inconclusive => continue,
            };

            if deadline.expired() {
                return false;
            }

            fills_for_topology += 1;
            if let Some(w) = &witness {
                if let Some(learned) = self.learn_constraint(w) {
                    constraints.push(learned);
                }
            }
            if fills_for_topology < MAX_FILL_ATTEMPTS {
                continue;
            }

            self.board.collect_whites();
            self.board.identify_sectors();
            self.log_uniqueness_conflict(witness.as_ref());

            match witness {
                Some(w) if self.repair_topology(&w) => {
                    fills_for_topology = 0;
                    constraints.clear();
                }
                _ => return false,
            }
        }
        false
    }

    /// Reject fills whose clue set leaves too much slack: three or more
    /// cells with at least four clue-feasible digits.
    fn has_high_global_ambiguity(&mut self) -> bool {
        let mut bad = Vec::new();
        for &cell in self.board.whites() {
            let d = domain_size(&self.board, &ValueSource::CluesOnly, cell, false);
            if d >= 4 {
                bad.push(self.board.coords(cell));
            }
        }
        if bad.len() < 3 {
            return false;
        }
        if self.board.logger.is_enabled() {
            let snap = self.board.snapshot(None);
            self.board.logger.log_step_with_highlights(
                stage::FILLING,
                substage::AMBIGUITY_REJECTION,
                &format!(
                    "Rejecting fill: high global ambiguity ({} cells)",
                    bad.len()
                ),
                &snap,
                &bad,
                None,
            );
        }
        true
    }

    /// Forbid the current value at the highest-degree cell where the fill
    /// and the witness disagree; the next fill is forced to differ there.
    fn learn_constraint(&self, witness: &Witness) -> Option<ValueConstraint> {
        let mut best: Option<(usize, usize)> = None; // (cell, degree)
        for &cell in self.board.whites() {
            let coords = self.board.coords(cell);
            let (Some(current), Some(&alt)) = (self.board.value(cell), witness.get(&coords))
            else {
                continue;
            };
            if current == alt {
                continue;
            }
            let degree = self.board.count_white_neighbors(cell);
            if best.map_or(true, |(_, d)| degree > d) {
                best = Some((cell, degree));
            }
        }
        best.map(|(cell, _)| ValueConstraint {
            cell,
            values: DigitSet::single(self.board.value(cell).unwrap()),
        })
    }

    /// Surgically block one of the cells where the fill and witness
    /// differ, re-stabilize, and accept the first variant that actually
    /// changed the grid and still validates.
    fn repair_topology(&mut self, witness: &Witness) -> bool {
        let mut diffs: Vec<(usize, usize)> = self
            .board
            .whites()
            .iter()
            .filter_map(|&cell| {
                let coords = self.board.coords(cell);
                match (self.board.value(cell), witness.get(&coords)) {
                    (Some(current), Some(&alt)) if current != alt => Some(coords),
                    _ => None,
                }
            })
            .collect();
        if diffs.is_empty() {
            return false;
        }
        diffs.shuffle(&mut self.board.rng);

        let backup: Vec<bool> = (0..self.board.cell_count())
            .map(|i| self.board.cell(i).is_white())
            .collect();
        let allow_bridge = self.repair_strategy == RepairStrategy::BlockOrBridge;

        for &(r, c) in diffs.iter().take(MAX_REPAIR_CANDIDATES) {
            self.restore_kinds(&backup);
            if !self.board.try_remove_and_reconnect(r, c, allow_bridge) {
                continue;
            }
            self.board.stabilize_after_repair();

            let changed = (0..self.board.cell_count())
                .any(|i| backup[i] != self.board.cell(i).is_white());
            if !changed {
                self.log_repair("Topology repair did not change the board");
                continue;
            }

            self.board.identify_sectors();
            if !self.board.validate_structure() {
                self.log_repair("Topology repair produced an invalid board");
                continue;
            }
            if self.board.whites().len() <= MIN_USABLE_CELLS {
                self.log_repair("Topology repair left too few cells");
                continue;
            }

            self.log_repair("Topology repaired successfully");
            return true;
        }

        self.restore_kinds(&backup);
        false
    }

    fn restore_kinds(&mut self, backup: &[bool]) {
        for idx in 0..self.board.cell_count() {
            if backup[idx] != self.board.cell(idx).is_white() {
                let (r, c) = self.board.coords(idx);
                if backup[idx] {
                    self.board.set_white(r, c);
                } else {
                    self.board.set_block(r, c);
                }
            }
        }
        self.board.collect_whites();
        self.board.identify_sectors();
    }

    // ==================== Logging helpers ====================

    fn log_filling(&mut self, sub: &str, message: &str) {
        if self.board.logger.is_enabled() {
            let snap = self.board.snapshot(None);
            self.board.logger.log_step(stage::FILLING, sub, message, &snap);
        }
    }

    fn log_repair(&mut self, message: &str) {
        if self.board.logger.is_enabled() {
            let snap = self.board.snapshot(None);
            self.board
                .logger
                .log_step(stage::TOPOLOGY, substage::REPAIR_ATTEMPT, message, &snap);
        }
    }

    fn log_uniqueness_conflict(&mut self, witness: Option<&Witness>) {
        let Some(witness) = witness else { return };
        if !self.board.logger.is_enabled() {
            return;
        }
        let mut overlay = vec![None; self.board.cell_count()];
        let mut highlights = Vec::new();
        for &cell in self.board.whites() {
            let coords = self.board.coords(cell);
            if let Some(&alt) = witness.get(&coords) {
                overlay[cell] = Some(alt);
                if self.board.value(cell) != Some(alt) {
                    highlights.push(coords);
                }
            }
        }
        let base = self.board.snapshot(None);
        let alt = self.board.snapshot(Some(&overlay));
        self.board.logger.log_step_with_highlights(
            stage::FILLING,
            substage::UNIQUENESS_CONFLICT,
            "Uniqueness conflict: multiple solutions found",
            &base,
            &highlights,
            Some(&alt),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_committed_puzzle(board: &Board) {
        // Symmetry.
        for r in 0..board.height {
            for c in 0..board.width {
                let (sr, sc) = board.symmetric(r, c);
                assert_eq!(board.is_white(r, c), board.is_white(sr, sc));
            }
        }
        // Sector sums match clues; digits distinct.
        for (sid, sector) in board.sectors().iter().enumerate() {
            assert!((2..=9).contains(&sector.len()));
            let mut seen = DigitSet::empty();
            let mut sum = 0u32;
            for &cell in &sector.cells {
                let v = board.value(cell).expect("committed value");
                assert!(!seen.contains(v));
                seen.insert(v);
                sum += v as u32;
            }
            assert_eq!(board.sector_clue(sid), Some(sum));
        }
        assert!(board.check_connectivity());
        assert!(board.validate_structure());
    }

    #[test]
    fn test_generate_very_easy_puzzle() {
        let mut generated = None;
        for seed in 0..4 {
            let mut gen = PuzzleGenerator::with_seed(9, 9, 500 + seed);
            if gen.generate_with_difficulty(Difficulty::VeryEasy) {
                generated = Some(gen);
                break;
            }
        }
        let mut gen = generated.expect("generation should succeed for some seed");
        assert_committed_puzzle(&gen.board);

        let puzzle = gen.export();
        assert_eq!(puzzle.difficulty.solution_count, 1);
        assert_eq!(puzzle.width, 9);
        assert_eq!(puzzle.height, 9);
        // Whites carry solutions, blocks carry the clues.
        for (r, row) in puzzle.grid.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                match cell.kind {
                    PuzzleCellKind::White => {
                        assert!(cell.solution.is_some());
                        assert!(cell.clue_h.is_none() && cell.clue_v.is_none());
                        assert!(gen.board.is_white(r, c));
                    }
                    PuzzleCellKind::Block => {
                        assert!(cell.solution.is_none());
                    }
                }
            }
        }
    }

    #[test]
    fn test_minimum_grid_fails_cleanly() {
        // A 5x5 grid cannot host very_easy's 16-cell minimum: generation
        // must return false without panicking or leaving a puzzle behind.
        let mut gen = PuzzleGenerator::with_seed(5, 5, 11);
        gen.set_time_limit(Duration::from_secs(5));
        assert!(!gen.generate_with_difficulty(Difficulty::VeryEasy));
    }

    #[test]
    fn test_learn_constraint_prefers_high_degree() {
        let mut gen = PuzzleGenerator::with_seed(5, 5, 11);
        for r in 1..4 {
            for c in 1..4 {
                gen.board.set_white(r, c);
            }
        }
        gen.board.collect_whites();
        gen.board.identify_sectors();
        let values = [[1u8, 2, 3], [4, 5, 6], [7, 8, 9]];
        for r in 1..4 {
            for c in 1..4 {
                let idx = gen.board.index(r, c);
                gen.board.set_value(idx, Some(values[r - 1][c - 1]));
            }
        }

        // Witness differs at a corner (2 neighbors) and the center (4).
        let mut witness = Witness::new();
        for r in 1..4 {
            for c in 1..4 {
                witness.insert((r, c), values[r - 1][c - 1]);
            }
        }
        witness.insert((1, 1), 9);
        witness.insert((2, 2), 1);

        let learned = gen.learn_constraint(&witness).expect("constraint");
        assert_eq!(learned.cell, gen.board.index(2, 2));
        assert_eq!(learned.values, DigitSet::single(5));
    }

    #[test]
    fn test_ambiguity_detection() {
        // Magic 3x3 clue set: the three middle-row cells all keep wide
        // clue-only domains.
        let mut gen = PuzzleGenerator::with_seed(5, 5, 11);
        for r in 1..4 {
            for c in 1..4 {
                gen.board.set_white(r, c);
            }
        }
        gen.board.collect_whites();
        gen.board.identify_sectors();
        let values = [[1u8, 2, 3], [4, 5, 6], [7, 8, 9]];
        for r in 1..4 {
            for c in 1..4 {
                let idx = gen.board.index(r, c);
                gen.board.set_value(idx, Some(values[r - 1][c - 1]));
            }
        }
        gen.board.derive_clues();
        assert!(gen.has_high_global_ambiguity());
    }

    #[test]
    fn test_export_of_unique_board() {
        let mut gen = PuzzleGenerator::with_seed(5, 5, 11);
        for r in 1..3 {
            for c in 1..3 {
                gen.board.set_white(r, c);
            }
        }
        gen.board.collect_whites();
        gen.board.identify_sectors();
        gen.board.set_value(gen.board.index(1, 1), Some(1));
        gen.board.set_value(gen.board.index(1, 2), Some(2));
        gen.board.set_value(gen.board.index(2, 1), Some(3));
        gen.board.set_value(gen.board.index(2, 2), Some(1));
        gen.board.derive_clues();

        let puzzle = gen.export();
        assert_eq!(puzzle.difficulty.solution_count, 1);
        assert_eq!(puzzle.grid[1][0].clue_h, Some(3));
        assert_eq!(puzzle.grid[2][0].clue_h, Some(4));
        assert_eq!(puzzle.grid[0][1].clue_v, Some(4));
        assert_eq!(puzzle.grid[0][2].clue_v, Some(3));
        assert_eq!(puzzle.grid[1][1].solution, Some(1));
        assert_eq!(puzzle.grid[2][2].solution, Some(1));

        // Round-trips through serde as the documented shape.
        let json = serde_json::to_value(&puzzle).unwrap();
        assert_eq!(json["grid"][1][1]["type"], "WHITE");
        assert_eq!(json["grid"][1][0]["type"], "BLOCK");
        assert_eq!(json["grid"][1][0]["clue_h"], 3);
    }

    #[test]
    fn test_repair_strategy_accessors() {
        let mut gen = PuzzleGenerator::with_seed(6, 6, 1);
        gen.set_repair_strategy(RepairStrategy::BlockOnly);
        gen.set_time_limit(Duration::from_secs(10));
        assert_eq!(gen.repair_strategy, RepairStrategy::BlockOnly);
    }
}
