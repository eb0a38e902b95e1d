//! Difficulty estimation.
//!
//! A bitmask solver that applies a fixed ladder of human techniques,
//! restarting from the top whenever one makes progress. The hardest
//! technique used decides the rating; the sum of `weight * cells_affected`
//! over the logged steps is the effort score. Solution counting runs as an
//! independent bounded search and feeds the uniqueness verdict.

mod types;

pub use types::{
    DifficultyResult, Rating, SolveStep, Technique, TechniqueWeights, Tier, Uniqueness,
};

use crate::board::{Board, Orientation};
use crate::logger::{stage, substage};
use crate::partitions::{partition_mask, partitions};
use crate::DigitSet;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

const MAX_NODES: u64 = 50_000_000;
const TIME_LIMIT: Duration = Duration::from_secs(5);
const SOLUTION_LIMIT: usize = 3;

struct SectorFacts {
    cells: Vec<usize>,
    clue: u32,
}

pub struct Estimator<'a> {
    board: &'a mut Board,
    sectors: Vec<SectorFacts>,
    /// `(clue, length)` of the horizontal / vertical sector per cell.
    cell_h: Vec<Option<(u32, usize)>>,
    cell_v: Vec<Option<(u32, usize)>>,
    weights: TechniqueWeights,
    solve_log: Vec<SolveStep>,
    found_solutions: Vec<HashMap<usize, u8>>,
    logged_singles: HashSet<usize>,
    nodes: u64,
    max_nodes: u64,
    time_limit: Duration,
    started: Instant,
    aborted: bool,
}

impl<'a> Estimator<'a> {
    pub fn new(board: &'a mut Board) -> Self {
        Self::with_weights(board, TechniqueWeights::default())
    }

    pub fn with_weights(board: &'a mut Board, weights: TechniqueWeights) -> Self {
        let mut cell_h = vec![None; board.cell_count()];
        let mut cell_v = vec![None; board.cell_count()];
        let mut sectors = Vec::new();

        for (sid, sector) in board.sectors().iter().enumerate() {
            let Some(clue) = board.sector_clue(sid) else {
                continue;
            };
            let len = sector.len();
            for &cell in &sector.cells {
                match sector.orientation {
                    Orientation::Horizontal => cell_h[cell] = Some((clue, len)),
                    Orientation::Vertical => cell_v[cell] = Some((clue, len)),
                }
            }
            sectors.push(SectorFacts {
                cells: sector.cells.clone(),
                clue,
            });
        }

        Self {
            board,
            sectors,
            cell_h,
            cell_v,
            weights,
            solve_log: Vec::new(),
            found_solutions: Vec::new(),
            logged_singles: HashSet::new(),
            nodes: 0,
            max_nodes: MAX_NODES,
            time_limit: TIME_LIMIT,
            started: Instant::now(),
            aborted: false,
        }
    }

    /// Run the technique ladder and the solution count, producing the full
    /// difficulty record. Never fails; budget exhaustion yields a
    /// best-effort rating flagged inconclusive.
    pub fn estimate(&mut self) -> DifficultyResult {
        self.solve_log.clear();
        self.found_solutions.clear();
        self.logged_singles.clear();
        self.nodes = 0;
        self.aborted = false;
        self.started = Instant::now();

        if self.board.whites().is_empty() || self.sectors.is_empty() {
            return DifficultyResult::default();
        }

        if self.board.logger.is_enabled() {
            let snap = self.board.snapshot(None);
            self.board.logger.log_step(
                stage::DIFFICULTY,
                substage::START,
                "Starting difficulty analysis",
                &snap,
            );
        }

        let mut masks = vec![DigitSet::all(); self.board.cell_count()];
        self.run_solve_loop(&mut masks, false);

        // Count solutions from scratch; the ladder state must not leak in.
        let fresh = vec![DigitSet::all(); self.board.cell_count()];
        self.discover_solutions(fresh, SOLUTION_LIMIT);

        let mut highest = Tier::VeryEasy;
        let mut effort = 0.0f32;
        for step in &self.solve_log {
            let tier = step.technique.tier();
            if tier > highest {
                highest = tier;
            }
            effort += self.weights.effort(step.technique) * step.cells_affected as f32;
        }

        let mut result = DifficultyResult {
            rating: highest.rating(),
            score: effort,
            max_tier: highest,
            total_steps: self.solve_log.len(),
            solution_count: self.found_solutions.len(),
            uniqueness: match self.found_solutions.len() {
                0 => Uniqueness::NoSolution,
                1 => Uniqueness::Unique,
                _ => Uniqueness::Multiple,
            },
            solve_path: self.solve_log.clone(),
        };
        if self.aborted {
            result.rating = Rating::Unsolvable;
            result.uniqueness = Uniqueness::Inconclusive;
        }

        if self.board.logger.is_enabled() {
            let snap = self.board.snapshot(None);
            self.board.logger.log_difficulty(&result, &snap);
        }
        result
    }

    /// Effort score only.
    pub fn estimate_score(&mut self) -> f32 {
        self.estimate().score
    }

    // ==================== Solve loop ====================

    fn run_solve_loop(&mut self, masks: &mut Vec<DigitSet>, silent: bool) {
        let mut changed = true;
        let mut iterations = 0;
        while changed && iterations < 100 {
            if self.limit_exceeded() {
                return;
            }
            iterations += 1;
            changed = self.apply_logic_pass(masks, silent, iterations);
        }

        let solved = self
            .board
            .whites()
            .iter()
            .all(|&c| masks[c].count() == 1);
        if !solved && !silent && !self.limit_exceeded() {
            self.solve_log.push(SolveStep {
                technique: Technique::TrialAndError,
                weight: self.weights.reported(Technique::TrialAndError),
                cells_affected: 0,
            });
            self.try_bifurcation(masks);
        }
    }

    /// One pass down the ladder; returns at the first technique that makes
    /// progress so the next pass restarts from the top.
    fn apply_logic_pass(&mut self, masks: &mut Vec<DigitSet>, silent: bool, iteration: u32) -> bool {
        if self.find_unique_intersections(masks, silent) {
            return true;
        }
        if self.find_naked_singles(masks, silent, iteration) {
            return true;
        }
        if self.apply_constraint_propagation(masks, silent) {
            return true;
        }
        if self.apply_simple_partitions(masks, silent) {
            return true;
        }
        if self.find_hidden_singles(masks, silent) {
            return true;
        }
        if iteration > 2 && self.analyze_complex_intersections(masks, silent) {
            return true;
        }
        false
    }

    // ==================== Techniques ====================

    /// T1: intersect each cell's mask with the partition masks of both of
    /// its clues.
    fn find_unique_intersections(&mut self, masks: &mut [DigitSet], silent: bool) -> bool {
        let mut changed = false;
        let mut affected = 0;
        for &cell in self.board.whites() {
            if masks[cell].count() <= 1 {
                continue;
            }
            let h = self.cell_h[cell]
                .map(|(clue, len)| partition_mask(clue, len))
                .unwrap_or_else(DigitSet::all);
            let v = self.cell_v[cell]
                .map(|(clue, len)| partition_mask(clue, len))
                .unwrap_or_else(DigitSet::all);
            let new = masks[cell] & h & v;
            if new != masks[cell] {
                masks[cell] = new;
                changed = true;
                if new.count() == 1 {
                    affected += 1;
                }
            }
        }
        if affected > 0 && !silent {
            self.log_technique(Technique::UniqueIntersection, affected, masks);
        }
        changed
    }

    /// T1: report cells whose mask collapsed to one digit. Each cell is
    /// reported once per estimation.
    fn find_naked_singles(&mut self, masks: &[DigitSet], silent: bool, iteration: u32) -> bool {
        if !silent && iteration == 1 {
            self.logged_singles.clear();
        }
        let mut newly = 0;
        for &cell in self.board.whites() {
            if masks[cell].count() == 1 && !self.logged_singles.contains(&cell) {
                if !silent {
                    self.logged_singles.insert(cell);
                }
                newly += 1;
            }
        }
        if newly > 0 && !silent {
            self.log_technique(Technique::EliminationSingles, newly, masks);
            return true;
        }
        false
    }

    /// T3: partition-mask filter, sum reachability, and solved-digit
    /// exclusion per sector.
    fn apply_constraint_propagation(&mut self, masks: &mut [DigitSet], silent: bool) -> bool {
        let mut changed = false;
        let mut affected = 0;
        for i in 0..self.sectors.len() {
            if self.apply_sector_constraints(i, masks) {
                changed = true;
                affected += self.sectors[i].cells.len();
            }
        }
        if changed && !silent {
            self.log_technique(Technique::ConstraintPropagation, affected, masks);
        }
        changed
    }

    fn apply_sector_constraints(&mut self, sector_idx: usize, masks: &mut [DigitSet]) -> bool {
        if self.aborted {
            return false;
        }
        let sec = &self.sectors[sector_idx];
        let n = sec.cells.len();
        let mut changed = false;

        // Step 1: digits outside every partition are gone immediately.
        let allowed = partition_mask(sec.clue, n);
        for &c in &sec.cells {
            let old = masks[c];
            masks[c] &= allowed;
            if masks[c] != old {
                changed = true;
            }
        }

        // Step 2: reachability. A digit survives only if the other cells'
        // extremes still bracket the clue.
        if n > 1 {
            let mut mins = vec![0i32; n];
            let mut maxs = vec![0i32; n];
            let mut total_min = 0i32;
            let mut total_max = 0i32;
            for (i, &c) in sec.cells.iter().enumerate() {
                let mi = masks[c].min_digit().map(|d| d as i32).unwrap_or(10);
                let ma = masks[c].max_digit().map(|d| d as i32).unwrap_or(0);
                mins[i] = mi;
                maxs[i] = ma;
                total_min += mi;
                total_max += ma;
            }
            let clue = sec.clue as i32;
            for (i, &c) in sec.cells.iter().enumerate() {
                let others_min = total_min - mins[i];
                let others_max = total_max - maxs[i];
                let mut new_mask = masks[c];
                for v in masks[c].iter() {
                    let v = v as i32;
                    if v + others_min > clue || v + others_max < clue {
                        new_mask.remove(v as u8);
                    }
                }
                if new_mask != masks[c] {
                    masks[c] = new_mask;
                    changed = true;
                }
            }
        }

        // Step 3: a solved digit is excluded from the rest of the sector.
        let mut solved = DigitSet::empty();
        for &c in &sec.cells {
            if masks[c].count() == 1 {
                solved |= masks[c];
            }
        }
        for &c in &sec.cells {
            if masks[c].count() > 1 {
                let old = masks[c];
                masks[c] = DigitSet::from_bits(old.bits() & !solved.bits());
                if masks[c] != old {
                    changed = true;
                }
            }
        }

        changed
    }

    /// T2: a sector with exactly one valid partition pins its digit set.
    fn apply_simple_partitions(&mut self, masks: &mut [DigitSet], silent: bool) -> bool {
        let mut changed = false;
        let mut affected = 0;
        for sec in &self.sectors {
            let table = partitions(sec.clue, sec.cells.len());
            if table.count() != 1 {
                continue;
            }
            for &c in &sec.cells {
                let old = masks[c];
                masks[c] &= table.mask;
                if masks[c] != old {
                    changed = true;
                    affected += 1;
                }
            }
        }
        if affected > 0 && !silent {
            self.log_technique(Technique::SimplePartition, affected, masks);
        }
        changed
    }

    /// T3: a digit possible in exactly one cell of a sector lands there.
    fn find_hidden_singles(&mut self, masks: &mut [DigitSet], silent: bool) -> bool {
        let mut affected = 0;
        for sec in &self.sectors {
            for v in 1..=9u8 {
                let mut target = None;
                let mut count = 0;
                for &c in &sec.cells {
                    if masks[c].contains(v) {
                        count += 1;
                        target = Some(c);
                    }
                }
                if count == 1 {
                    let c = target.unwrap();
                    if masks[c].count() > 1 {
                        masks[c] = DigitSet::single(v);
                        affected += 1;
                    }
                }
            }
        }
        if affected > 0 {
            if !silent {
                self.log_technique(Technique::HiddenSingles, affected, masks);
            }
            return true;
        }
        false
    }

    /// T4: keep only digits present in at least one partition of every
    /// sector the cell belongs to.
    fn analyze_complex_intersections(&mut self, masks: &mut [DigitSet], silent: bool) -> bool {
        let mut changed = false;
        let mut affected = 0;
        for &cell in self.board.whites() {
            if masks[cell].count() <= 1 {
                continue;
            }
            let mut valid = DigitSet::empty();
            'vals: for v in masks[cell].iter() {
                for facts in [self.cell_h[cell], self.cell_v[cell]].into_iter().flatten() {
                    let (clue, len) = facts;
                    let table = partitions(clue, len);
                    if !table.sets.iter().any(|p| p.contains(&v)) {
                        continue 'vals;
                    }
                }
                valid.insert(v);
            }
            if !valid.is_empty() && valid != masks[cell] {
                masks[cell] = valid;
                changed = true;
                affected += 1;
            }
        }
        if changed && !silent {
            self.log_technique(Technique::ComplexIntersection, affected, masks);
        }
        changed
    }

    /// T5: MRV cell, speculative digit, silent ladder run per candidate.
    /// Commits the first branch that solves everything.
    fn try_bifurcation(&mut self, masks: &mut Vec<DigitSet>) -> bool {
        if self.limit_exceeded() {
            return false;
        }
        let mut target = None;
        let mut min_b = 10;
        for &c in self.board.whites() {
            let b = masks[c].count();
            if b > 1 && b < min_b {
                min_b = b;
                target = Some(c);
            }
        }
        let Some(target) = target else {
            return true;
        };

        for v in masks[target].iter() {
            if self.limit_exceeded() {
                return false;
            }
            let mut test = masks.clone();
            test[target] = DigitSet::single(v);
            self.run_solve_loop(&mut test, true);
            let solved = self
                .board
                .whites()
                .iter()
                .all(|&c| test[c].count() == 1);
            if solved {
                *masks = test;
                return true;
            }
        }
        false
    }

    // ==================== Solution counting ====================

    fn discover_solutions(&mut self, mut masks: Vec<DigitSet>, limit: usize) {
        if self.found_solutions.len() >= limit || self.limit_exceeded() {
            return;
        }
        for _ in 0..3 {
            let mut progress = false;
            for i in 0..self.sectors.len() {
                if self.apply_sector_constraints(i, &mut masks) {
                    progress = true;
                }
            }
            if !progress {
                break;
            }
        }
        for &c in self.board.whites() {
            if masks[c].is_empty() {
                return;
            }
        }

        let mut mrv = None;
        let mut min_b = 10;
        for &c in self.board.whites() {
            let b = masks[c].count();
            if b > 1 && b < min_b {
                min_b = b;
                mrv = Some(c);
            }
        }

        let Some(mrv) = mrv else {
            let mut sol = HashMap::new();
            for &c in self.board.whites() {
                match masks[c].solo() {
                    Some(d) => {
                        sol.insert(c, d);
                    }
                    None => return,
                }
            }
            if self.verify_math(&sol) && !self.found_solutions.contains(&sol) {
                self.found_solutions.push(sol);
            }
            return;
        };

        let mask = masks[mrv];
        for v in mask.iter() {
            if self.aborted {
                break;
            }
            let mut branch = masks.clone();
            branch[mrv] = DigitSet::single(v);
            self.discover_solutions(branch, limit);
            if self.found_solutions.len() >= limit {
                break;
            }
        }
    }

    fn verify_math(&self, sol: &HashMap<usize, u8>) -> bool {
        for sec in &self.sectors {
            let mut sum = 0u32;
            let mut seen = DigitSet::empty();
            for &c in &sec.cells {
                let Some(&v) = sol.get(&c) else {
                    return false;
                };
                sum += v as u32;
                seen.insert(v);
            }
            if sum != sec.clue || seen.count() as usize != sec.cells.len() {
                return false;
            }
        }
        true
    }

    // ==================== Infrastructure ====================

    fn limit_exceeded(&mut self) -> bool {
        if self.aborted {
            return true;
        }
        self.nodes += 1;
        if self.nodes > self.max_nodes {
            self.aborted = true;
            return true;
        }
        if self.nodes % 500 == 0 && self.started.elapsed() > self.time_limit {
            self.aborted = true;
            return true;
        }
        false
    }

    fn log_technique(&mut self, technique: Technique, affected: usize, masks: &[DigitSet]) {
        self.solve_log.push(SolveStep {
            technique,
            weight: self.weights.reported(technique),
            cells_affected: affected,
        });
        if self.board.logger.is_enabled() {
            let mut overlay = vec![None; self.board.cell_count()];
            for &c in self.board.whites() {
                overlay[c] = masks[c].solo();
            }
            let snap = self.board.snapshot(Some(&overlay));
            self.board.logger.log_step(
                stage::DIFFICULTY,
                substage::LOGIC_STEP,
                &format!("Applied {}: {} cells affected", technique, affected),
                &snap,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 5x5 board, 3x3 white interior with the magic clue set
    /// (rows 6/15/24, columns 12/15/18). Several assignments satisfy it;
    /// it exercises the clue structure, not uniqueness.
    fn magic_board() -> Board {
        let mut b = Board::with_seed(5, 5, 7);
        for r in 1..4 {
            for c in 1..4 {
                b.set_white(r, c);
            }
        }
        b.collect_whites();
        b.identify_sectors();
        let values = [[1u8, 2, 3], [4, 5, 6], [7, 8, 9]];
        for r in 1..4 {
            for c in 1..4 {
                let idx = b.index(r, c);
                b.set_value(idx, Some(values[r - 1][c - 1]));
            }
        }
        b.derive_clues();
        b
    }

    /// 2x2 white square clued rows 3/4, columns 4/3; the intersection of
    /// the partition masks pins the corner and the solution [[1,2],[3,1]]
    /// is unique.
    fn unique_board() -> Board {
        let mut b = Board::with_seed(5, 5, 7);
        for r in 1..3 {
            for c in 1..3 {
                b.set_white(r, c);
            }
        }
        b.collect_whites();
        b.identify_sectors();
        b.set_value(b.index(1, 1), Some(1));
        b.set_value(b.index(1, 2), Some(2));
        b.set_value(b.index(2, 1), Some(3));
        b.set_value(b.index(2, 2), Some(1));
        b.derive_clues();
        b
    }

    /// 2x2 white square with every sector clued 5: multiple solutions.
    fn ambiguous_board() -> Board {
        let mut b = Board::with_seed(5, 5, 7);
        for r in 1..3 {
            for c in 1..3 {
                b.set_white(r, c);
            }
        }
        b.collect_whites();
        b.identify_sectors();
        b.set_value(b.index(1, 1), Some(1));
        b.set_value(b.index(1, 2), Some(4));
        b.set_value(b.index(2, 1), Some(4));
        b.set_value(b.index(2, 2), Some(1));
        b.derive_clues();
        b
    }

    #[test]
    fn test_unique_board_estimate() {
        let mut b = unique_board();
        let result = Estimator::new(&mut b).estimate();
        assert_eq!(result.solution_count, 1);
        assert_eq!(result.uniqueness, Uniqueness::Unique);
        assert!(result.max_tier <= Tier::Medium, "got {:?}", result.max_tier);
        assert!(result.score > 0.0);
        assert!(!result.solve_path.is_empty());
        assert_eq!(result.total_steps, result.solve_path.len());
    }

    #[test]
    fn test_ambiguous_board_estimate() {
        let mut b = ambiguous_board();
        let result = Estimator::new(&mut b).estimate();
        assert!(result.solution_count >= 2);
        assert_eq!(result.uniqueness, Uniqueness::Multiple);
    }

    #[test]
    fn test_simple_partition_narrows_row() {
        let mut b = magic_board();
        let cells: Vec<usize> = (1..4).map(|c| b.index(1, c)).collect();
        let mut est = Estimator::new(&mut b);
        let mut masks = vec![DigitSet::all(); est.board.cell_count()];
        assert!(est.apply_simple_partitions(&mut masks, true));
        // Row 1 is clued 6 over 3 cells: the only partition is {1,2,3}.
        let expected = DigitSet::single(1) | DigitSet::single(2) | DigitSet::single(3);
        for c in cells {
            assert_eq!(masks[c], expected);
        }
    }

    #[test]
    fn test_sector_reachability_pruning() {
        let mut b = magic_board();
        let cells: Vec<usize> = (1..4).map(|c| b.index(3, c)).collect();
        let mut est = Estimator::new(&mut b);
        let mut masks = vec![DigitSet::all(); est.board.cell_count()];
        // Row 3 (clue 24, length 3) admits only {7,8,9}.
        let row3 = est
            .sectors
            .iter()
            .position(|s| s.clue == 24 && s.cells == cells)
            .expect("row sector");
        assert!(est.apply_sector_constraints(row3, &mut masks));
        let expected = DigitSet::single(7) | DigitSet::single(8) | DigitSet::single(9);
        for c in cells {
            assert_eq!(masks[c], expected);
        }
    }

    #[test]
    fn test_hidden_single_fires() {
        let mut b = magic_board();
        let left = b.index(1, 1);
        let mid = b.index(1, 2);
        let right = b.index(1, 3);
        let mut est = Estimator::new(&mut b);
        let mut masks = vec![DigitSet::empty(); est.board.cell_count()];
        // Solve everything except row 1, where 3 is only possible on the
        // right.
        let values = [[1u8, 2, 3], [4, 5, 6], [7, 8, 9]];
        for r in 1..4 {
            for c in 1..4 {
                let idx = est.board.index(r, c);
                masks[idx] = DigitSet::single(values[r - 1][c - 1]);
            }
        }
        let pair = DigitSet::single(1) | DigitSet::single(2);
        masks[left] = pair;
        masks[mid] = pair;
        masks[right] = pair | DigitSet::single(3);
        assert!(est.find_hidden_singles(&mut masks, true));
        assert_eq!(masks[right], DigitSet::single(3));
    }

    #[test]
    fn test_solved_digit_excluded_from_sector() {
        let mut b = magic_board();
        let left = b.index(2, 1);
        let mid = b.index(2, 2);
        let mut est = Estimator::new(&mut b);
        let mut masks = vec![DigitSet::all(); est.board.cell_count()];
        masks[left] = DigitSet::single(4);
        let row2 = est
            .sectors
            .iter()
            .position(|s| s.clue == 15 && s.cells.contains(&mid))
            .expect("row sector");
        est.apply_sector_constraints(row2, &mut masks);
        assert!(!masks[mid].contains(4));
    }

    #[test]
    fn test_budget_abort_is_inconclusive() {
        let mut b = unique_board();
        let mut est = Estimator::new(&mut b);
        est.max_nodes = 1;
        let result = est.estimate();
        assert_eq!(result.rating, Rating::Unsolvable);
        assert_eq!(result.uniqueness, Uniqueness::Inconclusive);
    }

    #[test]
    fn test_custom_weights_scale_score() {
        let mut b = unique_board();
        let base = Estimator::new(&mut b).estimate();
        let mut doubled = TechniqueWeights::default();
        doubled.unique_intersection *= 2.0;
        doubled.elimination_singles *= 2.0;
        doubled.simple_partition *= 2.0;
        doubled.hidden_singles *= 2.0;
        doubled.constraint_propagation *= 2.0;
        doubled.complex_intersection *= 2.0;
        doubled.trial_and_error *= 2.0;
        let scaled = Estimator::with_weights(&mut b, doubled).estimate();
        assert!((scaled.score - base.score * 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_empty_board_defaults() {
        let mut b = Board::with_seed(5, 5, 7);
        b.collect_whites();
        b.identify_sectors();
        let result = Estimator::new(&mut b).estimate();
        assert_eq!(result, DifficultyResult::default());
    }
}
