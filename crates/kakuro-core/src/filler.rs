//! CSP filler.
//!
//! Assigns digits to the white cells by backtracking with MRV variable
//! selection. Value ordering is difficulty-biased: either perturbed static
//! digit weights, or a partition-aware score that steers sector sums toward
//! clues with few valid partitions (easier puzzles read off the partition
//! table directly).

use crate::board::{Board, Orientation};
use crate::config::{FillParams, PartitionPreference};
use crate::logger::{stage, substage};
use crate::partitions::partition_count;
use crate::{Deadline, DigitSet};
use rand::Rng;

/// Forbidden digits for one cell, learned from failed uniqueness checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueConstraint {
    pub cell: usize,
    pub values: DigitSet,
}

/// Where a consistency check reads peer values from.
pub(crate) enum ValueSource<'a> {
    /// Values committed on the board.
    Committed,
    /// A transient assignment, falling back to committed values.
    Overlay(&'a [Option<u8>]),
    /// No values at all; only the clues constrain.
    CluesOnly,
}

impl ValueSource<'_> {
    #[inline]
    fn value(&self, board: &Board, idx: usize) -> Option<u8> {
        match self {
            ValueSource::Committed => board.value(idx),
            ValueSource::Overlay(map) => map[idx].or(board.value(idx)),
            ValueSource::CluesOnly => None,
        }
    }
}

/// Full consistency test for `cell <- val`: no duplicate digit in either
/// sector, and (unless `ignore_clues`) the sector sum can still reach its
/// clue exactly.
pub(crate) fn valid_move(
    board: &Board,
    values: &ValueSource<'_>,
    cell: usize,
    val: u8,
    ignore_clues: bool,
) -> bool {
    sector_allows(board, values, cell, val, Orientation::Horizontal, ignore_clues)
        && sector_allows(board, values, cell, val, Orientation::Vertical, ignore_clues)
}

fn sector_allows(
    board: &Board,
    values: &ValueSource<'_>,
    cell: usize,
    val: u8,
    orientation: Orientation,
    ignore_clues: bool,
) -> bool {
    let Some(sid) = board.sector_of(cell, orientation) else {
        return true;
    };
    let sector = board.sector(sid);

    let mut sum = val as u32;
    let mut filled = 1usize;
    let mut used = DigitSet::single(val);
    for &p in &sector.cells {
        if p == cell {
            continue;
        }
        if let Some(v) = values.value(board, p) {
            if v == val {
                return false;
            }
            sum += v as u32;
            used.insert(v);
            filled += 1;
        }
    }

    if ignore_clues {
        return true;
    }

    // A sector without a clue admits no move at all.
    let Some(target) = board.sector_clue(sid) else {
        return false;
    };
    if sum > target {
        return false;
    }

    let remaining = sector.len() - filled;
    if remaining == 0 {
        return sum == target;
    }
    let mut min_rem = 0u32;
    let mut picked = 0;
    for d in 1..=9u8 {
        if !used.contains(d) {
            min_rem += d as u32;
            picked += 1;
            if picked == remaining {
                break;
            }
        }
    }
    let mut max_rem = 0u32;
    picked = 0;
    for d in (1..=9u8).rev() {
        if !used.contains(d) {
            max_rem += d as u32;
            picked += 1;
            if picked == remaining {
                break;
            }
        }
    }
    sum + min_rem <= target && sum + max_rem >= target
}

/// Number of digits passing the full consistency test.
pub(crate) fn domain_size(
    board: &Board,
    values: &ValueSource<'_>,
    cell: usize,
    ignore_clues: bool,
) -> usize {
    (1..=9u8)
        .filter(|&v| valid_move(board, values, cell, v, ignore_clues))
        .count()
}

pub struct Filler<'a> {
    board: &'a mut Board,
    deadline: Option<Deadline>,
    nodes: u32,
}

impl<'a> Filler<'a> {
    pub fn new(board: &'a mut Board) -> Self {
        Self {
            board,
            deadline: None,
            nodes: 0,
        }
    }

    pub fn with_deadline(board: &'a mut Board, deadline: Deadline) -> Self {
        Self {
            board,
            deadline: Some(deadline),
            nodes: 0,
        }
    }

    /// Fill every white cell. `forced` pre-binds cells, `forbidden` digits
    /// are never tried. With `ignore_clues` only the distinct-digits rule
    /// applies (the normal mode while clues do not exist yet). On success
    /// the assignment is committed to the board.
    pub fn fill(
        &mut self,
        params: &FillParams,
        forced: &[(usize, u8)],
        forbidden: &[ValueConstraint],
        ignore_clues: bool,
    ) -> bool {
        let max_nodes = params.max_nodes.unwrap_or(FillParams::DEFAULT_MAX_NODES);
        let (weights, preference) = params.resolve();

        if self.board.logger.is_enabled() && !ignore_clues {
            let snap = self.board.snapshot(None);
            self.board.logger.log_step(
                stage::FILLING,
                substage::START,
                &format!("Starting fill solve, max nodes {}", max_nodes),
                &snap,
            );
        }

        let mut assignment: Vec<Option<u8>> = vec![None; self.board.cell_count()];
        let mut assigned = 0usize;

        for &(cell, val) in forced {
            if !self.board.cell(cell).is_white() {
                continue;
            }
            if forbidden
                .iter()
                .any(|f| f.cell == cell && f.values.contains(val))
            {
                return false; // contradictory constraints
            }
            if !valid_move(
                self.board,
                &ValueSource::Overlay(&assignment),
                cell,
                val,
                ignore_clues,
            ) {
                return false;
            }
            assignment[cell] = Some(val);
            assigned += 1;
        }

        self.nodes = 0;
        let ok = self.backtrack(
            &mut assignment,
            &mut assigned,
            max_nodes,
            &weights,
            ignore_clues,
            preference,
            forbidden,
            params,
        );
        if ok {
            for idx in 0..assignment.len() {
                if let Some(v) = assignment[idx] {
                    self.board.set_value(idx, Some(v));
                }
            }
        }
        ok
    }

    #[allow(clippy::too_many_arguments)]
    fn backtrack(
        &mut self,
        assignment: &mut Vec<Option<u8>>,
        assigned: &mut usize,
        max_nodes: u32,
        weights: &[u32; 9],
        ignore_clues: bool,
        preference: PartitionPreference,
        forbidden: &[ValueConstraint],
        params: &FillParams,
    ) -> bool {
        if self.nodes > max_nodes {
            return false;
        }
        self.nodes += 1;
        if self.nodes % 1000 == 0 {
            if let Some(d) = self.deadline {
                if d.expired() {
                    return false;
                }
            }
        }

        if *assigned == self.board.whites().len() {
            if preference != PartitionPreference::Unbiased && !ignore_clues {
                return self.validate_partition_difficulty(assignment, preference, params);
            }
            return true;
        }

        // MRV: the cell with the smallest live domain.
        let mut var = None;
        let mut min_domain = 10usize;
        for &cell in self.board.whites() {
            if assignment[cell].is_some() {
                continue;
            }
            let d = domain_size(
                self.board,
                &ValueSource::Overlay(assignment),
                cell,
                ignore_clues,
            );
            if d == 0 {
                return false;
            }
            if d < min_domain {
                min_domain = d;
                var = Some(cell);
                if d == 1 {
                    break;
                }
            }
        }
        let Some(var) = var else {
            return true;
        };

        let domain: Vec<u8> = if preference != PartitionPreference::Unbiased {
            self.partition_aware_domain(var, assignment, preference, weights)
        } else {
            let mut scored: Vec<(u8, f64)> = (1..=9u8)
                .map(|v| {
                    let w = weights[(v - 1) as usize] as f64;
                    (v, w * self.board.rng.gen_range(0.01..1.0))
                })
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
            scored.into_iter().map(|(v, _)| v).collect()
        };

        for val in domain {
            if forbidden
                .iter()
                .any(|f| f.cell == var && f.values.contains(val))
            {
                continue;
            }
            if valid_move(
                self.board,
                &ValueSource::Overlay(assignment),
                var,
                val,
                ignore_clues,
            ) {
                assignment[var] = Some(val);
                *assigned += 1;
                if self.backtrack(
                    assignment,
                    assigned,
                    max_nodes,
                    weights,
                    ignore_clues,
                    preference,
                    forbidden,
                    params,
                ) {
                    return true;
                }
                assignment[var] = None;
                *assigned -= 1;
            }
        }
        false
    }

    // ==================== Partition-aware ordering ====================

    /// Candidate digits ordered by partition score (lower = easier clue),
    /// with a small random perturbation to vary the search.
    fn partition_aware_domain(
        &mut self,
        cell: usize,
        assignment: &[Option<u8>],
        preference: PartitionPreference,
        weights: &[u32; 9],
    ) -> Vec<u8> {
        let mut candidates: Vec<(u8, f64)> = Vec::with_capacity(9);

        'vals: for val in 1..=9u8 {
            for orientation in [Orientation::Horizontal, Orientation::Vertical] {
                if let Some(sid) = self.board.sector_of(cell, orientation) {
                    for &p in &self.board.sector(sid).cells {
                        if p != cell && assignment[p] == Some(val) {
                            continue 'vals;
                        }
                    }
                }
            }

            let h = self.partition_score(cell, val, assignment, Orientation::Horizontal, preference);
            let v = self.partition_score(cell, val, assignment, Orientation::Vertical, preference);
            let entropy = self.intersection_entropy(cell, val, assignment);
            let weight = weights[(val - 1) as usize] as f64;
            let combined = (h + v) + 3.0 * entropy * (10.0 / weight.max(1.0));
            candidates.push((val, combined));
        }

        if candidates.is_empty() {
            return (1..=9).collect();
        }

        for cand in candidates.iter_mut() {
            cand.1 += self.board.rng.gen_range(0.0..2.0);
        }
        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        candidates.into_iter().map(|(v, _)| v).collect()
    }

    /// How "easy" the sector containing `cell` becomes if `val` is placed:
    /// actual partition count when the sector completes, otherwise an
    /// average sampled over the reachable sum range.
    fn partition_score(
        &self,
        cell: usize,
        val: u8,
        assignment: &[Option<u8>],
        orientation: Orientation,
        preference: PartitionPreference,
    ) -> f64 {
        let Some(sid) = self.board.sector_of(cell, orientation) else {
            return 0.0;
        };
        let sector = self.board.sector(sid);

        let mut current_sum = val as u32;
        let mut filled = 1usize;
        let mut used = DigitSet::single(val);
        let mut remaining_count = 0usize;
        for &p in &sector.cells {
            if let Some(v) = assignment[p] {
                current_sum += v as u32;
                used.insert(v);
                filled += 1;
            } else if p != cell {
                remaining_count += 1;
            }
        }
        let length = sector.len();

        if filled == length {
            let n = partition_count(current_sum, length);
            return match preference {
                PartitionPreference::Unique => match n {
                    1 => 0.0,
                    2 => 1.0,
                    3..=4 => 5.0,
                    _ => 20.0,
                },
                PartitionPreference::Few => match n {
                    0..=2 => 0.0,
                    3..=4 => 2.0,
                    5..=6 => 5.0,
                    _ => 15.0,
                },
                PartitionPreference::Unbiased => 5.0,
            };
        }

        let available: Vec<u32> = (1..=9u8)
            .filter(|&d| !used.contains(d))
            .map(|d| d as u32)
            .collect();
        if available.len() < remaining_count {
            return 100.0;
        }
        let min_remaining: u32 = available[..remaining_count].iter().sum();
        let max_remaining: u32 = available[available.len() - remaining_count..].iter().sum();
        let min_final = current_sum + min_remaining;
        let max_final = current_sum + max_remaining;

        let mut samples = Vec::new();
        if min_final == max_final {
            samples.push(min_final);
        } else {
            let step = std::cmp::max(1, (max_final - min_final) / 3);
            let mut s = min_final;
            while s <= max_final {
                samples.push(s);
                s += step;
            }
        }
        if samples.is_empty() {
            return 5.0;
        }
        let avg: f64 = samples
            .iter()
            .map(|&s| partition_count(s, length) as f64)
            .sum::<f64>()
            / samples.len() as f64;

        match preference {
            PartitionPreference::Unique => {
                if avg <= 2.0 {
                    1.0
                } else if avg <= 4.0 {
                    3.0
                } else {
                    8.0
                }
            }
            PartitionPreference::Few => {
                if avg <= 4.0 {
                    1.0
                } else if avg <= 6.0 {
                    3.0
                } else {
                    6.0
                }
            }
            PartitionPreference::Unbiased => 5.0,
        }
    }

    /// Log-scaled estimate of how constrained the cell's crossing becomes
    /// after placing `val`; 100 marks a dead move.
    fn intersection_entropy(&self, cell: usize, val: u8, assignment: &[Option<u8>]) -> f64 {
        let h = self.future_domain_size(cell, val, Orientation::Horizontal, assignment);
        let v = self.future_domain_size(cell, val, Orientation::Vertical, assignment);
        if h == 0 || v == 0 {
            return 100.0;
        }
        (1.0 + std::cmp::min(h, v) as f64).log2()
    }

    /// Estimate of the remaining domain along one direction after placing
    /// `val` in `cell`.
    fn future_domain_size(
        &self,
        cell: usize,
        val: u8,
        orientation: Orientation,
        assignment: &[Option<u8>],
    ) -> usize {
        let Some(sid) = self.board.sector_of(cell, orientation) else {
            return 0;
        };
        let sector = self.board.sector(sid);

        let mut current_sum = val as u32;
        let mut used = DigitSet::single(val);
        let mut filled = 1usize;
        for &p in &sector.cells {
            if p == cell {
                continue;
            }
            if let Some(v) = assignment[p] {
                current_sum += v as u32;
                used.insert(v);
                filled += 1;
            }
        }
        let remaining = sector.len() - filled;
        if remaining == 0 {
            return 1; // forced completion
        }

        let Some(target) = self.board.sector_clue(sid) else {
            return 9; // unconstrained while clues do not exist yet
        };
        if target <= current_sum {
            return 0;
        }
        let remaining_sum = target - current_sum;

        let mut count = 0;
        for d in 1..=9u8 {
            if used.contains(d) {
                continue;
            }
            let mut min_possible = d as u32;
            let mut slots = remaining - 1;
            for i in 1..=9u8 {
                if slots == 0 {
                    break;
                }
                if !used.contains(i) && i != d {
                    min_possible += i as u32;
                    slots -= 1;
                }
            }
            let mut max_possible = d as u32;
            slots = remaining - 1;
            for i in (1..=9u8).rev() {
                if slots == 0 {
                    break;
                }
                if !used.contains(i) && i != d {
                    max_possible += i as u32;
                    slots -= 1;
                }
            }
            if min_possible <= remaining_sum && max_possible >= remaining_sum {
                count += 1;
            }
        }
        count
    }

    /// Final acceptance for biased fills: enough of the fully-assigned
    /// sectors must have an easy partition count.
    fn validate_partition_difficulty(
        &self,
        assignment: &[Option<u8>],
        preference: PartitionPreference,
        params: &FillParams,
    ) -> bool {
        let mut easy = 0usize;
        let mut total = 0usize;

        for sector in self.board.sectors() {
            if sector.is_empty() || !sector.cells.iter().all(|&p| assignment[p].is_some()) {
                continue;
            }
            total += 1;
            let sum: u32 = sector
                .cells
                .iter()
                .map(|&p| assignment[p].unwrap() as u32)
                .sum();
            let n = partition_count(sum, sector.len());
            match preference {
                PartitionPreference::Unique if n <= 2 => easy += 1,
                PartitionPreference::Few if n <= 4 => easy += 1,
                _ => {}
            }
        }

        if total == 0 {
            return true;
        }
        let ratio = easy as f64 / total as f64;
        match preference {
            PartitionPreference::Unique => ratio >= params.unique_clue_ratio,
            PartitionPreference::Few => ratio >= params.few_clue_ratio,
            PartitionPreference::Unbiased => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Difficulty;

    /// 5x5 board with a 3x3 white interior, sectors identified.
    fn full_interior() -> Board {
        let mut b = Board::with_seed(5, 5, 42);
        for r in 1..4 {
            for c in 1..4 {
                b.set_white(r, c);
            }
        }
        b.collect_whites();
        b.identify_sectors();
        b
    }

    fn assert_sectors_distinct(b: &Board) {
        for sector in b.sectors() {
            let mut seen = DigitSet::empty();
            for &p in &sector.cells {
                let v = b.value(p).expect("cell filled");
                assert!(!seen.contains(v), "duplicate {} in sector", v);
                seen.insert(v);
            }
        }
    }

    #[test]
    fn test_fill_ignore_clues() {
        let mut b = full_interior();
        let params = FillParams::for_difficulty(Difficulty::Medium);
        assert!(Filler::new(&mut b).fill(&params, &[], &[], true));
        assert_sectors_distinct(&b);
        for &idx in b.whites() {
            assert!(b.value(idx).is_some());
        }
    }

    #[test]
    fn test_forced_assignment() {
        let mut b = full_interior();
        let center = b.index(2, 2);
        let params = FillParams::for_difficulty(Difficulty::Hard);
        assert!(Filler::new(&mut b).fill(&params, &[(center, 5)], &[], true));
        assert_eq!(b.value(center), Some(5));
        assert_sectors_distinct(&b);
    }

    #[test]
    fn test_forbidden_values_avoided() {
        let mut b = full_interior();
        let corner = b.index(1, 1);
        let mut not_nine = DigitSet::all();
        not_nine.remove(9);
        let forbidden = vec![ValueConstraint {
            cell: corner,
            values: not_nine,
        }];
        let params = FillParams::for_difficulty(Difficulty::Medium);
        assert!(Filler::new(&mut b).fill(&params, &[], &forbidden, true));
        assert_eq!(b.value(corner), Some(9));
    }

    #[test]
    fn test_forced_conflicting_with_forbidden_fails() {
        let mut b = full_interior();
        let corner = b.index(1, 1);
        let forbidden = vec![ValueConstraint {
            cell: corner,
            values: DigitSet::single(4),
        }];
        let params = FillParams::for_difficulty(Difficulty::Medium);
        assert!(!Filler::new(&mut b).fill(&params, &[(corner, 4)], &forbidden, true));
    }

    #[test]
    fn test_fill_respects_clues() {
        let mut b = full_interior();
        // Magic-square clues: rows 6/15/24, columns 12/15/18.
        let values = [[1u8, 2, 3], [4, 5, 6], [7, 8, 9]];
        for r in 1..4 {
            for c in 1..4 {
                let idx = b.index(r, c);
                b.set_value(idx, Some(values[r - 1][c - 1]));
            }
        }
        b.derive_clues();
        // Keep the clues but forget the values; the filler must rediscover
        // an assignment matching them.
        for idx in b.whites().to_vec() {
            b.set_value(idx, None);
        }

        let params = FillParams::for_difficulty(Difficulty::Hard);
        assert!(Filler::new(&mut b).fill(&params, &[], &[], false));
        // Every sector sum must match its clue.
        for (sid, sector) in b.sectors().iter().enumerate() {
            let sum: u32 = sector.cells.iter().map(|&p| b.value(p).unwrap() as u32).sum();
            assert_eq!(Some(sum), b.sector_clue(sid));
        }
        assert_sectors_distinct(&b);
    }

    #[test]
    fn test_node_budget_fails_cleanly() {
        let mut b = full_interior();
        let mut params = FillParams::for_difficulty(Difficulty::Medium);
        params.max_nodes = Some(1);
        assert!(!Filler::new(&mut b).fill(&params, &[], &[], true));
        for &idx in b.whites() {
            assert_eq!(b.value(idx), None);
        }
    }

    #[test]
    fn test_domain_size_with_clues() {
        let mut b = full_interior();
        let values = [[1u8, 2, 3], [4, 5, 6], [7, 8, 9]];
        for r in 1..4 {
            for c in 1..4 {
                let idx = b.index(r, c);
                b.set_value(idx, Some(values[r - 1][c - 1]));
            }
        }
        b.derive_clues();
        // With every other value committed, each cell admits only its own.
        let center = b.index(2, 2);
        b.set_value(center, None);
        assert_eq!(domain_size(&b, &ValueSource::Committed, center, false), 1);
        assert!(valid_move(&b, &ValueSource::Committed, center, 5, false));
        assert!(!valid_move(&b, &ValueSource::Committed, center, 4, false));
    }

    #[test]
    fn test_assigning_never_enlarges_peer_domains() {
        let mut b = full_interior();
        let values = [[1u8, 2, 3], [4, 5, 6], [7, 8, 9]];
        for r in 1..4 {
            for c in 1..4 {
                let idx = b.index(r, c);
                b.set_value(idx, Some(values[r - 1][c - 1]));
            }
        }
        b.derive_clues();
        for idx in b.whites().to_vec() {
            b.set_value(idx, None);
        }

        let probe = b.index(1, 2);
        let before = domain_size(&b, &ValueSource::Committed, probe, false);
        let corner = b.index(1, 1);
        b.set_value(corner, Some(1));
        let after = domain_size(&b, &ValueSource::Committed, probe, false);
        assert!(after <= before);
    }

    #[test]
    fn test_clue_only_domain() {
        let mut b = full_interior();
        let values = [[1u8, 2, 3], [4, 5, 6], [7, 8, 9]];
        for r in 1..4 {
            for c in 1..4 {
                let idx = b.index(r, c);
                b.set_value(idx, Some(values[r - 1][c - 1]));
            }
        }
        b.derive_clues();
        // Clue-only view: row 6 over 3 cells caps the corner at 3.
        let corner = b.index(1, 1);
        assert!(!valid_move(&b, &ValueSource::CluesOnly, corner, 4, false));
        assert!(valid_move(&b, &ValueSource::CluesOnly, corner, 1, false));
        assert_eq!(domain_size(&b, &ValueSource::CluesOnly, corner, false), 3);
    }
}
