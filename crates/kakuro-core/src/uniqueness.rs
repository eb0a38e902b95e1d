//! Uniqueness checking.
//!
//! Treats the committed values as the reference solution and searches for a
//! complete assignment that differs somewhere. Value order is seed-shuffled
//! with the reference value moved to the end, so a second solution is found
//! before the reference is rediscovered. Candidates are pre-narrowed to the
//! clue-feasible digits of each cell's two partition masks, so the search
//! never branches on digits no partition admits.

use crate::board::{Board, Orientation};
use crate::filler::{domain_size, valid_move, ValueSource};
use crate::logger::{stage, substage};
use crate::partitions::partition_mask;
use crate::{Deadline, DigitSet};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;

/// A complete alternative assignment, keyed by `(row, col)`.
pub type Witness = HashMap<(usize, usize), u8>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniquenessOutcome {
    /// No second solution exists within the node budget.
    Unique,
    /// A second solution was found.
    Multiple(Witness),
    /// The search budget ran out before the question was settled.
    Inconclusive,
}

/// Search for a solution different from the one on the board. The board is
/// returned in exactly the state it was given.
pub fn check_unique(
    board: &mut Board,
    max_nodes: u32,
    seed: u64,
    deadline: Option<Deadline>,
) -> UniquenessOutcome {
    let whites: Vec<usize> = board.whites().to_vec();
    let reference: Vec<(usize, Option<u8>)> =
        whites.iter().map(|&i| (i, board.value(i))).collect();
    let avoid: HashMap<usize, u8> = reference
        .iter()
        .map(|&(i, v)| (i, v.unwrap_or(0)))
        .collect();

    for &i in &whites {
        board.set_value(i, None);
    }

    let masks = clue_masks(board);
    let mut search = Search {
        board: &mut *board,
        avoid,
        masks,
        nodes: 0,
        max_nodes,
        seed,
        deadline,
        timed_out: false,
        witness: None,
    };
    search.run();
    let (witness, timed_out) = (search.witness, search.timed_out);

    for &(i, v) in &reference {
        board.set_value(i, v);
    }

    match witness {
        Some(w) => UniquenessOutcome::Multiple(w),
        None if timed_out => UniquenessOutcome::Inconclusive,
        None => UniquenessOutcome::Unique,
    }
}

/// Three independent passes with distinct seeds; MULTIPLE or INCONCLUSIVE
/// in any pass dominates UNIQUE in the others.
pub fn robust_check(
    board: &mut Board,
    max_nodes: u32,
    deadline: Option<Deadline>,
) -> UniquenessOutcome {
    for i in 0..3u64 {
        if let Some(d) = deadline {
            if d.expired() {
                return UniquenessOutcome::Inconclusive;
            }
        }
        match check_unique(board, max_nodes, 42 + i * 100, deadline) {
            UniquenessOutcome::Unique => {}
            other => return other,
        }
    }
    UniquenessOutcome::Unique
}

/// Per-cell candidate mask from the two partition masks of its sectors.
fn clue_masks(board: &Board) -> Vec<DigitSet> {
    let mut masks = vec![DigitSet::all(); board.cell_count()];
    for &cell in board.whites() {
        let mut mask = DigitSet::all();
        for orientation in [Orientation::Horizontal, Orientation::Vertical] {
            if let Some(sid) = board.sector_of(cell, orientation) {
                if let Some(clue) = board.sector_clue(sid) {
                    mask &= partition_mask(clue, board.sector(sid).len());
                }
            }
        }
        masks[cell] = mask;
    }
    masks
}

struct Search<'a> {
    board: &'a mut Board,
    avoid: HashMap<usize, u8>,
    masks: Vec<DigitSet>,
    nodes: u32,
    max_nodes: u32,
    seed: u64,
    deadline: Option<Deadline>,
    timed_out: bool,
    witness: Option<Witness>,
}

impl Search<'_> {
    fn run(&mut self) {
        if self.witness.is_some() || self.timed_out {
            return;
        }
        if self.nodes > self.max_nodes {
            self.timed_out = true;
            return;
        }
        self.nodes += 1;
        if self.nodes % 1000 == 0 {
            if let Some(d) = self.deadline {
                if d.expired() {
                    self.timed_out = true;
                    return;
                }
            }
        }

        // MRV against the full consistency test.
        let mut var = None;
        let mut min_domain = 10usize;
        for &cell in self.board.whites() {
            if self.board.value(cell).is_some() {
                continue;
            }
            let d = domain_size(self.board, &ValueSource::Committed, cell, false);
            if d == 0 {
                return;
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
            self.record_if_different();
            return;
        };

        let avoid_val = self.avoid.get(&var).copied().unwrap_or(0);
        let mut vals: Vec<u8> = self.masks[var].iter().collect();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.nodes as u64));
        vals.shuffle(&mut rng);
        // Stable partition: every digit except the reference one first.
        let mut ordered: Vec<u8> = vals.iter().copied().filter(|&v| v != avoid_val).collect();
        if vals.contains(&avoid_val) {
            ordered.push(avoid_val);
        }

        for v in ordered {
            if valid_move(self.board, &ValueSource::Committed, var, v, false) {
                self.board.set_value(var, Some(v));
                self.run();
                self.board.set_value(var, None);
                if self.witness.is_some() || self.timed_out {
                    return;
                }
            }
        }
    }

    fn record_if_different(&mut self) {
        let mut sol = Witness::new();
        let mut differing = Vec::new();
        for &cell in self.board.whites() {
            let v = self.board.value(cell).unwrap_or(0);
            let (r, c) = self.board.coords(cell);
            sol.insert((r, c), v);
            if self.avoid.get(&cell).copied().unwrap_or(0) != v {
                differing.push((r, c));
            }
        }
        if differing.is_empty() {
            return;
        }

        if self.board.logger.is_enabled() {
            // The board currently holds the alternative; the reference is
            // shown as the base grid with differing cells highlighted.
            let mut overlay = vec![None; self.board.cell_count()];
            for (&cell, &v) in &self.avoid {
                overlay[cell] = Some(v);
            }
            let reference_grid = self.board.snapshot(Some(&overlay));
            let alt_grid = self.board.snapshot(None);
            self.board.logger.log_step_with_highlights(
                stage::UNIQUENESS,
                substage::ALTERNATIVE_FOUND,
                "Found alternative solution",
                &reference_grid,
                &differing,
                Some(&alt_grid),
            );
        }

        self.witness = Some(sol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 5x5 board with a 2x2 white square clued rows 3/4, columns 4/3.
    /// Row 1 forces {1,2}, column 1 forces {1,3}, so the top-left corner is
    /// pinned to 1 and the whole assignment [[1,2],[3,1]] is unique.
    fn unique_board() -> Board {
        let mut b = Board::with_seed(5, 5, 9);
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

    /// 5x5 board with a 2x2 white square, both rows and columns clued 5:
    /// {1,4} and {2,3} interleave, so several solutions exist.
    fn ambiguous_board() -> Board {
        let mut b = Board::with_seed(5, 5, 9);
        for r in 1..3 {
            for c in 1..3 {
                b.set_white(r, c);
            }
        }
        b.collect_whites();
        b.identify_sectors();
        let idx = |b: &Board, r, c| b.index(r, c);
        b.set_value(idx(&b, 1, 1), Some(1));
        b.set_value(idx(&b, 1, 2), Some(4));
        b.set_value(idx(&b, 2, 1), Some(4));
        b.set_value(idx(&b, 2, 2), Some(1));
        b.derive_clues();
        b
    }

    fn board_values(b: &Board) -> Vec<Option<u8>> {
        b.whites().iter().map(|&i| b.value(i)).collect()
    }

    #[test]
    fn test_unique_solution_detected() {
        let mut b = unique_board();
        let before = board_values(&b);
        let outcome = check_unique(&mut b, 100_000, 42, None);
        assert_eq!(outcome, UniquenessOutcome::Unique);
        assert_eq!(board_values(&b), before, "board must be restored");
    }

    #[test]
    fn test_multiple_solutions_detected() {
        let mut b = ambiguous_board();
        let before = board_values(&b);
        let outcome = check_unique(&mut b, 100_000, 42, None);
        let UniquenessOutcome::Multiple(witness) = outcome else {
            panic!("expected MULTIPLE");
        };
        // The witness differs from the reference somewhere and satisfies
        // the clue sums.
        assert!(witness.iter().any(|(&(r, c), &v)| {
            b.value(b.index(r, c)) != Some(v)
        }));
        let row1: u32 = (1..3).map(|c| witness[&(1, c)] as u32).sum();
        let col1: u32 = (1..3).map(|r| witness[&(r, 1)] as u32).sum();
        assert_eq!(row1, 5);
        assert_eq!(col1, 5);
        assert_eq!(board_values(&b), before, "board must be restored");
    }

    #[test]
    fn test_robust_check_dominates() {
        let mut b = ambiguous_board();
        assert!(matches!(
            robust_check(&mut b, 100_000, None),
            UniquenessOutcome::Multiple(_)
        ));
        let mut b = unique_board();
        assert_eq!(robust_check(&mut b, 100_000, None), UniquenessOutcome::Unique);
    }

    #[test]
    fn test_tiny_budget_is_inconclusive() {
        let mut b = ambiguous_board();
        // With effectively no nodes the search cannot settle the question.
        let outcome = check_unique(&mut b, 0, 42, None);
        assert_eq!(outcome, UniquenessOutcome::Inconclusive);
    }

    #[test]
    fn test_clue_masks_narrow_candidates() {
        let b = ambiguous_board();
        let masks = clue_masks(&b);
        // Both sectors of each cell are clued 5 over 2 cells: {1,4},{2,3}.
        let expected: DigitSet = DigitSet::single(1)
            | DigitSet::single(2)
            | DigitSet::single(3)
            | DigitSet::single(4);
        for &cell in b.whites() {
            assert_eq!(masks[cell], expected);
        }
    }
}
