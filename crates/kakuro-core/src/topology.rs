//! Topology generation.
//!
//! Lays out a centrally-symmetric pattern of black and white cells. The
//! grid is seeded (stamped islands or a grown lattice), then pushed through
//! a convergent loop of stabilization passes until every structural rule
//! holds: run lengths in bounds, no isolated cells, one connected
//! component, and a clue-capable block ahead of every run.

use crate::board::Board;
use crate::config::{TopologyConfig, TopologyParams};
use crate::logger::{stage, substage};
use rand::seq::SliceRandom;
use rand::Rng;

const MAX_TOPOLOGY_RETRIES: usize = 60;
const MAX_STABILIZE_PASSES: usize = 20;

impl Board {
    /// Generate a fresh topology under the given parameters. Returns false
    /// when no valid layout was found within the retry budget.
    pub fn generate_topology(&mut self, params: &TopologyParams) -> bool {
        let cfg = params.resolve(self.width, self.height, &mut self.rng);

        for attempt in 0..MAX_TOPOLOGY_RETRIES {
            self.clear_to_blocks();
            self.log_topology(
                substage::START,
                &format!(
                    "Starting topology attempt {} (density={:.2})",
                    attempt + 1,
                    cfg.density
                ),
            );

            let seeded = if cfg.island_mode {
                // A 2x2 core at the center guarantees something to anchor on.
                self.stamp_rect(self.height / 2 - 1, self.width / 2 - 1, 2, 2);
                let ok = self.generate_stamps(&cfg.stamps, cfg.num_stamps);
                self.log_topology(substage::STAMP_PLACEMENT, "Placed stamps (island mode)");
                ok
            } else if self.place_random_seed() {
                self.log_topology(substage::SEED_PLACEMENT, "Placed random seed");
                self.grow_lattice(cfg.density, cfg.max_sector_length);
                self.log_topology(substage::LATTICE_GROWTH, "Grew lattice");
                self.collect_whites();
                !self.whites().is_empty()
            } else {
                false
            };

            if !seeded {
                self.log_topology(substage::VALIDATION_FAILED, "Initial seeding failed");
                continue;
            }

            self.stabilize(&cfg);

            self.collect_whites();
            if self.whites().len() < cfg.min_cells {
                self.log_topology(
                    substage::VALIDATION_FAILED,
                    &format!(
                        "Too few white cells: {} < {}",
                        self.whites().len(),
                        cfg.min_cells
                    ),
                );
                continue;
            }
            if !self.check_connectivity() {
                self.log_topology(substage::VALIDATION_FAILED, "Connectivity check failed");
                continue;
            }
            if !self.validate_clue_headers() {
                self.log_topology(substage::VALIDATION_FAILED, "Clue header rule failed");
                continue;
            }

            self.identify_sectors();
            if !self.validate_structure() {
                self.log_topology(substage::VALIDATION_FAILED, "Structure validation failed");
                continue;
            }

            self.log_topology(substage::COMPLETE, "Topology generation successful");
            return true;
        }

        self.log_topology(
            substage::FAILED,
            &format!("No valid topology after {} attempts", MAX_TOPOLOGY_RETRIES),
        );
        false
    }

    fn stabilize(&mut self, cfg: &TopologyConfig) {
        let mut changed = true;
        let mut passes = 0;
        while changed && passes < MAX_STABILIZE_PASSES {
            changed = false;
            passes += 1;
            changed |= self.slice_long_runs(cfg.max_run_len);
            if cfg.max_run_len_soft > 0 && cfg.max_run_len_soft_prob > 0.0 {
                changed |= self.slice_soft_runs(cfg.max_run_len_soft, cfg.max_run_len_soft_prob);
            }
            changed |= self.break_large_patches(cfg.max_patch_size);
            changed |= self.prune_singles();
            changed |= self.break_single_runs();
            changed |= self.ensure_connectivity();
        }
    }

    /// Stabilization variant run after a surgical repair: the run-length
    /// cap falls back to the hard maximum of 9.
    pub(crate) fn stabilize_after_repair(&mut self) {
        let mut changed = true;
        let mut passes = 0;
        while changed && passes < 15 {
            changed = false;
            passes += 1;
            changed |= self.slice_long_runs(9);
            changed |= self.break_large_patches(3);
            changed |= self.prune_singles();
            changed |= self.break_single_runs();
            changed |= self.ensure_connectivity();
        }
        self.collect_whites();
        self.identify_sectors();
        self.log_topology(substage::STABILIZE_GRID, "Grid stabilized after repair");
    }

    // ==================== Seeding ====================

    /// Paint an `h` x `w` rectangle white, together with its mirror image.
    pub(crate) fn stamp_rect(&mut self, r: usize, c: usize, h: usize, w: usize) {
        for i in 0..h {
            for j in 0..w {
                self.white_symmetric(r + i, c + j);
            }
        }
    }

    fn generate_stamps(&mut self, shapes: &[(usize, usize)], iterations: usize) -> bool {
        let mut placed = 0;
        let mut failures = 0;
        while placed < iterations && failures < 20 {
            self.collect_whites();
            if self.whites().is_empty() {
                return false;
            }
            let pick = self.rng.gen_range(0..self.whites().len());
            let anchor = self.whites()[pick];
            let (ar, ac) = self.coords(anchor);

            let (h, w) = shapes[self.rng.gen_range(0..shapes.len())];
            let off_r = self.rng.gen_range(-(h as isize - 1)..=0);
            let off_c = self.rng.gen_range(-(w as isize - 1)..=0);
            let top_r = ar as isize + off_r;
            let left_c = ac as isize + off_c;

            // Strict one-cell border around the stamp.
            if top_r >= 1
                && left_c >= 1
                && (top_r + h as isize) < (self.height as isize - 1)
                && (left_c + w as isize) < (self.width as isize - 1)
            {
                self.stamp_rect(top_r as usize, left_c as usize, h, w);
                placed += 1;
            } else {
                failures += 1;
            }
        }
        self.collect_whites();
        !self.whites().is_empty()
    }

    /// Place a 5-cell plus shape (and its mirror) inside a central margin.
    fn place_random_seed(&mut self) -> bool {
        let margin_x = std::cmp::max(1, self.width / 4);
        let margin_y = std::cmp::max(1, self.height / 4);

        let (mut min_r, mut max_r) = (margin_y, self.height - 1 - margin_y);
        let (mut min_c, mut max_c) = (margin_x, self.width - 1 - margin_x);
        if min_r >= max_r {
            min_r = 1;
            max_r = self.height - 2;
        }
        if min_c >= max_c {
            min_c = 1;
            max_c = self.width - 2;
        }

        for _ in 0..20 {
            let r = self.rng.gen_range(min_r..=max_r);
            let c = self.rng.gen_range(min_c..=max_c);
            if r > 1 && r + 1 < self.height - 1 && c > 1 && c + 1 < self.width - 1 {
                for (cr, cc) in [(r, c), (r, c - 1), (r, c + 1), (r - 1, c), (r + 1, c)] {
                    self.white_symmetric(cr, cc);
                }
                self.collect_whites();
                return true;
            }
        }
        false
    }

    /// Grow the white lattice toward the target density by repeatedly
    /// painting random runs off existing white cells.
    fn grow_lattice(&mut self, density: f64, max_sector_length: usize) {
        let target = ((self.width - 2) * (self.height - 2)) as f64 * density;
        let target = target as usize;
        let mut attempts = 0;
        const MAX_NO_PROGRESS: usize = 2000;

        self.collect_whites();
        while self.whites().len() < target && attempts < MAX_NO_PROGRESS {
            if self.whites().is_empty() {
                break;
            }
            let pick = self.rng.gen_range(0..self.whites().len());
            let source = self.whites()[pick];
            let (r, c) = self.coords(source);

            let has_h = self.is_white(r, c.wrapping_sub(1)) || self.is_white(r, c + 1);
            let has_v = self.is_white(r.wrapping_sub(1), c) || self.is_white(r + 1, c);
            // Prefer growing across the direction that already has neighbors.
            let grow_vert = match (has_h, has_v) {
                (true, true) => self.rng.gen_bool(0.5),
                (true, false) => true,
                (false, true) => false,
                (false, false) => self.rng.gen_bool(0.5),
            };

            let new_len = self.rng.gen_range(2..=max_sector_length);
            let mut shifts: Vec<isize> = (0..new_len as isize).collect();
            shifts.shuffle(&mut self.rng);

            let mut placed = false;
            for shift in shifts {
                let mut coords = Vec::with_capacity(new_len);
                let mut possible = true;
                for k in 0..new_len as isize {
                    let off = k - shift;
                    let (nr, nc) = if grow_vert {
                        (r as isize + off, c as isize)
                    } else {
                        (r as isize, c as isize + off)
                    };
                    if nr < 1
                        || nr >= self.height as isize - 1
                        || nc < 1
                        || nc >= self.width as isize - 1
                    {
                        possible = false;
                        break;
                    }
                    coords.push((nr as usize, nc as usize));
                }
                if possible {
                    let mut added = false;
                    for (nr, nc) in coords {
                        if !self.is_white(nr, nc) {
                            self.white_symmetric(nr, nc);
                            added = true;
                        }
                    }
                    if added {
                        placed = true;
                        break;
                    }
                }
            }

            if placed {
                self.collect_whites();
                attempts = 0;
            } else {
                attempts += 1;
            }
        }
    }

    // ==================== Stabilization passes ====================

    fn scan_runs(&self, horizontal: bool) -> Vec<(usize, usize, usize)> {
        // (fixed index, run start, run length)
        let (outer, inner) = if horizontal {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        };
        let mut runs = Vec::new();
        for fixed in 0..outer {
            let mut start = None;
            let mut len = 0;
            for pos in 0..inner {
                let (r, c) = if horizontal { (fixed, pos) } else { (pos, fixed) };
                if self.is_white(r, c) {
                    if start.is_none() {
                        start = Some(pos);
                    }
                    len += 1;
                } else if let Some(s) = start.take() {
                    runs.push((fixed, s, len));
                    len = 0;
                }
            }
            if let Some(s) = start {
                runs.push((fixed, s, len));
            }
        }
        runs
    }

    /// Split every run longer than `max_len` by blocking its middle cell.
    fn slice_long_runs(&mut self, max_len: usize) -> bool {
        let mut changed = false;
        for horizontal in [true, false] {
            for (fixed, start, len) in self.scan_runs(horizontal) {
                if len > max_len {
                    self.apply_slice(fixed, start, len, horizontal);
                    changed = true;
                }
            }
        }
        if changed {
            self.log_topology(substage::SLICE_RUNS, "Sliced long runs");
        }
        changed
    }

    /// Probabilistically split runs above the soft cap, for texture.
    fn slice_soft_runs(&mut self, soft_len: usize, prob: f64) -> bool {
        let mut changed = false;
        for horizontal in [true, false] {
            for (fixed, start, len) in self.scan_runs(horizontal) {
                if len > soft_len && self.rng.gen_bool(prob) {
                    self.apply_slice(fixed, start, len, horizontal);
                    changed = true;
                }
            }
        }
        if changed {
            self.log_topology(
                substage::SLICE_RUNS,
                &format!("Sliced soft runs (len > {})", soft_len),
            );
        }
        changed
    }

    fn apply_slice(&mut self, fixed: usize, start: usize, length: usize, horizontal: bool) {
        let mid = start + length / 2;
        let (r, c) = if horizontal { (fixed, mid) } else { (mid, fixed) };
        self.block_symmetric(r, c);
    }

    /// Break solid `size` x `size` white patches by blocking one cell each.
    ///
    /// Target preference: cells that do not create a one-cell corridor
    /// against the interior border (for the cell or its mirror), then cells
    /// already touching a block, then the patch center.
    fn break_large_patches(&mut self, size: usize) -> bool {
        let mut changed_overall = false;

        for _ in 0..50 {
            let mut found = None;
            'scan: for r in 1..self.height.saturating_sub(size) {
                for c in 1..self.width.saturating_sub(size) {
                    let mut all_white = true;
                    for ir in 0..size {
                        for ic in 0..size {
                            if !self.is_white(r + ir, c + ic) {
                                all_white = false;
                                break;
                            }
                        }
                        if !all_white {
                            break;
                        }
                    }
                    if all_white {
                        found = Some((r, c));
                        break 'scan;
                    }
                }
            }

            let Some((pr, pc)) = found else { break };

            let patch: Vec<(usize, usize)> = (0..size)
                .flat_map(|ir| (0..size).map(move |ic| (pr + ir, pc + ic)))
                .collect();

            let creates_edge_gap = |board: &Board, cr: usize, cc: usize| {
                (cr == 2 && board.is_white(1, cc))
                    || (cc == 2 && board.is_white(cr, 1))
                    || (cr == board.height - 3 && board.is_white(board.height - 2, cc))
                    || (cc == board.width - 3 && board.is_white(cr, board.width - 2))
            };

            let safe: Vec<(usize, usize)> = patch
                .iter()
                .copied()
                .filter(|&(cr, cc)| {
                    let (sr, sc) = self.symmetric(cr, cc);
                    !creates_edge_gap(self, cr, cc) && !creates_edge_gap(self, sr, sc)
                })
                .collect();

            let pool = if safe.is_empty() { &patch } else { &safe };
            let priority: Vec<(usize, usize)> = pool
                .iter()
                .copied()
                .filter(|&(cr, cc)| {
                    let idx = self.index(cr, cc);
                    [(0isize, 1isize), (0, -1), (1, 0), (-1, 0)].iter().any(|&(dr, dc)| {
                        self.neighbor(idx, dr, dc)
                            .map_or(false, |n| self.cell(n).is_block())
                    })
                })
                .collect();

            let target = if !priority.is_empty() {
                priority[self.rng.gen_range(0..priority.len())]
            } else if !safe.is_empty() {
                safe[self.rng.gen_range(0..safe.len())]
            } else {
                patch[patch.len() / 2]
            };

            self.block_symmetric(target.0, target.1);
            changed_overall = true;
        }

        if changed_overall {
            self.log_topology(substage::BREAK_PATCHES, "Broke large patches");
        }
        changed_overall
    }

    /// Remove white cells lacking a horizontal or vertical neighbor,
    /// bridging around any disconnection this causes.
    fn prune_singles(&mut self) -> bool {
        let mut any_change = false;
        let mut changed = true;
        let mut limit = 10;

        while changed && limit > 0 {
            changed = false;
            limit -= 1;
            self.collect_whites();

            let whites: Vec<usize> = self.whites().to_vec();
            for idx in whites {
                let (r, c) = self.coords(idx);
                if !self.is_white(r, c) {
                    continue; // removed by an earlier pruning this pass
                }
                let h_nbs = self.is_white(r, c.wrapping_sub(1)) as usize
                    + self.is_white(r, c + 1) as usize;
                let v_nbs = self.is_white(r.wrapping_sub(1), c) as usize
                    + self.is_white(r + 1, c) as usize;
                if (h_nbs == 0 || v_nbs == 0) && self.try_remove_and_reconnect(r, c, true) {
                    changed = true;
                    any_change = true;
                    break;
                }
            }
        }
        any_change
    }

    /// Block `(r, c)` and its mirror. If the white set splits, optionally
    /// promote an interior block touching at least two components to white
    /// as a bridge; otherwise revert.
    pub(crate) fn try_remove_and_reconnect(
        &mut self,
        r: usize,
        c: usize,
        allow_bridge: bool,
    ) -> bool {
        if !self.is_white(r, c) {
            return false;
        }
        self.reset_values();

        let backup: Vec<bool> = (0..self.cell_count())
            .map(|i| self.cell(i).is_white())
            .collect();

        let (sr, sc) = self.symmetric(r, c);
        self.set_block(r, c);
        self.set_block(sr, sc);

        let components = self.find_components();
        if components.len() <= 1 {
            self.log_topology(substage::PRUNE_SINGLES, "Removed cell without disconnecting");
            self.collect_whites();
            self.identify_sectors();
            return true;
        }

        if allow_bridge {
            let mut comp_of = vec![usize::MAX; self.cell_count()];
            for (ci, comp) in components.iter().enumerate() {
                for &idx in comp {
                    comp_of[idx] = ci;
                }
            }

            let mut bridges = Vec::new();
            for br in 1..self.height - 1 {
                for bc in 1..self.width - 1 {
                    if (br == r && bc == c) || (br == sr && bc == sc) {
                        continue;
                    }
                    let idx = self.index(br, bc);
                    if !self.cell(idx).is_block() {
                        continue;
                    }
                    let mut touching = std::collections::HashSet::new();
                    for (dr, dc) in [(0isize, 1isize), (0, -1), (1, 0), (-1, 0)] {
                        if let Some(n) = self.neighbor(idx, dr, dc) {
                            if comp_of[n] != usize::MAX {
                                touching.insert(comp_of[n]);
                            }
                        }
                    }
                    if touching.len() >= 2 {
                        bridges.push((br, bc));
                    }
                }
            }

            if !bridges.is_empty() {
                let (br, bc) = bridges[self.rng.gen_range(0..bridges.len())];
                self.white_symmetric(br, bc);
                self.log_topology(substage::PRUNE_SINGLES, "Removed cell, bridged reconnection");
                self.collect_whites();
                self.identify_sectors();
                return true;
            }
        }

        // Revert to the snapshot.
        for idx in 0..self.cell_count() {
            let was_white = backup[idx];
            if was_white != self.cell(idx).is_white() {
                let (rr, cc) = self.coords(idx);
                if was_white {
                    self.set_white(rr, cc);
                } else {
                    self.set_block(rr, cc);
                }
            }
        }
        self.collect_whites();
        self.identify_sectors();
        false
    }

    /// Block every white cell whose horizontal or vertical run length is 1.
    fn break_single_runs(&mut self) -> bool {
        let mut any_change = false;
        let mut changed = true;
        while changed {
            changed = false;
            for r in 1..self.height - 1 {
                for c in 1..self.width - 1 {
                    if !self.is_white(r, c) {
                        continue;
                    }
                    let mut h_len = 1;
                    let mut cc = c;
                    while cc > 0 && self.is_white(r, cc - 1) {
                        h_len += 1;
                        cc -= 1;
                    }
                    cc = c;
                    while self.is_white(r, cc + 1) {
                        h_len += 1;
                        cc += 1;
                    }
                    let mut v_len = 1;
                    let mut rr = r;
                    while rr > 0 && self.is_white(rr - 1, c) {
                        v_len += 1;
                        rr -= 1;
                    }
                    rr = r;
                    while self.is_white(rr + 1, c) {
                        v_len += 1;
                        rr += 1;
                    }

                    if h_len == 1 || v_len == 1 {
                        self.block_symmetric(r, c);
                        changed = true;
                        any_change = true;
                    }
                }
            }
        }
        if any_change {
            self.collect_whites();
            self.identify_sectors();
            self.log_topology(substage::BREAK_SINGLE_RUNS, "Broke single-cell runs");
        }
        any_change
    }

    /// Keep the largest white component, blocking the rest.
    fn ensure_connectivity(&mut self) -> bool {
        self.collect_whites();
        if self.whites().is_empty() {
            return false;
        }
        let components = self.find_components();
        if components.len() <= 1 {
            return false;
        }

        let largest = components
            .iter()
            .enumerate()
            .max_by_key(|(_, comp)| comp.len())
            .map(|(i, _)| i)
            .unwrap();

        let mut removed = 0;
        for (i, comp) in components.iter().enumerate() {
            if i == largest {
                continue;
            }
            for &idx in comp {
                let (r, c) = self.coords(idx);
                if self.is_white(r, c) {
                    self.block_symmetric(r, c);
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            self.collect_whites();
            self.log_topology(
                substage::CONNECTIVITY_CHECK,
                &format!("Removed disconnected components ({} cells)", removed),
            );
        }
        removed > 0
    }

    fn log_topology(&mut self, sub: &str, message: &str) {
        if self.logger.is_enabled() {
            let snap = self.snapshot(None);
            self.logger.log_step(stage::TOPOLOGY, sub, message, &snap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Difficulty;

    fn assert_valid_topology(b: &Board) {
        // Central symmetry.
        for r in 0..b.height {
            for c in 0..b.width {
                let (sr, sc) = b.symmetric(r, c);
                assert_eq!(b.is_white(r, c), b.is_white(sr, sc), "asymmetric at ({r},{c})");
            }
        }
        // Border all block.
        for r in 0..b.height {
            assert!(!b.is_white(r, 0) && !b.is_white(r, b.width - 1));
        }
        for c in 0..b.width {
            assert!(!b.is_white(0, c) && !b.is_white(b.height - 1, c));
        }
        // Sector lengths and structure.
        for sector in b.sectors() {
            assert!((2..=9).contains(&sector.len()), "bad sector len {}", sector.len());
        }
        assert!(b.check_connectivity());
        assert!(b.validate_structure());
    }

    fn generate_with_any_seed(w: usize, h: usize, difficulty: Difficulty) -> Option<Board> {
        for seed in 0..8 {
            let mut b = Board::with_seed(w, h, 1000 + seed);
            if b.generate_topology(&TopologyParams::for_difficulty(difficulty)) {
                return Some(b);
            }
        }
        None
    }

    #[test]
    fn test_generate_medium_topology() {
        let b = generate_with_any_seed(10, 10, Difficulty::Medium).expect("topology");
        assert_valid_topology(&b);
        assert!(b.whites().len() >= 16); // 0.25 * 64
    }

    #[test]
    fn test_generate_very_easy_topology() {
        let b = generate_with_any_seed(9, 9, Difficulty::VeryEasy).expect("topology");
        assert_valid_topology(&b);
        assert!(b.whites().len() >= 16);
        // Run cap for very_easy is 5.
        for sector in b.sectors() {
            assert!(sector.len() <= 5);
        }
    }

    #[test]
    fn test_minimum_grid_fails_cleanly() {
        // A 5x5 interior holds 9 cells; very_easy requires 16, so topology
        // generation must fail without panicking.
        let mut b = Board::with_seed(5, 5, 3);
        assert!(!b.generate_topology(&TopologyParams::for_difficulty(Difficulty::VeryEasy)));
    }

    #[test]
    fn test_slice_long_runs() {
        let mut b = Board::with_seed(11, 7, 1);
        // One long horizontal strip, two rows so nothing is a single run.
        for c in 1..10 {
            b.set_white(2, c);
            b.set_white(3, c);
            b.white_symmetric(2, c);
        }
        b.collect_whites();
        assert!(b.slice_long_runs(5));
        b.collect_whites();
        b.identify_sectors();
        for sector in b.sectors() {
            if sector.orientation == crate::Orientation::Horizontal {
                assert!(sector.len() <= 5);
            }
        }
    }

    #[test]
    fn test_break_single_runs_removes_stub() {
        let mut b = Board::with_seed(7, 7, 1);
        // Central blob (the stamp overlaps its own mirror) plus an isolated
        // corner cell.
        b.stamp_rect(2, 2, 2, 2);
        b.white_symmetric(1, 1);
        b.collect_whites();
        b.break_single_runs();
        assert!(!b.is_white(1, 1));
        assert!(!b.is_white(5, 5));
        // Every blob cell sits in both a horizontal and a vertical run.
        assert!(b.is_white(2, 2));
        assert!(b.is_white(4, 4));
    }

    #[test]
    fn test_ensure_connectivity_merges_or_clears() {
        let mut b = Board::with_seed(9, 9, 1);
        b.stamp_rect(2, 2, 2, 2); // disjoint from its mirror at (5..=6, 5..=6)
        b.collect_whites();
        assert_eq!(b.find_components().len(), 2);
        b.ensure_connectivity();
        // Blocking a component also blocks its mirror, so at most one
        // component can survive.
        assert!(b.find_components().len() <= 1);
    }
}
