//! Grid & sector model.
//!
//! A `Board` owns a rectangular array of cells, the cached list of white
//! cells, and the sector table. Sectors are independently owned objects
//! addressed by index; each white cell stores the ids of its horizontal and
//! vertical sector, and the whole table is rebuilt atomically whenever the
//! topology changes.

use crate::logger::{GenerationLogger, GridSnapshot};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Index into `Board::sectors`.
pub type SectorId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// A single grid cell. Blocks carry the sum clues for the runs starting
/// immediately to their right / below; whites carry the digit and the ids
/// of the two sectors they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Block {
        clue_h: Option<u32>,
        clue_v: Option<u32>,
    },
    White {
        value: Option<u8>,
        sector_h: Option<SectorId>,
        sector_v: Option<SectorId>,
    },
}

impl Cell {
    #[inline]
    pub fn is_white(&self) -> bool {
        matches!(self, Cell::White { .. })
    }

    #[inline]
    pub fn is_block(&self) -> bool {
        matches!(self, Cell::Block { .. })
    }

    #[inline]
    pub fn value(&self) -> Option<u8> {
        match self {
            Cell::White { value, .. } => *value,
            Cell::Block { .. } => None,
        }
    }

    #[inline]
    pub fn clue_h(&self) -> Option<u32> {
        match self {
            Cell::Block { clue_h, .. } => *clue_h,
            Cell::White { .. } => None,
        }
    }

    #[inline]
    pub fn clue_v(&self) -> Option<u32> {
        match self {
            Cell::Block { clue_v, .. } => *clue_v,
            Cell::White { .. } => None,
        }
    }

    fn fresh_block() -> Cell {
        Cell::Block {
            clue_h: None,
            clue_v: None,
        }
    }

    fn fresh_white() -> Cell {
        Cell::White {
            value: None,
            sector_h: None,
            sector_v: None,
        }
    }
}

/// A maximal run of white cells along one row or column. Cell indices are
/// stored in scan order (left-to-right / top-to-bottom).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sector {
    pub cells: Vec<usize>,
    pub orientation: Orientation,
}

impl Sector {
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

pub struct Board {
    pub width: usize,
    pub height: usize,
    cells: Vec<Cell>,
    whites: Vec<usize>,
    sectors: Vec<Sector>,
    pub(crate) rng: StdRng,
    pub logger: GenerationLogger,
}

impl Board {
    /// Create an all-block board. Panics if either dimension is below 5,
    /// the smallest size with a usable interior.
    pub fn new(width: usize, height: usize) -> Self {
        Self::from_rng(width, height, StdRng::from_entropy())
    }

    /// Deterministic construction for reproducible generation.
    pub fn with_seed(width: usize, height: usize, seed: u64) -> Self {
        Self::from_rng(width, height, StdRng::seed_from_u64(seed))
    }

    fn from_rng(width: usize, height: usize, rng: StdRng) -> Self {
        assert!(width >= 5 && height >= 5, "board must be at least 5x5");
        Self {
            width,
            height,
            cells: vec![Cell::fresh_block(); width * height],
            whites: Vec::new(),
            sectors: Vec::new(),
            rng,
            logger: GenerationLogger::disabled(),
        }
    }

    // ==================== Indexing ====================

    #[inline]
    pub fn index(&self, r: usize, c: usize) -> usize {
        debug_assert!(r < self.height && c < self.width);
        r * self.width + c
    }

    #[inline]
    pub fn coords(&self, idx: usize) -> (usize, usize) {
        (idx / self.width, idx % self.width)
    }

    pub fn get(&self, r: usize, c: usize) -> Option<&Cell> {
        if r < self.height && c < self.width {
            Some(&self.cells[r * self.width + c])
        } else {
            None
        }
    }

    #[inline]
    pub fn cell(&self, idx: usize) -> &Cell {
        &self.cells[idx]
    }

    #[inline]
    pub fn cell_mut(&mut self, idx: usize) -> &mut Cell {
        &mut self.cells[idx]
    }

    /// Bounds-safe whiteness test.
    #[inline]
    pub fn is_white(&self, r: usize, c: usize) -> bool {
        self.get(r, c).map_or(false, Cell::is_white)
    }

    /// Neighbor index with signed offsets; `None` when off the grid.
    pub fn neighbor(&self, idx: usize, dr: isize, dc: isize) -> Option<usize> {
        let (r, c) = self.coords(idx);
        let nr = r as isize + dr;
        let nc = c as isize + dc;
        if nr >= 0 && nr < self.height as isize && nc >= 0 && nc < self.width as isize {
            Some(self.index(nr as usize, nc as usize))
        } else {
            None
        }
    }

    #[inline]
    pub fn interior(&self, r: usize, c: usize) -> bool {
        r >= 1 && r < self.height - 1 && c >= 1 && c < self.width - 1
    }

    /// The central-symmetric partner of `(r, c)`.
    #[inline]
    pub fn symmetric(&self, r: usize, c: usize) -> (usize, usize) {
        (self.height - 1 - r, self.width - 1 - c)
    }

    // ==================== Mutation ====================

    /// Turn a cell into a block, dropping any value. No-op out of bounds or
    /// on an existing block.
    pub fn set_block(&mut self, r: usize, c: usize) {
        if r < self.height && c < self.width {
            let idx = self.index(r, c);
            if self.cells[idx].is_white() {
                self.cells[idx] = Cell::fresh_block();
            }
        }
    }

    /// Turn an interior cell white. Silently ignored on the border, which
    /// guarantees every run has a block available for its clue.
    pub fn set_white(&mut self, r: usize, c: usize) {
        if self.interior(r, c) {
            let idx = self.index(r, c);
            if self.cells[idx].is_block() {
                self.cells[idx] = Cell::fresh_white();
            }
        }
    }

    /// Block a cell and its central-symmetric partner in one step.
    pub fn block_symmetric(&mut self, r: usize, c: usize) {
        self.set_block(r, c);
        let (sr, sc) = self.symmetric(r, c);
        self.set_block(sr, sc);
    }

    /// Paint a cell and its partner white in one step.
    pub fn white_symmetric(&mut self, r: usize, c: usize) {
        self.set_white(r, c);
        let (sr, sc) = self.symmetric(r, c);
        self.set_white(sr, sc);
    }

    /// Clear every value and every clue.
    pub fn reset_values(&mut self) {
        for cell in &mut self.cells {
            match cell {
                Cell::White { value, .. } => *value = None,
                Cell::Block { clue_h, clue_v } => {
                    *clue_h = None;
                    *clue_v = None;
                }
            }
        }
    }

    /// Reset the whole grid to blocks and drop all caches.
    pub fn clear_to_blocks(&mut self) {
        for cell in &mut self.cells {
            *cell = Cell::fresh_block();
        }
        self.whites.clear();
        self.sectors.clear();
    }

    #[inline]
    pub fn value(&self, idx: usize) -> Option<u8> {
        self.cells[idx].value()
    }

    pub fn set_value(&mut self, idx: usize, v: Option<u8>) {
        if let Cell::White { value, .. } = &mut self.cells[idx] {
            *value = v;
        }
    }

    // ==================== White-cell cache ====================

    /// Refresh the cached list of white cells (row-major order).
    pub fn collect_whites(&mut self) {
        self.whites.clear();
        for idx in 0..self.cells.len() {
            if self.cells[idx].is_white() {
                self.whites.push(idx);
            }
        }
    }

    #[inline]
    pub fn whites(&self) -> &[usize] {
        &self.whites
    }

    // ==================== Sectors ====================

    /// Rebuild the sector table and relink every white cell to its two
    /// sectors. Old sector ids become dead in the same operation.
    pub fn identify_sectors(&mut self) {
        self.sectors.clear();
        for cell in &mut self.cells {
            if let Cell::White {
                sector_h, sector_v, ..
            } = cell
            {
                *sector_h = None;
                *sector_v = None;
            }
        }

        let mut runs: Vec<(Vec<usize>, Orientation)> = Vec::new();
        for r in 0..self.height {
            let mut run = Vec::new();
            for c in 0..self.width {
                let idx = self.index(r, c);
                if self.cells[idx].is_white() {
                    run.push(idx);
                } else if !run.is_empty() {
                    runs.push((std::mem::take(&mut run), Orientation::Horizontal));
                }
            }
            if !run.is_empty() {
                runs.push((run, Orientation::Horizontal));
            }
        }
        for c in 0..self.width {
            let mut run = Vec::new();
            for r in 0..self.height {
                let idx = self.index(r, c);
                if self.cells[idx].is_white() {
                    run.push(idx);
                } else if !run.is_empty() {
                    runs.push((std::mem::take(&mut run), Orientation::Vertical));
                }
            }
            if !run.is_empty() {
                runs.push((run, Orientation::Vertical));
            }
        }

        for (cells, orientation) in runs {
            let id = self.sectors.len();
            for &idx in &cells {
                if let Cell::White {
                    sector_h, sector_v, ..
                } = &mut self.cells[idx]
                {
                    match orientation {
                        Orientation::Horizontal => *sector_h = Some(id),
                        Orientation::Vertical => *sector_v = Some(id),
                    }
                }
            }
            self.sectors.push(Sector { cells, orientation });
        }
    }

    #[inline]
    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    #[inline]
    pub fn sector(&self, id: SectorId) -> &Sector {
        &self.sectors[id]
    }

    pub fn sector_of(&self, idx: usize, orientation: Orientation) -> Option<SectorId> {
        match &self.cells[idx] {
            Cell::White {
                sector_h, sector_v, ..
            } => match orientation {
                Orientation::Horizontal => *sector_h,
                Orientation::Vertical => *sector_v,
            },
            Cell::Block { .. } => None,
        }
    }

    /// The clue stamped on the block preceding this sector, if any.
    pub fn sector_clue(&self, id: SectorId) -> Option<u32> {
        let sector = &self.sectors[id];
        let &first = sector.cells.first()?;
        let (r, c) = self.coords(first);
        match sector.orientation {
            Orientation::Horizontal => self.get(r, c.checked_sub(1)?).and_then(Cell::clue_h),
            Orientation::Vertical => self.get(r.checked_sub(1)?, c).and_then(Cell::clue_v),
        }
    }

    /// Derive every sector's clue from the committed values: clear all
    /// clues, rebuild sectors, then stamp each sector's digit sum on the
    /// preceding block.
    pub fn derive_clues(&mut self) {
        for cell in &mut self.cells {
            if let Cell::Block { clue_h, clue_v } = cell {
                *clue_h = None;
                *clue_v = None;
            }
        }
        self.identify_sectors();

        let mut stamps: Vec<(usize, usize, Orientation, u32)> = Vec::new();
        for sector in &self.sectors {
            let sum: u32 = sector
                .cells
                .iter()
                .map(|&i| self.cells[i].value().unwrap_or(0) as u32)
                .sum();
            let (r, c) = self.coords(sector.cells[0]);
            stamps.push((r, c, sector.orientation, sum));
        }
        for (r, c, orientation, sum) in stamps {
            match orientation {
                Orientation::Horizontal => {
                    debug_assert!(c >= 1, "sector flush against the left border");
                    let idx = self.index(r, c - 1);
                    if let Cell::Block { clue_h, .. } = &mut self.cells[idx] {
                        *clue_h = Some(sum);
                    }
                }
                Orientation::Vertical => {
                    debug_assert!(r >= 1, "sector flush against the top border");
                    let idx = self.index(r - 1, c);
                    if let Cell::Block { clue_v, .. } = &mut self.cells[idx] {
                        *clue_v = Some(sum);
                    }
                }
            }
        }
    }

    // ==================== Validation ====================

    /// True iff all white cells form a single 4-connected component.
    pub fn check_connectivity(&self) -> bool {
        let components = self.find_components();
        components.len() == 1
    }

    /// Decompose the white set into 4-connected components.
    pub fn find_components(&self) -> Vec<Vec<usize>> {
        let mut components = Vec::new();
        let mut visited = vec![false; self.cells.len()];
        for start in 0..self.cells.len() {
            if !self.cells[start].is_white() || visited[start] {
                continue;
            }
            let mut comp = Vec::new();
            let mut queue = std::collections::VecDeque::new();
            queue.push_back(start);
            visited[start] = true;
            while let Some(idx) = queue.pop_front() {
                comp.push(idx);
                for (dr, dc) in [(0, 1), (0, -1), (1, 0), (-1, 0)] {
                    if let Some(n) = self.neighbor(idx, dr, dc) {
                        if self.cells[n].is_white() && !visited[n] {
                            visited[n] = true;
                            queue.push_back(n);
                        }
                    }
                }
            }
            components.push(comp);
        }
        components
    }

    /// Header rule: for every white cell, the cell to its left (and above)
    /// is either white or an in-grid block able to carry the clue.
    pub fn validate_clue_headers(&self) -> bool {
        for r in 0..self.height {
            for c in 0..self.width {
                if !self.cells[self.index(r, c)].is_white() {
                    continue;
                }
                if c == 0 || (!self.is_white(r, c - 1) && !self.get(r, c - 1).unwrap().is_block()) {
                    return false;
                }
                if r == 0 || (!self.is_white(r - 1, c) && !self.get(r - 1, c).unwrap().is_block()) {
                    return false;
                }
            }
        }
        true
    }

    /// Composite structural validator: every sector has length in `[2, 9]`
    /// and is preceded by an in-grid block, and no block carries a clue
    /// pointing at nothing.
    pub fn validate_structure(&self) -> bool {
        for sector in &self.sectors {
            if sector.len() < 2 || sector.len() > 9 {
                return false;
            }
            let (r, c) = self.coords(sector.cells[0]);
            let header = match sector.orientation {
                Orientation::Horizontal => c.checked_sub(1).and_then(|pc| self.get(r, pc)),
                Orientation::Vertical => r.checked_sub(1).and_then(|pr| self.get(pr, c)),
            };
            match header {
                Some(cell) if cell.is_block() => {}
                _ => return false,
            }
        }

        for r in 0..self.height {
            for c in 0..self.width {
                let cell = &self.cells[self.index(r, c)];
                if cell.clue_h().is_some() && !self.is_white(r, c + 1) {
                    return false;
                }
                if cell.clue_v().is_some() && !self.is_white(r + 1, c) {
                    return false;
                }
            }
        }
        true
    }

    /// 4-neighbourhood white count.
    pub fn count_white_neighbors(&self, idx: usize) -> usize {
        [(0, 1), (0, -1), (1, 0), (-1, 0)]
            .iter()
            .filter(|&&(dr, dc)| {
                self.neighbor(idx, dr, dc)
                    .map_or(false, |n| self.cells[n].is_white())
            })
            .count()
    }

    // ==================== Serialization helpers ====================

    /// White-cells-only snapshot for the event log, optionally overlaid
    /// with a transient assignment (indexed by cell).
    pub fn snapshot(&self, overlay: Option<&[Option<u8>]>) -> GridSnapshot {
        let mut whites = Vec::with_capacity(self.whites.len());
        for idx in 0..self.cells.len() {
            if !self.cells[idx].is_white() {
                continue;
            }
            let committed = self.cells[idx].value();
            let val = overlay
                .and_then(|o| o.get(idx).copied().flatten())
                .or(committed)
                .unwrap_or(0);
            let (r, c) = self.coords(idx);
            whites.push((r, c, val));
        }
        GridSnapshot {
            width: self.width,
            height: self.height,
            whites,
        }
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 5x5 board with a 3x3 white interior.
    fn full_interior() -> Board {
        let mut b = Board::with_seed(5, 5, 1);
        for r in 1..4 {
            for c in 1..4 {
                b.set_white(r, c);
            }
        }
        b.collect_whites();
        b.identify_sectors();
        b
    }

    #[test]
    fn test_border_stays_block() {
        let mut b = Board::with_seed(5, 5, 1);
        b.set_white(0, 2);
        b.set_white(4, 2);
        b.set_white(2, 0);
        assert!(!b.is_white(0, 2));
        assert!(!b.is_white(4, 2));
        assert!(!b.is_white(2, 0));
    }

    #[test]
    fn test_symmetric_mutation() {
        let mut b = full_interior();
        b.block_symmetric(1, 1);
        assert!(!b.is_white(1, 1));
        assert!(!b.is_white(3, 3));
        // Symmetry invariant holds for the remaining whites.
        for r in 0..5 {
            for c in 0..5 {
                let (sr, sc) = b.symmetric(r, c);
                assert_eq!(b.is_white(r, c), b.is_white(sr, sc));
            }
        }
    }

    #[test]
    fn test_identify_sectors() {
        let mut b = full_interior();
        b.identify_sectors();
        assert_eq!(b.sectors().len(), 6); // 3 rows + 3 cols
        for sector in b.sectors() {
            assert_eq!(sector.len(), 3);
        }
        // Every white cell links to both of its sectors.
        for &idx in b.whites() {
            let h = b.sector_of(idx, Orientation::Horizontal).unwrap();
            let v = b.sector_of(idx, Orientation::Vertical).unwrap();
            assert!(b.sector(h).cells.contains(&idx));
            assert!(b.sector(v).cells.contains(&idx));
        }
    }

    #[test]
    fn test_sector_rebuild_idempotent() {
        let mut b = full_interior();
        b.identify_sectors();
        let first = b.sectors().to_vec();
        b.identify_sectors();
        assert_eq!(first, b.sectors());
    }

    #[test]
    fn test_connectivity() {
        let mut b = full_interior();
        assert!(b.check_connectivity());
        // Split the interior with a full block column.
        let mut b2 = Board::with_seed(7, 5, 1);
        for r in 1..4 {
            b2.set_white(r, 1);
            b2.set_white(r, 2);
            b2.set_white(r, 4);
            b2.set_white(r, 5);
        }
        b2.collect_whites();
        assert!(!b2.check_connectivity());
        assert_eq!(b2.find_components().len(), 2);
        assert!(b.find_components().len() == 1);
    }

    #[test]
    fn test_derive_clues() {
        let mut b = full_interior();
        let values = [[1u8, 2, 3], [4, 5, 6], [7, 8, 9]];
        for r in 1..4 {
            for c in 1..4 {
                let idx = b.index(r, c);
                b.set_value(idx, Some(values[r - 1][c - 1]));
            }
        }
        b.derive_clues();
        assert_eq!(b.get(1, 0).unwrap().clue_h(), Some(6));
        assert_eq!(b.get(2, 0).unwrap().clue_h(), Some(15));
        assert_eq!(b.get(3, 0).unwrap().clue_h(), Some(24));
        assert_eq!(b.get(0, 1).unwrap().clue_v(), Some(12));
        assert_eq!(b.get(0, 2).unwrap().clue_v(), Some(15));
        assert_eq!(b.get(0, 3).unwrap().clue_v(), Some(18));
    }

    #[test]
    fn test_validate_structure() {
        let mut b = full_interior();
        assert!(b.validate_structure());
        assert!(b.validate_clue_headers());

        // A lone white cell produces two length-1 sectors.
        let mut bad = Board::with_seed(5, 5, 1);
        bad.set_white(2, 2);
        bad.collect_whites();
        bad.identify_sectors();
        assert!(!bad.validate_structure());
        assert!(b.validate_structure());
    }

    #[test]
    fn test_orphan_clue_rejected() {
        let mut b = full_interior();
        // Stamp a horizontal clue on a block with no white to its right.
        let idx = b.index(4, 4);
        *b.cell_mut(idx) = Cell::Block {
            clue_h: Some(10),
            clue_v: None,
        };
        assert!(!b.validate_structure());
    }

    #[test]
    fn test_count_white_neighbors() {
        let b = full_interior();
        assert_eq!(b.count_white_neighbors(b.index(2, 2)), 4);
        assert_eq!(b.count_white_neighbors(b.index(1, 1)), 2);
        assert_eq!(b.count_white_neighbors(b.index(1, 2)), 3);
    }

    #[test]
    fn test_reset_values() {
        let mut b = full_interior();
        let idx = b.index(1, 1);
        b.set_value(idx, Some(5));
        b.derive_clues();
        b.reset_values();
        assert_eq!(b.value(idx), None);
        assert_eq!(b.get(1, 0).unwrap().clue_h(), None);
    }

    #[test]
    fn test_snapshot_overlay() {
        let mut b = full_interior();
        let idx = b.index(1, 1);
        let mut overlay = vec![None; b.cell_count()];
        overlay[idx] = Some(7);
        let snap = b.snapshot(Some(&overlay));
        assert_eq!(snap.whites.len(), 9);
        assert!(snap.whites.contains(&(1, 1, 7)));
        b.set_value(idx, Some(3));
        let snap = b.snapshot(None);
        assert!(snap.whites.contains(&(1, 1, 3)));
    }
}
