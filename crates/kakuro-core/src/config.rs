//! Difficulty presets and generation parameters.
//!
//! Both parameter structs follow the same convention: every field is
//! optional, and anything left unset is filled from the difficulty table at
//! resolution time. Callers override single fields without restating the
//! whole preset.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Requested generation difficulty. Distinct from the estimator's
/// [`Rating`](crate::Rating), which grades the finished puzzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    VeryEasy,
    Easy,
    Medium,
    Hard,
    VeryHard,
    Extreme,
}

impl Difficulty {
    pub fn all() -> &'static [Difficulty] {
        &[
            Difficulty::VeryEasy,
            Difficulty::Easy,
            Difficulty::Medium,
            Difficulty::Hard,
            Difficulty::VeryHard,
            Difficulty::Extreme,
        ]
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Difficulty::VeryEasy => "very_easy",
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::VeryHard => "very_hard",
            Difficulty::Extreme => "extreme",
        };
        f.write_str(s)
    }
}

/// How strongly the filler steers sector sums toward few-partition clues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionPreference {
    /// No partition bias; value ordering uses the digit weights alone.
    Unbiased,
    /// Prefer clues with few valid partitions.
    Few,
    /// Prefer clues with a unique (or near-unique) partition.
    Unique,
}

// ==================== Topology parameters ====================

/// Parameters for the topology generator. Unset fields fall back to the
/// difficulty table, then to the baseline defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyParams {
    pub difficulty: Difficulty,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sector_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_stamps: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_cells: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_run_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_run_len_soft: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_run_len_soft_prob: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_patch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub island_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stamps: Option<Vec<(usize, usize)>>,
}

impl Default for TopologyParams {
    fn default() -> Self {
        Self::for_difficulty(Difficulty::Medium)
    }
}

impl TopologyParams {
    pub fn for_difficulty(difficulty: Difficulty) -> Self {
        Self {
            difficulty,
            density: None,
            max_sector_length: None,
            num_stamps: None,
            min_cells: None,
            max_run_len: None,
            max_run_len_soft: None,
            max_run_len_soft_prob: None,
            max_patch_size: None,
            island_mode: None,
            stamps: None,
        }
    }

    /// Fill unset fields from the difficulty table and draw the stamp
    /// count, producing a fully concrete configuration.
    pub(crate) fn resolve(&self, width: usize, height: usize, rng: &mut StdRng) -> TopologyConfig {
        let area = (width - 2) * (height - 2);
        let quarter = (area as f64 * 0.25) as usize;

        struct Row {
            stamps: &'static [(usize, usize)],
            stamp_range: (usize, usize),
            min_cells: usize,
            max_run_len: usize,
            soft: usize,
            soft_prob: f64,
            patch: usize,
            sector_len: usize,
            island: Option<bool>,
        }

        let row = match self.difficulty {
            Difficulty::VeryEasy => Row {
                stamps: &[(2, 2), (2, 3), (3, 2), (2, 4), (4, 2)],
                stamp_range: (6, 8),
                min_cells: 16,
                max_run_len: 5,
                soft: 2,
                soft_prob: 0.8,
                patch: 3,
                sector_len: 5,
                island: Some(true),
            },
            Difficulty::Easy => Row {
                stamps: &[(2, 3), (3, 2), (2, 4), (4, 2)],
                stamp_range: (8, 10),
                min_cells: 22,
                max_run_len: 6,
                soft: 3,
                soft_prob: 0.5,
                patch: 3,
                sector_len: 6,
                island: Some(true),
            },
            Difficulty::Medium => Row {
                stamps: &[
                    (2, 3),
                    (3, 2),
                    (2, 5),
                    (5, 2),
                    (2, 6),
                    (6, 2),
                    (2, 2),
                    (3, 3),
                ],
                stamp_range: (8, 12),
                min_cells: quarter,
                max_run_len: 8,
                soft: 4,
                soft_prob: 0.4,
                patch: 3,
                sector_len: 8,
                island: None,
            },
            Difficulty::Hard => Row {
                stamps: &[(2, 3), (3, 2), (2, 5), (5, 2)],
                stamp_range: (10, 12),
                min_cells: quarter,
                max_run_len: 9,
                soft: 5,
                soft_prob: 0.3,
                patch: 3,
                sector_len: 9,
                island: None,
            },
            Difficulty::VeryHard => Row {
                stamps: &[
                    (2, 3),
                    (3, 2),
                    (2, 4),
                    (4, 2),
                    (2, 5),
                    (5, 2),
                    (2, 6),
                    (6, 2),
                    (2, 2),
                    (3, 3),
                ],
                stamp_range: (12, 16),
                min_cells: quarter,
                max_run_len: 9,
                soft: 6,
                soft_prob: 0.25,
                patch: 4,
                sector_len: 9,
                island: None,
            },
            Difficulty::Extreme => Row {
                stamps: &[
                    (2, 3),
                    (3, 2),
                    (2, 4),
                    (4, 2),
                    (2, 5),
                    (5, 2),
                    (2, 6),
                    (6, 2),
                    (2, 2),
                    (3, 3),
                ],
                stamp_range: (14, 20),
                min_cells: (area as f64 * 0.30) as usize,
                max_run_len: 9,
                soft: 7,
                soft_prob: 0.25,
                patch: 5,
                sector_len: 9,
                island: None,
            },
        };

        let num_stamps = self.num_stamps.unwrap_or_else(|| {
            rng.gen_range(row.stamp_range.0..=row.stamp_range.1) * area / 100
        });

        TopologyConfig {
            stamps: self
                .stamps
                .clone()
                .unwrap_or_else(|| row.stamps.to_vec()),
            num_stamps,
            min_cells: self.min_cells.unwrap_or(row.min_cells),
            max_run_len: self.max_run_len.unwrap_or(row.max_run_len),
            max_run_len_soft: self.max_run_len_soft.unwrap_or(row.soft),
            max_run_len_soft_prob: self.max_run_len_soft_prob.unwrap_or(row.soft_prob),
            max_patch_size: self.max_patch_size.unwrap_or(row.patch),
            island_mode: self.island_mode.or(row.island).unwrap_or(true),
            density: self.density.unwrap_or(0.60),
            max_sector_length: self.max_sector_length.unwrap_or(row.sector_len),
        }
    }
}

/// Fully resolved topology configuration.
#[derive(Debug, Clone)]
pub(crate) struct TopologyConfig {
    pub stamps: Vec<(usize, usize)>,
    pub num_stamps: usize,
    pub min_cells: usize,
    pub max_run_len: usize,
    pub max_run_len_soft: usize,
    pub max_run_len_soft_prob: f64,
    pub max_patch_size: usize,
    pub island_mode: bool,
    pub density: f64,
    pub max_sector_length: usize,
}

// ==================== Fill parameters ====================

/// Parameters for the CSP filler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillParams {
    pub difficulty: Difficulty,
    /// Static digit weights, index 0 = digit 1. Unset: difficulty table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<[u32; 9]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_preference: Option<PartitionPreference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_nodes: Option<u32>,
    /// Fraction of fully-assigned sectors that must have an "easy" partition
    /// count for the `Unique` preference to accept a fill.
    pub unique_clue_ratio: f64,
    /// Same threshold for the `Few` preference.
    pub few_clue_ratio: f64,
}

impl Default for FillParams {
    fn default() -> Self {
        Self::for_difficulty(Difficulty::Medium)
    }
}

impl FillParams {
    pub const DEFAULT_MAX_NODES: u32 = 30_000;

    pub fn for_difficulty(difficulty: Difficulty) -> Self {
        Self {
            difficulty,
            weights: None,
            partition_preference: None,
            max_nodes: None,
            unique_clue_ratio: 0.80,
            few_clue_ratio: 0.60,
        }
    }

    /// Resolve the digit-weight table and partition preference.
    pub(crate) fn resolve(&self) -> ([u32; 9], PartitionPreference) {
        let (weights, preference) = match self.difficulty {
            Difficulty::VeryEasy => (
                [20, 15, 5, 1, 1, 1, 5, 15, 20],
                PartitionPreference::Unique,
            ),
            Difficulty::Easy => ([10, 8, 6, 2, 1, 2, 6, 8, 10], PartitionPreference::Few),
            Difficulty::Medium => ([5; 9], PartitionPreference::Few),
            Difficulty::Hard => (
                [1, 2, 5, 10, 10, 10, 5, 2, 1],
                PartitionPreference::Unbiased,
            ),
            Difficulty::VeryHard | Difficulty::Extreme => {
                ([5; 9], PartitionPreference::Unbiased)
            }
        };
        (
            self.weights.unwrap_or(weights),
            self.partition_preference.unwrap_or(preference),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_very_easy_table() {
        let mut rng = StdRng::seed_from_u64(7);
        let cfg = TopologyParams::for_difficulty(Difficulty::VeryEasy).resolve(10, 10, &mut rng);
        assert!(cfg.island_mode);
        assert_eq!(cfg.max_run_len, 5);
        assert_eq!(cfg.min_cells, 16);
        assert_eq!(cfg.max_sector_length, 5);
        assert_eq!(cfg.max_patch_size, 3);
        // num_stamps is (6..=8) * 64 / 100
        assert!((3..=5).contains(&cfg.num_stamps));
    }

    #[test]
    fn test_area_scaled_min_cells() {
        let mut rng = StdRng::seed_from_u64(7);
        let cfg = TopologyParams::for_difficulty(Difficulty::Medium).resolve(12, 12, &mut rng);
        assert_eq!(cfg.min_cells, 25); // 0.25 * 100
        let cfg = TopologyParams::for_difficulty(Difficulty::Extreme).resolve(12, 12, &mut rng);
        assert_eq!(cfg.min_cells, 30); // 0.30 * 100
    }

    #[test]
    fn test_overrides_win() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut p = TopologyParams::for_difficulty(Difficulty::Hard);
        p.max_run_len = Some(4);
        p.island_mode = Some(false);
        p.num_stamps = Some(3);
        let cfg = p.resolve(10, 10, &mut rng);
        assert_eq!(cfg.max_run_len, 4);
        assert!(!cfg.island_mode);
        assert_eq!(cfg.num_stamps, 3);
    }

    #[test]
    fn test_fill_resolution() {
        let (w, p) = FillParams::for_difficulty(Difficulty::VeryEasy).resolve();
        assert_eq!(w[0], 20);
        assert_eq!(p, PartitionPreference::Unique);

        let (w, p) = FillParams::for_difficulty(Difficulty::Hard).resolve();
        assert_eq!(w[4], 10);
        assert_eq!(p, PartitionPreference::Unbiased);

        let mut params = FillParams::for_difficulty(Difficulty::Medium);
        params.partition_preference = Some(PartitionPreference::Unique);
        let (_, p) = params.resolve();
        assert_eq!(p, PartitionPreference::Unique);
    }
}
