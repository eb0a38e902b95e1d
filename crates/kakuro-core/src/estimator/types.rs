use serde::{Deserialize, Serialize};

/// Technique tier, ordered from mechanical to speculative. The highest
/// tier reached while solving decides the rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    VeryEasy = 1,
    Easy = 2,
    Medium = 3,
    Hard = 4,
    Extreme = 5,
}

impl Tier {
    pub fn rating(self) -> Rating {
        match self {
            Tier::VeryEasy => Rating::VeryEasy,
            Tier::Easy => Rating::Easy,
            Tier::Medium => Rating::Medium,
            Tier::Hard => Rating::Hard,
            Tier::Extreme => Rating::Extreme,
        }
    }
}

/// Final puzzle rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rating {
    VeryEasy,
    Easy,
    Medium,
    Hard,
    Extreme,
    /// The search budget ran out before the ladder settled the puzzle.
    Unsolvable,
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Rating::VeryEasy => "Very Easy",
            Rating::Easy => "Easy",
            Rating::Medium => "Medium",
            Rating::Hard => "Hard",
            Rating::Extreme => "Extreme",
            Rating::Unsolvable => "Extreme / Unsolvable",
        };
        f.write_str(s)
    }
}

/// A solving technique from the fixed ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    UniqueIntersection,
    EliminationSingles,
    SimplePartition,
    HiddenSingles,
    ConstraintPropagation,
    ComplexIntersection,
    TrialAndError,
}

impl Technique {
    pub fn tier(self) -> Tier {
        match self {
            Technique::UniqueIntersection | Technique::EliminationSingles => Tier::VeryEasy,
            Technique::SimplePartition => Tier::Easy,
            Technique::HiddenSingles | Technique::ConstraintPropagation => Tier::Medium,
            Technique::ComplexIntersection => Tier::Hard,
            Technique::TrialAndError => Tier::Extreme,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Technique::UniqueIntersection => "unique_intersection",
            Technique::EliminationSingles => "elimination_singles",
            Technique::SimplePartition => "simple_partition",
            Technique::HiddenSingles => "hidden_singles",
            Technique::ConstraintPropagation => "constraint_propagation",
            Technique::ComplexIntersection => "complex_intersection",
            Technique::TrialAndError => "trial_and_error",
        }
    }
}

impl std::fmt::Display for Technique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-technique effort weights; `score = sum(weight * cells_affected)`.
/// Override to reproduce alternative legacy scorings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TechniqueWeights {
    pub unique_intersection: f32,
    pub elimination_singles: f32,
    pub simple_partition: f32,
    pub hidden_singles: f32,
    pub constraint_propagation: f32,
    pub complex_intersection: f32,
    pub trial_and_error: f32,
}

impl Default for TechniqueWeights {
    fn default() -> Self {
        Self {
            unique_intersection: 1.0,
            elimination_singles: 1.0,
            simple_partition: 2.5,
            hidden_singles: 5.0,
            constraint_propagation: 5.0,
            complex_intersection: 12.0,
            trial_and_error: 50.0,
        }
    }
}

impl TechniqueWeights {
    pub fn effort(&self, technique: Technique) -> f32 {
        match technique {
            Technique::UniqueIntersection => self.unique_intersection,
            Technique::EliminationSingles => self.elimination_singles,
            Technique::SimplePartition => self.simple_partition,
            Technique::HiddenSingles => self.hidden_singles,
            Technique::ConstraintPropagation => self.constraint_propagation,
            Technique::ComplexIntersection => self.complex_intersection,
            Technique::TrialAndError => self.trial_and_error,
        }
    }

    /// Weight written into the solve path. Unique intersection is reported
    /// at half weight, matching the historical solve-path column.
    pub fn reported(&self, technique: Technique) -> f32 {
        match technique {
            Technique::UniqueIntersection => 0.5,
            other => self.effort(other),
        }
    }
}

/// One logged solving step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveStep {
    pub technique: Technique,
    pub weight: f32,
    pub cells_affected: usize,
}

/// Solution-count verdict attached to the difficulty result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Uniqueness {
    Unique,
    Multiple,
    NoSolution,
    /// Budget exhausted before counting finished.
    Inconclusive,
}

impl std::fmt::Display for Uniqueness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Uniqueness::Unique => "Unique",
            Uniqueness::Multiple => "Multiple",
            Uniqueness::NoSolution => "No Solution",
            Uniqueness::Inconclusive => "Inconclusive (Timeout)",
        };
        f.write_str(s)
    }
}

/// Result of a detailed difficulty estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyResult {
    pub rating: Rating,
    /// Cumulative effort: `sum(effort_weight * cells_affected)`.
    pub score: f32,
    pub max_tier: Tier,
    pub total_steps: usize,
    pub solution_count: usize,
    pub uniqueness: Uniqueness,
    pub solve_path: Vec<SolveStep>,
}

impl Default for DifficultyResult {
    fn default() -> Self {
        Self {
            rating: Rating::VeryEasy,
            score: 0.0,
            max_tier: Tier::VeryEasy,
            total_steps: 0,
            solution_count: 0,
            uniqueness: Uniqueness::NoSolution,
            solve_path: Vec::new(),
        }
    }
}
