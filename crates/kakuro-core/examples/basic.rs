//! Basic example of generating a Kakuro puzzle

use kakuro_core::{Difficulty, PuzzleGenerator};

fn main() {
    println!("Generating a 10x10 medium puzzle...\n");
    let mut generator = PuzzleGenerator::new(10, 10);

    if !generator.generate_with_difficulty(Difficulty::Medium) {
        println!("Generation failed within the time budget.");
        return;
    }

    let puzzle = generator.export();
    println!(
        "Rated {} (score {:.1}, {} steps), uniqueness: {}\n",
        puzzle.difficulty.rating,
        puzzle.difficulty.score,
        puzzle.difficulty.total_steps,
        puzzle.difficulty.uniqueness
    );

    // Render the grid: clues on blocks, solution digits on whites.
    for row in &puzzle.grid {
        let mut line = String::new();
        for cell in row {
            match cell.kind {
                kakuro_core::PuzzleCellKind::White => {
                    line.push_str(&format!("   {}   ", cell.solution.unwrap_or(0)));
                }
                kakuro_core::PuzzleCellKind::Block => match (cell.clue_v, cell.clue_h) {
                    (None, None) => line.push_str("   #   "),
                    (v, h) => line.push_str(&format!(
                        "{:>3}\\{:<3}",
                        v.map(|x| x.to_string()).unwrap_or_default(),
                        h.map(|x| x.to_string()).unwrap_or_default()
                    )),
                },
            }
        }
        println!("{}", line);
    }

    println!("\nSolve path:");
    for step in &puzzle.difficulty.solve_path {
        println!(
            "  {} (weight {}, {} cells)",
            step.technique, step.weight, step.cells_affected
        );
    }
}
