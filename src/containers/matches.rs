//! The match triple produced by the matchmaker.

/// One `(population_row, peripheral_row)` pair satisfying the join and time
/// constraints. `score` is the weight this match contributes to an
/// aggregation: 1.0 for propositionalisation and SUM-style trees,
/// `1/|matches(ix_output)|` for AVG-style trees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub ix_output: usize,
    pub ix_input: usize,
    pub score: f64,
}

impl Match {
    pub fn new(ix_output: usize, ix_input: usize) -> Self {
        Match {
            ix_output,
            ix_input,
            score: 1.0,
        }
    }
}
