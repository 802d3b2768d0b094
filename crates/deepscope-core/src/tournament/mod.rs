// Hypothesis tournament
//
// Several sessions explore competing theories about one issue in
// parallel, weak theories are eliminated round by round, and strong
// sessions share pattern-level insights with struggling ones.

pub mod exploration;
pub mod keywords;
pub mod scheduler;
pub mod types;

pub use scheduler::TournamentScheduler;
pub use types::{
    compare_results, score_evidence, Evidence, EvidencePolarity, ExplorationResult, Hypothesis,
    HypothesisCategory, TournamentConfig, TournamentResult, TournamentRound,
};
