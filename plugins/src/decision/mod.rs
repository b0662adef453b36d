mod heuristic;

pub use heuristic::HeuristicDecisionService;
