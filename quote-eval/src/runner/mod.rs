//! Evaluation execution engine

pub mod evaluator;
pub mod rate_limiter;

pub use evaluator::{
    apply_manual_score, apply_manual_scores, format_prompt_echo, select_samples, ConsoleProgress,
    EvalError, EvaluationSummary, Evaluator, ModelRunReport, NoOpProgress, ProgressCallback,
    RunOptions,
};
pub use rate_limiter::RateLimiter;
