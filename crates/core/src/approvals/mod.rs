pub mod chain;
pub mod rules;

pub use chain::{ApprovalChainBuilder, ChainSlot};
pub use rules::{EvaluationReason, RuleEvaluation, RuleEvaluator};
