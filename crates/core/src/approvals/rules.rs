use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalStep, ApprovalStepId, StepStatus};
use crate::domain::company::ApprovalRule;
use crate::domain::expense::ExpenseStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReason {
    /// At least one step was rejected.
    Rejected,
    /// The approval rule (threshold, unanimity or specific approver) is satisfied.
    RuleSatisfied,
    /// The next queued step was promoted to pending.
    AwaitingNextStep,
    /// Nothing left to activate; the expense stays pending until an administrator intervenes.
    ChainExhausted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub expense_status: ExpenseStatus,
    pub activate_step: Option<ApprovalStepId>,
    pub reason: EvaluationReason,
    pub approved_count: usize,
    pub total: usize,
    pub percentage_ok: bool,
    pub specific_approved: bool,
}

impl RuleEvaluation {
    fn rejected(approved_count: usize, total: usize) -> Self {
        Self {
            expense_status: ExpenseStatus::Rejected,
            activate_step: None,
            reason: EvaluationReason::Rejected,
            approved_count,
            total,
            percentage_ok: false,
            specific_approved: false,
        }
    }
}

/// Pure decision function over an expense's full step list and its company rule.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuleEvaluator;

impl RuleEvaluator {
    pub fn evaluate(steps: &[ApprovalStep], rule: Option<&ApprovalRule>) -> RuleEvaluation {
        let approved_count = count_with_status(steps, StepStatus::Approved);
        let total = steps.len();

        if steps.iter().any(|step| step.status == StepStatus::Rejected) {
            return RuleEvaluation::rejected(approved_count, total);
        }

        let specific_approved = rule
            .and_then(|rule| rule.specific_approver_id.as_ref())
            .map(|approver_id| {
                steps.iter().any(|step| {
                    step.approver_id == *approver_id && step.status == StepStatus::Approved
                })
            })
            .unwrap_or(false);

        let percentage_ok = match rule.and_then(|rule| rule.percentage_threshold) {
            Some(threshold) => meets_threshold(approved_count, total, threshold),
            None => approved_count == total && total > 0,
        };

        // `hybrid` combines the same two paths with OR, so both branches agree.
        let approved = match rule {
            Some(rule) if rule.hybrid => percentage_ok || specific_approved,
            _ => specific_approved || percentage_ok,
        };

        if approved {
            return RuleEvaluation {
                expense_status: ExpenseStatus::Approved,
                activate_step: None,
                reason: EvaluationReason::RuleSatisfied,
                approved_count,
                total,
                percentage_ok,
                specific_approved,
            };
        }

        let next_queued = steps
            .iter()
            .filter(|step| step.status == StepStatus::Queued)
            .min_by_key(|step| step.step_order);

        RuleEvaluation {
            expense_status: ExpenseStatus::Pending,
            activate_step: next_queued.map(|step| step.id.clone()),
            reason: if next_queued.is_some() {
                EvaluationReason::AwaitingNextStep
            } else {
                EvaluationReason::ChainExhausted
            },
            approved_count,
            total,
            percentage_ok,
            specific_approved,
        }
    }
}

fn count_with_status(steps: &[ApprovalStep], status: StepStatus) -> usize {
    steps.iter().filter(|step| step.status == status).count()
}

/// `approved / max(total, 1) * 100 >= threshold`, cross-multiplied to stay exact.
fn meets_threshold(approved_count: usize, total: usize, threshold: u8) -> bool {
    let denominator = total.max(1) as u64;
    approved_count as u64 * 100 >= u64::from(threshold) * denominator
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{meets_threshold, EvaluationReason, RuleEvaluator};
    use crate::domain::approval::{ApprovalStep, ApprovalStepId, StepStatus};
    use crate::domain::company::{ApprovalRule, CompanyId};
    use crate::domain::expense::{ExpenseId, ExpenseStatus};
    use crate::domain::user::UserId;

    fn chain(statuses: &[(&str, StepStatus)]) -> Vec<ApprovalStep> {
        statuses
            .iter()
            .enumerate()
            .map(|(index, (approver, status))| ApprovalStep {
                id: ApprovalStepId(format!("s-{}", index + 1)),
                expense_id: ExpenseId("e-1".to_string()),
                approver_id: UserId(approver.to_string()),
                step_order: index as u32 + 1,
                status: *status,
                comment: None,
                decided_at: None,
                created_at: Utc::now(),
            })
            .collect()
    }

    fn rule(threshold: Option<u8>, specific: Option<&str>, hybrid: bool) -> ApprovalRule {
        ApprovalRule {
            company_id: CompanyId("c-1".to_string()),
            percentage_threshold: threshold,
            specific_approver_id: specific.map(|id| UserId(id.to_string())),
            hybrid,
        }
    }

    #[test]
    fn single_rejection_is_terminal_regardless_of_other_approvals() {
        let steps = chain(&[
            ("a", StepStatus::Approved),
            ("b", StepStatus::Rejected),
            ("c", StepStatus::Queued),
        ]);
        let lenient = rule(Some(0), Some("a"), true);

        let evaluation = RuleEvaluator::evaluate(&steps, Some(&lenient));

        assert_eq!(evaluation.expense_status, ExpenseStatus::Rejected);
        assert_eq!(evaluation.reason, EvaluationReason::Rejected);
        assert!(evaluation.activate_step.is_none());
    }

    #[test]
    fn without_rule_every_step_must_approve() {
        let partial = chain(&[
            ("a", StepStatus::Approved),
            ("b", StepStatus::Queued),
            ("c", StepStatus::Queued),
        ]);
        let evaluation = RuleEvaluator::evaluate(&partial, None);
        assert_eq!(evaluation.expense_status, ExpenseStatus::Pending);
        assert_eq!(evaluation.activate_step, Some(ApprovalStepId("s-2".to_string())));
        assert_eq!(evaluation.reason, EvaluationReason::AwaitingNextStep);

        let complete = chain(&[
            ("a", StepStatus::Approved),
            ("b", StepStatus::Approved),
            ("c", StepStatus::Approved),
        ]);
        let evaluation = RuleEvaluator::evaluate(&complete, None);
        assert_eq!(evaluation.expense_status, ExpenseStatus::Approved);
        assert!(evaluation.activate_step.is_none());
    }

    #[test]
    fn threshold_approves_once_share_is_reached() {
        let sixty = rule(Some(60), None, false);

        let one_of_three = chain(&[
            ("a", StepStatus::Approved),
            ("b", StepStatus::Queued),
            ("c", StepStatus::Queued),
        ]);
        let evaluation = RuleEvaluator::evaluate(&one_of_three, Some(&sixty));
        assert_eq!(evaluation.expense_status, ExpenseStatus::Pending);
        assert!(!evaluation.percentage_ok);

        let two_of_three = chain(&[
            ("a", StepStatus::Approved),
            ("b", StepStatus::Approved),
            ("c", StepStatus::Queued),
        ]);
        let evaluation = RuleEvaluator::evaluate(&two_of_three, Some(&sixty));
        assert_eq!(evaluation.expense_status, ExpenseStatus::Approved);
        assert!(evaluation.percentage_ok);
        assert!(evaluation.activate_step.is_none());
    }

    #[test]
    fn specific_approver_wins_even_when_earlier_steps_are_open() {
        let steps = chain(&[
            ("a", StepStatus::Queued),
            ("b", StepStatus::Pending),
            ("cfo", StepStatus::Approved),
        ]);
        let evaluation = RuleEvaluator::evaluate(&steps, Some(&rule(None, Some("cfo"), false)));

        assert_eq!(evaluation.expense_status, ExpenseStatus::Approved);
        assert!(evaluation.specific_approved);
        assert!(!evaluation.percentage_ok);
    }

    #[test]
    fn specific_approver_pending_does_not_count() {
        let steps = chain(&[("a", StepStatus::Approved), ("cfo", StepStatus::Queued)]);
        let evaluation = RuleEvaluator::evaluate(&steps, Some(&rule(None, Some("cfo"), false)));

        assert_eq!(evaluation.expense_status, ExpenseStatus::Pending);
        assert_eq!(evaluation.activate_step, Some(ApprovalStepId("s-2".to_string())));
    }

    #[test]
    fn hybrid_flag_matches_non_hybrid_outcome() {
        let steps = chain(&[
            ("a", StepStatus::Approved),
            ("cfo", StepStatus::Pending),
            ("c", StepStatus::Queued),
        ]);

        for (threshold, specific) in
            [(Some(30), None), (Some(90), Some("a")), (Some(90), Some("cfo")), (None, None)]
        {
            let plain = RuleEvaluator::evaluate(&steps, Some(&rule(threshold, specific, false)));
            let hybrid = RuleEvaluator::evaluate(&steps, Some(&rule(threshold, specific, true)));
            assert_eq!(plain.expense_status, hybrid.expense_status);
        }
    }

    #[test]
    fn exhausted_chain_stays_pending() {
        let steps = chain(&[("a", StepStatus::Approved), ("b", StepStatus::Pending)]);
        let evaluation = RuleEvaluator::evaluate(&steps, Some(&rule(Some(100), None, false)));
        assert_eq!(evaluation.expense_status, ExpenseStatus::Pending);
        assert_eq!(evaluation.reason, EvaluationReason::ChainExhausted);
        assert!(evaluation.activate_step.is_none());
    }

    #[test]
    fn zero_step_chain_stays_pending_without_rule() {
        let evaluation = RuleEvaluator::evaluate(&[], None);

        assert_eq!(evaluation.expense_status, ExpenseStatus::Pending);
        assert_eq!(evaluation.reason, EvaluationReason::ChainExhausted);
        assert_eq!(evaluation.total, 0);
    }

    #[test]
    fn zero_step_chain_with_zero_threshold_is_approved() {
        let evaluation = RuleEvaluator::evaluate(&[], Some(&rule(Some(0), None, false)));
        assert_eq!(evaluation.expense_status, ExpenseStatus::Approved);
    }

    #[test]
    fn rule_without_threshold_falls_back_to_unanimity() {
        let steps = chain(&[("a", StepStatus::Approved), ("b", StepStatus::Approved)]);
        let evaluation = RuleEvaluator::evaluate(&steps, Some(&rule(None, None, true)));
        assert_eq!(evaluation.expense_status, ExpenseStatus::Approved);
    }

    #[test]
    fn threshold_comparison_is_inclusive_and_exact() {
        assert!(meets_threshold(3, 5, 60));
        assert!(!meets_threshold(2, 5, 60));
        assert!(meets_threshold(57, 100, 57));
        assert!(meets_threshold(0, 0, 0));
        assert!(!meets_threshold(0, 0, 1));
    }
}
