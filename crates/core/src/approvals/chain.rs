use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::{ApprovalStep, ApprovalStepId, StepStatus};
use crate::domain::company::ApproverAssignment;
use crate::domain::expense::ExpenseId;
use crate::domain::user::{User, UserId};

/// One approver's position in a freshly built chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSlot {
    pub approver_id: UserId,
    pub step_order: u32,
    pub status: StepStatus,
}

impl ChainSlot {
    pub fn into_step(self, expense_id: &ExpenseId, created_at: DateTime<Utc>) -> ApprovalStep {
        ApprovalStep {
            id: ApprovalStepId(format!("STEP-{}", Uuid::new_v4())),
            expense_id: expense_id.clone(),
            approver_id: self.approver_id,
            step_order: self.step_order,
            status: self.status,
            comment: None,
            decided_at: None,
            created_at,
        }
    }
}

/// Builds the per-expense approval chain from the employee's manager link and the
/// company assignment template.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApprovalChainBuilder;

impl ApprovalChainBuilder {
    pub fn build(employee: &User, assignments: &[ApproverAssignment]) -> Vec<ChainSlot> {
        let mut ordered: Vec<&ApproverAssignment> = assignments.iter().collect();
        ordered.sort_by_key(|assignment| assignment.step_order);

        let approvers = employee
            .approving_manager()
            .into_iter()
            .chain(ordered.into_iter().map(|assignment| &assignment.approver_id));

        approvers
            .enumerate()
            .map(|(index, approver_id)| ChainSlot {
                approver_id: approver_id.clone(),
                step_order: index as u32 + 1,
                status: if index == 0 { StepStatus::Pending } else { StepStatus::Queued },
            })
            .collect()
    }

    pub fn build_steps(
        employee: &User,
        assignments: &[ApproverAssignment],
        expense_id: &ExpenseId,
        created_at: DateTime<Utc>,
    ) -> Vec<ApprovalStep> {
        Self::build(employee, assignments)
            .into_iter()
            .map(|slot| slot.into_step(expense_id, created_at))
            .collect()
    }
}
