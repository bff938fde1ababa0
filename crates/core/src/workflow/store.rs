use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalStep, ApprovalStepId};
use crate::domain::company::{ApprovalRule, ApproverAssignment, Company, CompanyId};
use crate::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use crate::domain::user::{User, UserId};
use crate::errors::ApplicationError;

/// Everything a single decision changes, applied by the store as one unit.
///
/// The store must reject the plan with [`ApplicationError::Conflict`] when the expense is no
/// longer at `expected_version`, the decided step is no longer pending, or the step to
/// activate is no longer queued. A rejected plan leaves no trace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPlan {
    pub expense_id: ExpenseId,
    pub expected_version: u32,
    pub expense_status: ExpenseStatus,
    pub decided_step: ApprovalStep,
    pub activate_step: Option<ApprovalStepId>,
    pub decided_at: DateTime<Utc>,
}

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, ApplicationError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ApplicationError>;

    async fn list_company_users(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<User>, ApplicationError>;

    async fn save_user(&self, user: &User) -> Result<(), ApplicationError>;

    async fn find_company(&self, id: &CompanyId) -> Result<Option<Company>, ApplicationError>;

    /// Inserts the company and links `owner` to it in one transaction.
    async fn create_company(&self, company: &Company, owner: &User) -> Result<(), ApplicationError>;
}

#[async_trait]
pub trait WorkflowStore: DirectoryStore {
    /// Assignments ordered by ascending `step_order`.
    async fn list_assignments(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApproverAssignment>, ApplicationError>;

    /// Deletes every assignment of the company and inserts `assignments`, atomically.
    async fn replace_assignments(
        &self,
        company_id: &CompanyId,
        assignments: &[ApproverAssignment],
    ) -> Result<(), ApplicationError>;

    async fn find_rule(&self, company_id: &CompanyId)
        -> Result<Option<ApprovalRule>, ApplicationError>;

    async fn save_rule(&self, rule: &ApprovalRule) -> Result<(), ApplicationError>;

    /// Persists the expense together with its whole chain, or nothing.
    async fn create_expense(
        &self,
        expense: &Expense,
        steps: &[ApprovalStep],
    ) -> Result<(), ApplicationError>;

    async fn find_expense(&self, id: &ExpenseId) -> Result<Option<Expense>, ApplicationError>;

    /// Newest first.
    async fn list_expenses_for_employee(
        &self,
        employee_id: &UserId,
    ) -> Result<Vec<Expense>, ApplicationError>;

    /// Steps ordered by ascending `step_order`.
    async fn list_steps(&self, expense_id: &ExpenseId)
        -> Result<Vec<ApprovalStep>, ApplicationError>;

    async fn list_pending_steps_for(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<ApprovalStep>, ApplicationError>;

    async fn commit_decision(&self, plan: &DecisionPlan) -> Result<(), ApplicationError>;
}
