use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use receiptpath_core::domain::approval::{ApprovalStep, StepStatus};
use receiptpath_core::domain::company::{ApprovalRule, ApproverAssignment, Company, CompanyId};
use receiptpath_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use receiptpath_core::domain::user::{User, UserId};
use receiptpath_core::errors::ApplicationError;
use receiptpath_core::workflow::store::{DecisionPlan, DirectoryStore, WorkflowStore};

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, User>,
    companies: HashMap<String, Company>,
    assignments: HashMap<String, Vec<ApproverAssignment>>,
    rules: HashMap<String, ApprovalRule>,
    expenses: HashMap<String, Expense>,
    steps: HashMap<String, Vec<ApprovalStep>>,
    // Insertion sequence, used to break created_at ties when listing.
    expense_seq: HashMap<String, u64>,
    next_seq: u64,
}

/// Store held entirely in memory. Every mutation runs under one write lock, so a decision is
/// applied completely or not at all.
#[derive(Clone, Default)]
pub struct InMemoryWorkflowStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn conflict(message: String) -> ApplicationError {
    ApplicationError::Conflict(message)
}

#[async_trait]
impl DirectoryStore for InMemoryWorkflowStore {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, ApplicationError> {
        let state = self.state.read().await;
        Ok(state.users.get(&id.0).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ApplicationError> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|user| user.email == email).cloned())
    }

    async fn list_company_users(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<User>, ApplicationError> {
        let state = self.state.read().await;
        let mut users: Vec<User> =
            state.users.values().filter(|user| user.belongs_to(company_id)).cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn save_user(&self, user: &User) -> Result<(), ApplicationError> {
        let mut state = self.state.write().await;
        let email_taken =
            state.users.values().any(|other| other.email == user.email && other.id != user.id);
        if email_taken {
            return Err(conflict(format!("email `{}` is already registered", user.email)));
        }
        state.users.insert(user.id.0.clone(), user.clone());
        Ok(())
    }

    async fn find_company(&self, id: &CompanyId) -> Result<Option<Company>, ApplicationError> {
        let state = self.state.read().await;
        Ok(state.companies.get(&id.0).cloned())
    }

    async fn create_company(&self, company: &Company, owner: &User) -> Result<(), ApplicationError> {
        let mut state = self.state.write().await;
        if state.companies.contains_key(&company.id.0) {
            return Err(conflict(format!("company `{}` already exists", company.id.0)));
        }
        let stored_owner = state
            .users
            .get_mut(&owner.id.0)
            .ok_or_else(|| ApplicationError::not_found("user", &owner.id.0))?;
        if stored_owner.company_id.is_some() {
            return Err(conflict(format!("user `{}` is already linked to a company", owner.id.0)));
        }

        stored_owner.company_id = Some(company.id.clone());
        stored_owner.role = owner.role;
        state.companies.insert(company.id.0.clone(), company.clone());
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn list_assignments(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApproverAssignment>, ApplicationError> {
        let state = self.state.read().await;
        let mut assignments = state.assignments.get(&company_id.0).cloned().unwrap_or_default();
        assignments.sort_by_key(|assignment| assignment.step_order);
        Ok(assignments)
    }

    async fn replace_assignments(
        &self,
        company_id: &CompanyId,
        assignments: &[ApproverAssignment],
    ) -> Result<(), ApplicationError> {
        let mut state = self.state.write().await;
        state.assignments.insert(company_id.0.clone(), assignments.to_vec());
        Ok(())
    }

    async fn find_rule(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<ApprovalRule>, ApplicationError> {
        let state = self.state.read().await;
        Ok(state.rules.get(&company_id.0).cloned())
    }

    async fn save_rule(&self, rule: &ApprovalRule) -> Result<(), ApplicationError> {
        let mut state = self.state.write().await;
        state.rules.insert(rule.company_id.0.clone(), rule.clone());
        Ok(())
    }

    async fn create_expense(
        &self,
        expense: &Expense,
        steps: &[ApprovalStep],
    ) -> Result<(), ApplicationError> {
        let mut state = self.state.write().await;
        if state.expenses.contains_key(&expense.id.0) {
            return Err(conflict(format!("expense `{}` already exists", expense.id.0)));
        }
        if let Some(unknown) = steps.iter().find(|step| !state.users.contains_key(&step.approver_id.0))
        {
            return Err(ApplicationError::Persistence(format!(
                "approver `{}` does not exist",
                unknown.approver_id.0
            )));
        }

        let mut chain = steps.to_vec();
        chain.sort_by_key(|step| step.step_order);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.expense_seq.insert(expense.id.0.clone(), seq);
        state.expenses.insert(expense.id.0.clone(), expense.clone());
        state.steps.insert(expense.id.0.clone(), chain);
        Ok(())
    }

    async fn find_expense(&self, id: &ExpenseId) -> Result<Option<Expense>, ApplicationError> {
        let state = self.state.read().await;
        Ok(state.expenses.get(&id.0).cloned())
    }

    async fn list_expenses_for_employee(
        &self,
        employee_id: &UserId,
    ) -> Result<Vec<Expense>, ApplicationError> {
        let state = self.state.read().await;
        let seq = |expense: &Expense| state.expense_seq.get(&expense.id.0).copied().unwrap_or(0);
        let mut expenses: Vec<Expense> = state
            .expenses
            .values()
            .filter(|expense| &expense.employee_id == employee_id)
            .cloned()
            .collect();
        expenses.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| seq(b).cmp(&seq(a))));
        Ok(expenses)
    }

    async fn list_steps(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalStep>, ApplicationError> {
        let state = self.state.read().await;
        Ok(state.steps.get(&expense_id.0).cloned().unwrap_or_default())
    }

    async fn list_pending_steps_for(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<ApprovalStep>, ApplicationError> {
        let state = self.state.read().await;
        let mut pending: Vec<ApprovalStep> = state
            .steps
            .values()
            .flatten()
            .filter(|step| &step.approver_id == approver_id && step.status == StepStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.step_order
                .cmp(&b.step_order)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.0.cmp(&b.id.0))
        });
        Ok(pending)
    }

    async fn commit_decision(&self, plan: &DecisionPlan) -> Result<(), ApplicationError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let stale = |reason: &str| conflict(format!("expense `{}`: {reason}", plan.expense_id.0));

        let expense = state
            .expenses
            .get_mut(&plan.expense_id.0)
            .ok_or_else(|| ApplicationError::not_found("expense", &plan.expense_id.0))?;
        if expense.state_version != plan.expected_version || expense.status != ExpenseStatus::Pending
        {
            return Err(stale("expense changed since it was read"));
        }
        let steps = state
            .steps
            .get_mut(&plan.expense_id.0)
            .ok_or_else(|| stale("approval chain is missing"))?;

        let decided = steps
            .iter()
            .position(|step| step.id == plan.decided_step.id && step.status == StepStatus::Pending)
            .ok_or_else(|| stale("step is no longer pending"))?;
        let activated = match &plan.activate_step {
            Some(next) => Some(
                steps
                    .iter()
                    .position(|step| &step.id == next && step.status == StepStatus::Queued)
                    .ok_or_else(|| stale("next step is no longer queued"))?,
            ),
            None => None,
        };

        // All guards passed; nothing below can fail.
        steps[decided].status = plan.decided_step.status;
        steps[decided].comment = plan.decided_step.comment.clone();
        steps[decided].decided_at = Some(plan.decided_at);
        if let Some(index) = activated {
            steps[index].status = StepStatus::Pending;
        }
        expense.status = plan.expense_status;
        expense.state_version += 1;
        expense.updated_at = plan.decided_at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use receiptpath_core::domain::company::{Company, CompanyId};
    use receiptpath_core::domain::user::{User, UserId, UserRole};
    use receiptpath_core::errors::ApplicationError;
    use receiptpath_core::workflow::store::DirectoryStore;

    use super::InMemoryWorkflowStore;

    fn user(id: &str, email: &str) -> User {
        User {
            id: UserId(id.to_string()),
            name: id.to_string(),
            email: email.to_string(),
            role: UserRole::Employee,
            company_id: None,
            manager_id: None,
            is_manager_approver: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = InMemoryWorkflowStore::new();
        let other = store.clone();

        store.save_user(&user("u-1", "one@acme.test")).await.expect("save");

        assert!(other.find_user(&UserId("u-1".to_string())).await.expect("find").is_some());
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let store = InMemoryWorkflowStore::new();
        store.save_user(&user("u-1", "dup@acme.test")).await.expect("first");

        let second = store.save_user(&user("u-2", "dup@acme.test")).await;

        assert!(matches!(second, Err(ApplicationError::Conflict(_))));
    }

    #[tokio::test]
    async fn company_owner_can_only_be_linked_once() {
        let store = InMemoryWorkflowStore::new();
        let mut owner = user("u-owner", "owner@acme.test");
        store.save_user(&owner).await.expect("save owner");
        owner.role = UserRole::Admin;
        let company = |id: &str| Company {
            id: CompanyId(id.to_string()),
            name: "Acme".to_string(),
            country: "US".to_string(),
            currency: "USD".to_string(),
            created_at: Utc::now(),
        };

        store.create_company(&company("c-1"), &owner).await.expect("create");
        let again = store.create_company(&company("c-2"), &owner).await;

        assert!(matches!(again, Err(ApplicationError::Conflict(_))));
        let stored = store.find_user(&owner.id).await.expect("find").expect("present");
        assert_eq!(stored.role, UserRole::Admin);
        assert_eq!(stored.company_id, Some(CompanyId("c-1".to_string())));
    }
}
