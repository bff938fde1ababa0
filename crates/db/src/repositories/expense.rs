use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use tracing::warn;

use receiptpath_core::domain::approval::{ApprovalStep, ApprovalStepId, StepStatus};
use receiptpath_core::domain::company::{ApprovalRule, ApproverAssignment, CompanyId};
use receiptpath_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use receiptpath_core::domain::user::UserId;
use receiptpath_core::errors::ApplicationError;
use receiptpath_core::workflow::store::{DecisionPlan, WorkflowStore};

use super::{
    column, parse_decimal, parse_order, parse_timestamp, timestamp, RepositoryError,
    SqlWorkflowStore,
};

const EXPENSE_COLUMNS: &str = "id, employee_id, company_id, amount, currency, normalized_amount,
     category, description, expense_date, status, state_version, created_at, updated_at";

const STEP_COLUMNS: &str =
    "id, expense_id, approver_id, step_order, status, comment, decided_at, created_at";

fn row_to_expense(row: &SqliteRow) -> Result<Expense, RepositoryError> {
    let amount: String = column(row, "amount")?;
    let normalized_amount: String = column(row, "normalized_amount")?;
    let status: String = column(row, "status")?;
    let state_version: i64 = column(row, "state_version")?;
    let expense_date: String = column(row, "expense_date")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(Expense {
        id: ExpenseId(column(row, "id")?),
        employee_id: UserId(column(row, "employee_id")?),
        company_id: CompanyId(column(row, "company_id")?),
        amount: parse_decimal("amount", &amount)?,
        currency: column(row, "currency")?,
        normalized_amount: parse_decimal("normalized_amount", &normalized_amount)?,
        category: column(row, "category")?,
        description: column(row, "description")?,
        date: parse_timestamp("expense_date", &expense_date)?,
        status: ExpenseStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown expense status `{status}`")))?,
        state_version: parse_order("state_version", state_version)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn row_to_step(row: &SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    let status: String = column(row, "status")?;
    let decided_at: Option<String> = column(row, "decided_at")?;
    let created_at: String = column(row, "created_at")?;

    Ok(ApprovalStep {
        id: ApprovalStepId(column(row, "id")?),
        expense_id: ExpenseId(column(row, "expense_id")?),
        approver_id: UserId(column(row, "approver_id")?),
        step_order: parse_order("step_order", column(row, "step_order")?)?,
        status: StepStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown step status `{status}`")))?,
        comment: column(row, "comment")?,
        decided_at: decided_at.map(|raw| parse_timestamp("decided_at", &raw)).transpose()?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

impl SqlWorkflowStore {
    async fn insert_expense(
        &self,
        expense: &Expense,
        steps: &[ApprovalStep],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(&format!(
            "INSERT INTO expense ({EXPENSE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&expense.id.0)
        .bind(&expense.employee_id.0)
        .bind(&expense.company_id.0)
        .bind(expense.amount.to_string())
        .bind(&expense.currency)
        .bind(expense.normalized_amount.to_string())
        .bind(&expense.category)
        .bind(&expense.description)
        .bind(timestamp(&expense.date))
        .bind(expense.status.as_str())
        .bind(i64::from(expense.state_version))
        .bind(timestamp(&expense.created_at))
        .bind(timestamp(&expense.updated_at))
        .execute(&mut *tx)
        .await?;

        for step in steps {
            sqlx::query(&format!(
                "INSERT INTO approval_step ({STEP_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&step.id.0)
            .bind(&step.expense_id.0)
            .bind(&step.approver_id.0)
            .bind(i64::from(step.step_order))
            .bind(step.status.as_str())
            .bind(step.comment.as_deref())
            .bind(step.decided_at.as_ref().map(timestamp))
            .bind(timestamp(&step.created_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_expense(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {EXPENSE_COLUMNS} FROM expense WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_expense).transpose()
    }

    async fn fetch_expenses_for_employee(
        &self,
        employee_id: &UserId,
    ) -> Result<Vec<Expense>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expense
             WHERE employee_id = ?
             ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(&employee_id.0)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_expense).collect()
    }

    async fn fetch_steps(&self, expense_id: &ExpenseId) -> Result<Vec<ApprovalStep>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM approval_step WHERE expense_id = ? ORDER BY step_order ASC"
        ))
        .bind(&expense_id.0)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_step).collect()
    }

    async fn fetch_pending_steps_for(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<ApprovalStep>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM approval_step
             WHERE approver_id = ? AND status = 'pending'
             ORDER BY step_order ASC, created_at ASC, rowid ASC"
        ))
        .bind(&approver_id.0)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_step).collect()
    }

    /// Applies a decision plan. The first statement writes, so the transaction holds the
    /// database write lock before anything else is checked.
    async fn apply_decision(&self, plan: &DecisionPlan) -> Result<(), RepositoryError> {
        let decided_at = timestamp(&plan.decided_at);
        let mut tx = self.pool().begin().await?;

        let expense = sqlx::query(
            "UPDATE expense
             SET status = ?, state_version = state_version + 1, updated_at = ?
             WHERE id = ? AND state_version = ? AND status = 'pending'",
        )
        .bind(plan.expense_status.as_str())
        .bind(&decided_at)
        .bind(&plan.expense_id.0)
        .bind(i64::from(plan.expected_version))
        .execute(&mut *tx)
        .await?;
        if expense.rows_affected() == 0 {
            return Err(stale(plan, "expense changed since it was read"));
        }

        let step = &plan.decided_step;
        let decided = sqlx::query(
            "UPDATE approval_step
             SET status = ?, comment = ?, decided_at = ?
             WHERE id = ? AND expense_id = ? AND status = 'pending'",
        )
        .bind(step.status.as_str())
        .bind(step.comment.as_deref())
        .bind(&decided_at)
        .bind(&step.id.0)
        .bind(&plan.expense_id.0)
        .execute(&mut *tx)
        .await?;
        if decided.rows_affected() == 0 {
            return Err(stale(plan, "step is no longer pending"));
        }

        if let Some(next) = &plan.activate_step {
            let activated = sqlx::query(
                "UPDATE approval_step SET status = 'pending'
                 WHERE id = ? AND expense_id = ? AND status = 'queued'",
            )
            .bind(&next.0)
            .bind(&plan.expense_id.0)
            .execute(&mut *tx)
            .await?;
            if activated.rows_affected() == 0 {
                return Err(stale(plan, "next step is no longer queued"));
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

fn stale(plan: &DecisionPlan, reason: &str) -> RepositoryError {
    warn!(
        event_name = "db.decision.conflict",
        expense_id = %plan.expense_id.0,
        step_id = %plan.decided_step.id.0,
        expected_version = plan.expected_version,
        reason,
        "decision rolled back"
    );
    RepositoryError::Conflict(format!("expense `{}`: {reason}", plan.expense_id.0))
}

#[async_trait]
impl WorkflowStore for SqlWorkflowStore {
    async fn list_assignments(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApproverAssignment>, ApplicationError> {
        Ok(self.fetch_assignments(company_id).await?)
    }

    async fn replace_assignments(
        &self,
        company_id: &CompanyId,
        assignments: &[ApproverAssignment],
    ) -> Result<(), ApplicationError> {
        Ok(self.swap_assignments(company_id, assignments).await?)
    }

    async fn find_rule(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<ApprovalRule>, ApplicationError> {
        Ok(self.fetch_rule(company_id).await?)
    }

    async fn save_rule(&self, rule: &ApprovalRule) -> Result<(), ApplicationError> {
        Ok(self.upsert_rule(rule).await?)
    }

    async fn create_expense(
        &self,
        expense: &Expense,
        steps: &[ApprovalStep],
    ) -> Result<(), ApplicationError> {
        Ok(self.insert_expense(expense, steps).await?)
    }

    async fn find_expense(&self, id: &ExpenseId) -> Result<Option<Expense>, ApplicationError> {
        Ok(self.fetch_expense(id).await?)
    }

    async fn list_expenses_for_employee(
        &self,
        employee_id: &UserId,
    ) -> Result<Vec<Expense>, ApplicationError> {
        Ok(self.fetch_expenses_for_employee(employee_id).await?)
    }

    async fn list_steps(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalStep>, ApplicationError> {
        Ok(self.fetch_steps(expense_id).await?)
    }

    async fn list_pending_steps_for(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<ApprovalStep>, ApplicationError> {
        Ok(self.fetch_pending_steps_for(approver_id).await?)
    }

    async fn commit_decision(&self, plan: &DecisionPlan) -> Result<(), ApplicationError> {
        Ok(self.apply_decision(plan).await?)
    }
}
