use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use receiptpath_core::domain::company::{ApprovalRule, ApproverAssignment, CompanyId};
use receiptpath_core::domain::user::UserId;

use super::{column, parse_order, timestamp, RepositoryError, SqlWorkflowStore};

fn row_to_assignment(row: &SqliteRow) -> Result<ApproverAssignment, RepositoryError> {
    Ok(ApproverAssignment {
        company_id: CompanyId(column(row, "company_id")?),
        approver_id: UserId(column(row, "approver_id")?),
        step_order: parse_order("step_order", column(row, "step_order")?)?,
    })
}

fn row_to_rule(row: &SqliteRow) -> Result<ApprovalRule, RepositoryError> {
    let threshold: Option<i64> = column(row, "percentage_threshold")?;
    let specific_approver_id: Option<String> = column(row, "specific_approver_id")?;
    let hybrid: i64 = column(row, "hybrid")?;

    let percentage_threshold = threshold
        .map(|value| {
            u8::try_from(value)
                .ok()
                .filter(|value| *value <= 100)
                .ok_or_else(|| RepositoryError::Decode(format!("percentage_threshold `{value}`")))
        })
        .transpose()?;

    Ok(ApprovalRule {
        company_id: CompanyId(column(row, "company_id")?),
        percentage_threshold,
        specific_approver_id: specific_approver_id.map(UserId),
        hybrid: hybrid != 0,
    })
}

impl SqlWorkflowStore {
    pub(crate) async fn fetch_assignments(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApproverAssignment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT company_id, approver_id, step_order
             FROM approver_assignment
             WHERE company_id = ?
             ORDER BY step_order ASC",
        )
        .bind(&company_id.0)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_assignment).collect()
    }

    /// Swaps the whole chain in one transaction so readers never see a partial chain.
    pub(crate) async fn swap_assignments(
        &self,
        company_id: &CompanyId,
        assignments: &[ApproverAssignment],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM approver_assignment WHERE company_id = ?")
            .bind(&company_id.0)
            .execute(&mut *tx)
            .await?;

        for assignment in assignments {
            sqlx::query(
                "INSERT INTO approver_assignment (company_id, approver_id, step_order)
                 VALUES (?, ?, ?)",
            )
            .bind(&company_id.0)
            .bind(&assignment.approver_id.0)
            .bind(i64::from(assignment.step_order))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub(crate) async fn fetch_rule(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<ApprovalRule>, RepositoryError> {
        let row = sqlx::query(
            "SELECT company_id, percentage_threshold, specific_approver_id, hybrid
             FROM approval_rule WHERE company_id = ?",
        )
        .bind(&company_id.0)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_rule).transpose()
    }

    pub(crate) async fn upsert_rule(&self, rule: &ApprovalRule) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_rule (company_id, percentage_threshold, specific_approver_id,
                                        hybrid, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(company_id) DO UPDATE SET
                 percentage_threshold = excluded.percentage_threshold,
                 specific_approver_id = excluded.specific_approver_id,
                 hybrid = excluded.hybrid,
                 updated_at = excluded.updated_at",
        )
        .bind(&rule.company_id.0)
        .bind(rule.percentage_threshold.map(i64::from))
        .bind(rule.specific_approver_id.as_ref().map(|id| id.0.as_str()))
        .bind(i64::from(rule.hybrid))
        .bind(timestamp(&Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
