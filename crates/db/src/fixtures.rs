use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

pub const DEMO_COMPANY_ID: &str = "cmp-demo-001";

const DEMO_USER_IDS: &[&str] = &[
    "usr-demo-admin",
    "usr-demo-manager",
    "usr-demo-finance-1",
    "usr-demo-finance-2",
    "usr-demo-employee",
];

/// Ordered `(approver, step_order)` pairs the seeded chain must contain.
const DEMO_CHAIN: &[(&str, i64)] = &[("usr-demo-finance-1", 1), ("usr-demo-finance-2", 2)];

const DEMO_THRESHOLD: i64 = 60;

/// Deterministic demo company used by `receiptpath seed` and local smoke runs.
///
/// The employee reports to a manager who reviews first, so a submitted expense gets a
/// three-step chain: manager, then the two finance approvers.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    /// Loads the dataset. Rows that already exist are left untouched.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            company_id: DEMO_COMPANY_ID,
            users_seeded: DEMO_USER_IDS.len(),
            chain_length: DEMO_CHAIN.len(),
            percentage_threshold: DEMO_THRESHOLD,
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let company_exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM company WHERE id = ?1)")
                .bind(DEMO_COMPANY_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("company", company_exists == 1));

        let user_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM app_user WHERE company_id = ?1 AND id IN {}",
            sql_array_from_ids(DEMO_USER_IDS)
        ))
        .bind(DEMO_COMPANY_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("users", user_count == DEMO_USER_IDS.len() as i64));

        let manager_link: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM app_user
                           WHERE id = 'usr-demo-employee'
                             AND manager_id = 'usr-demo-manager'
                             AND is_manager_approver = 1)",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("manager-link", manager_link == 1));

        let chain: Vec<(String, i64)> = sqlx::query_as(
            "SELECT approver_id, step_order FROM approver_assignment
             WHERE company_id = ?1 ORDER BY step_order",
        )
        .bind(DEMO_COMPANY_ID)
        .fetch_all(pool)
        .await?;
        let chain_matches = chain.len() == DEMO_CHAIN.len()
            && chain
                .iter()
                .zip(DEMO_CHAIN)
                .all(|((approver, order), (expected, expected_order))| {
                    approver == expected && order == expected_order
                });
        checks.push(("approver-chain", chain_matches));

        let threshold: Option<i64> = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT percentage_threshold FROM approval_rule WHERE company_id = ?1",
        )
        .bind(DEMO_COMPANY_ID)
        .fetch_optional(pool)
        .await?
        .flatten();
        checks.push(("approval-rule", threshold == Some(DEMO_THRESHOLD)));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the demo company and everything hanging off it.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            "DELETE FROM approval_step
             WHERE expense_id IN (SELECT id FROM expense WHERE company_id = ?1)",
        )
        .bind(DEMO_COMPANY_ID)
        .execute(&mut *tx)
        .await?;
        for table in ["expense", "approver_assignment", "approval_rule", "app_user"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE company_id = ?1"))
                .bind(DEMO_COMPANY_ID)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM company WHERE id = ?1")
            .bind(DEMO_COMPANY_ID)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub company_id: &'static str,
    pub users_seeded: usize,
    pub chain_length: usize,
    pub percentage_threshold: i64,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
