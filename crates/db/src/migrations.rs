use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Embedded migrations that the database has not recorded as successfully applied.
pub async fn pending_count(pool: &DbPool) -> Result<usize, sqlx::Error> {
    let tracked: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    let applied: Vec<i64> = if tracked == 0 {
        Vec::new()
    } else {
        sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?
    };

    Ok(MIGRATOR
        .migrations
        .iter()
        .filter(|migration| !migration.migration_type.is_down_migration())
        .filter(|migration| !applied.contains(&migration.version))
        .count())
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{pending_count, run_pending};
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_TABLES: &[&str] =
        &["company", "app_user", "expense", "approval_step", "approver_assignment", "approval_rule"];

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "company",
        "app_user",
        "expense",
        "approval_step",
        "approver_assignment",
        "approval_rule",
        "idx_app_user_company_id",
        "idx_expense_employee_created",
        "idx_approval_step_approver_status",
        "idx_approval_step_single_pending",
    ];

    async fn table_count(pool: &sqlx::SqlitePool, table: &str) -> i64 {
        sqlx::query("SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_one(pool)
            .await
            .expect("check table")
            .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in MANAGED_TABLES {
            assert_eq!(table_count(&pool, table).await, 1, "table `{table}` should exist");
        }
    }

    #[tokio::test]
    async fn pending_count_drops_to_zero_after_run() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");

        assert!(pending_count(&pool).await.expect("count before") > 0);
        run_pending(&pool).await.expect("run migrations");
        assert_eq!(pending_count(&pool).await.expect("count after"), 0);
    }

    #[tokio::test]
    async fn only_one_pending_step_per_expense_is_accepted() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query(
            "INSERT INTO company (id, name, country, currency, created_at)
             VALUES ('c-1', 'Acme', 'US', 'USD', '2026-01-01T00:00:00Z');
             INSERT INTO app_user (id, name, email, role, company_id, created_at)
             VALUES ('u-1', 'Eve', 'eve@acme.test', 'employee', 'c-1', '2026-01-01T00:00:00Z');
             INSERT INTO expense (id, employee_id, company_id, amount, currency,
                                  normalized_amount, category, description, expense_date,
                                  status, created_at, updated_at)
             VALUES ('e-1', 'u-1', 'c-1', '10', 'USD', '10', 'meals', 'lunch',
                     '2026-01-01T00:00:00Z', 'pending', '2026-01-01T00:00:00Z',
                     '2026-01-01T00:00:00Z');
             INSERT INTO approval_step (id, expense_id, approver_id, step_order, status, created_at)
             VALUES ('s-1', 'e-1', 'u-1', 1, 'pending', '2026-01-01T00:00:00Z');",
        )
        .execute(&pool)
        .await
        .expect("seed rows");

        let second_pending = sqlx::query(
            "INSERT INTO approval_step (id, expense_id, approver_id, step_order, status, created_at)
             VALUES ('s-2', 'e-1', 'u-1', 2, 'pending', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await;

        assert!(second_pending.is_err(), "a second pending step must violate the partial index");
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        for table in MANAGED_TABLES {
            assert_eq!(table_count(&pool, table).await, 0, "table `{table}` should be dropped");
        }
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        assert!(
            managed_schema_signature(&pool).await.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(
            managed_schema_signature(&pool).await,
            initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
