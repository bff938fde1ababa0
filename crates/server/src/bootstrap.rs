use std::sync::Arc;

use receiptpath_core::audit::{AuditSink, TracingAuditSink};
use receiptpath_core::config::{AppConfig, ConfigError, LoadOptions};
use receiptpath_core::errors::ApplicationError;
use receiptpath_db::{connect_with_config, migrations, DbPool, SqlWorkflowStore};
use thiserror::Error;
use tracing::info;

use crate::api::AppState;
use crate::rates::{country_directory, rate_provider};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState<SqlWorkflowStore>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("currency lookup client setup failed: {0}")]
    Rates(#[source] ApplicationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let rates = rate_provider(&config.currency).map_err(BootstrapError::Rates)?;
    let countries = country_directory(&config.currency).map_err(BootstrapError::Rates)?;
    info!(
        event_name = "system.bootstrap.rates_configured",
        correlation_id = "bootstrap",
        lookups_enabled = config.currency.enabled,
        base_url = %config.currency.base_url,
        countries_url = %config.currency.countries_url,
        "exchange rate and country providers configured"
    );

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let state = AppState::new(SqlWorkflowStore::new(db_pool.clone()), rates, countries, audit);

    Ok(Application { config, db_pool, state })
}

#[cfg(test)]
mod tests {
    use receiptpath_core::config::{ConfigOverrides, LoadOptions};
    use receiptpath_core::domain::user::UserId;
    use tempfile::TempDir;

    use crate::bootstrap::{bootstrap, BootstrapError};

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                currency_enabled: Some(false),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn rejects_non_sqlite_database_url() {
        let result = bootstrap(overrides("postgres://localhost/receiptpath")).await;

        assert!(matches!(result, Err(BootstrapError::Config(_))));
        let message = result.err().map(|error| error.to_string()).unwrap_or_default();
        assert!(message.contains("database.url"), "unexpected message: {message}");
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_store() {
        let dir = TempDir::new().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("bootstrap.db").display());
        let app = bootstrap(overrides(&url)).await.expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('company', 'app_user', 'expense', 'approval_step')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("workflow tables should exist after bootstrap");
        assert_eq!(table_count, 4);

        let pending = app
            .state
            .controller
            .list_pending_approvals_for(&UserId("nobody".into()))
            .await
            .expect("empty pending list");
        assert!(pending.is_empty());

        app.db_pool.close().await;
    }
}
