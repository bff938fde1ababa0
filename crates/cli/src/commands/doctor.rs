use receiptpath_core::config::{AppConfig, LoadOptions};
use receiptpath_db::{connect_with_config, migrations};
use serde::Serialize;

use crate::commands::{
    CommandResult, EXIT_CONFIG, EXIT_DB_CONNECTIVITY, EXIT_MIGRATION, EXIT_RUNTIME,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
    #[serde(skip)]
    exit_code: u8,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into(), exit_code: 0 }
    }

    fn fail(name: &'static str, details: impl Into<String>, exit_code: u8) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into(), exit_code }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because an earlier check failed".to_string(),
            exit_code: 0,
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    /// Exit code of the first failing check, 0 when everything passed.
    fn exit_code(&self) -> u8 {
        self.checks
            .iter()
            .find(|check| check.status == CheckStatus::Fail)
            .map(|check| check.exit_code)
            .unwrap_or(0)
    }
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = report.exit_code();

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_currency_lookups(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string(), EXIT_CONFIG));
            checks.push(DoctorCheck::skipped("currency_lookups"));
            checks.push(DoctorCheck::skipped("database_connectivity"));
            checks.push(DoctorCheck::skipped("schema_migrations"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_currency_lookups(config: &AppConfig) -> DoctorCheck {
    let details = if config.currency.enabled {
        format!(
            "live lookups against `{}` and `{}` (timeout {}s); failures normalize at rate 1.0",
            config.currency.base_url, config.currency.countries_url, config.currency.timeout_secs
        )
    } else {
        "external lookups disabled; foreign amounts normalize at rate 1.0".to_string()
    };
    DoctorCheck::pass("currency_lookups", details)
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to initialize async runtime: {error}"),
                    EXIT_RUNTIME,
                ),
                DoctorCheck::skipped("schema_migrations"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                        EXIT_DB_CONNECTIVITY,
                    ),
                    DoctorCheck::skipped("schema_migrations"),
                ];
            }
        };

        let connectivity = DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        );
        let schema = match migrations::pending_count(&pool).await {
            Ok(0) => DoctorCheck::pass("schema_migrations", "schema is up to date"),
            Ok(pending) => DoctorCheck::fail(
                "schema_migrations",
                format!("{pending} migration(s) pending; run `receiptpath migrate`"),
                EXIT_MIGRATION,
            ),
            Err(error) => DoctorCheck::fail(
                "schema_migrations",
                format!("could not read migration history: {error}"),
                EXIT_MIGRATION,
            ),
        };

        pool.close().await;
        vec![connectivity, schema]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{render_human, CheckStatus, DoctorCheck, DoctorReport};

    fn report(checks: Vec<DoctorCheck>) -> DoctorReport {
        DoctorReport { overall_status: CheckStatus::Fail, summary: "doctor".to_string(), checks }
    }

    #[test]
    fn exit_code_comes_from_first_failure() {
        let report = report(vec![
            DoctorCheck::pass("config_validation", "ok"),
            DoctorCheck::fail("database_connectivity", "down", 4),
            DoctorCheck::fail("schema_migrations", "pending", 5),
        ]);

        assert_eq!(report.exit_code(), 4);
    }

    #[test]
    fn human_output_marks_each_check() {
        let rendered = render_human(&report(vec![
            DoctorCheck::pass("config_validation", "loaded"),
            DoctorCheck::skipped("schema_migrations"),
        ]));

        assert!(rendered.contains("- [ok] config_validation: loaded"));
        assert!(rendered.contains("- [skip] schema_migrations"));
    }
}
