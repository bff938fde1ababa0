use receiptpath_db::{connect_with_config, migrations, DemoSeedDataset, SeedResult};

use crate::commands::{prepare, CommandResult, EXIT_DB_CONNECTIVITY, EXIT_MIGRATION, EXIT_SEED};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DB_CONNECTIVITY))?;

        let outcome = async {
            migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;

            let seeded = DemoSeedDataset::load(&pool)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), EXIT_SEED))?;

            let verification = DemoSeedDataset::verify(&pool)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), EXIT_SEED))?;
            if !verification.all_present {
                let failed = verification
                    .checks
                    .iter()
                    .filter_map(|(check, passed)| (!passed).then_some(*check))
                    .collect::<Vec<_>>();
                return Err(("seed_verification", verification_message(&failed), EXIT_SEED));
            }

            Ok::<SeedResult, (&'static str, String, u8)>(seeded)
        }
        .await;

        pool.close().await;
        outcome
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "demo company `{}` ready: {} users, {}-step approver chain, {}% approval rule",
        seeded.company_id, seeded.users_seeded, seeded.chain_length, seeded.percentage_threshold
    )
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some demo rows failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_message;

    #[test]
    fn verification_message_names_failed_checks() {
        let message = verification_message(&["approver-chain", "approval-rule"]);

        assert_eq!(message, "seed verification failed for checks: approver-chain, approval-rule");
    }

    #[test]
    fn verification_message_falls_back_without_labels() {
        assert_eq!(verification_message(&[]), "some demo rows failed to load");
    }
}
