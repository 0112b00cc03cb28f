use std::process::ExitCode;

use grc_acl::config::AppConfig;
use grc_acl::db;
use grc_acl::errors::PropagationError;
use grc_acl::propagation::{Propagator, RuleSetSpec};
use grc_acl::store::PgStore;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Reconciliation failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), PropagationError> {
    let config = AppConfig::from_env()?;

    let pool = db::init_pool(&config.database_url, config.max_connections).await?;
    db::run_migrations(&pool).await?;
    db::seed_roles(&pool).await?;

    let rules_json = match &config.rules_path {
        Some(path) => {
            log::info!("Loading propagation rules from {}", path.display());
            std::fs::read_to_string(path).map_err(|e| {
                PropagationError::Configuration(format!("cannot read {}: {e}", path.display()))
            })?
        }
        None => db::DEFAULT_RULES.to_string(),
    };
    let spec = RuleSetSpec::from_json(&rules_json)?;

    let propagator = Propagator::load(PgStore::new(pool), &spec, config.propagation).await?;
    let report = propagator.reconcile().await?;
    log::info!(
        "Done: {} rows justified, {} inserted, {} deleted, {} chunks, {} cycle guard trips",
        report.planned, report.inserted, report.deleted, report.chunks, report.cycle_guard_trips
    );
    Ok(())
}
