//! Wires configuration, selection, the pool and the ledger into one run

use crate::catalog::{ImageCatalog, MySqlCatalog};
use crate::cli::args::{PublishArgs, RunArgs};
use crate::concurrency::{BatchSummary, MigrationPool, PoolSettings, WorkBatch};
use crate::config::{AppConfig, AuthConfig};
use crate::error::{MigratorError, Result};
use crate::ledger::{Ledger, LedgerMode, MigrationOutcome, read_outcomes};
use crate::logging::Logger;
use crate::registry::RegistryVerifier;
use crate::selector::{ImageSelector, SelectionCriteria};
use crate::transfer::SyncerProcess;
use std::path::Path;
use std::sync::Arc;

/// Counts reported by [`Runner::publish`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub published: usize,
    pub failed: usize,
}

pub struct Runner {
    logger: Logger,
}

impl Runner {
    pub fn new(verbose: bool) -> Self {
        Self {
            logger: Logger::new(verbose),
        }
    }

    /// Select, migrate and report one batch. `forced_mode` overrides the
    /// config's `sync_method`.
    pub async fn run(&self, args: &RunArgs, forced_mode: Option<LedgerMode>) -> Result<BatchSummary> {
        self.logger.section("Image Migration");
        let config = load_config(&args.config, args.proc, args.image_list.as_deref())?;
        let mode = forced_mode.unwrap_or(config.sync_method);
        self.logger.info(&format!(
            "{} -> {} with {} parallel transfers ({:?} mode)",
            config.source_registry, config.target_registry, config.proc, mode
        ));

        let ledger = Arc::new(Ledger::open(&config.output_path, mode).await?);
        self.logger.detail(&format!("ledger: {}", ledger.success_path().display()));

        let credentials = AuthConfig::for_registry(&config.auth_path, &config.target_registry)?;
        let verifier = RegistryVerifier::connect(
            &config.target_registry_url(),
            credentials,
            config.insecure_skip_tls,
        )
        .await?;

        let catalog = self.connect_catalog(&config).await?;
        let criteria = match &config.image_list_path {
            Some(path) => SelectionCriteria::Spreadsheet(path.clone()),
            None => SelectionCriteria::Catalog {
                start_time: config.start_time.clone().unwrap_or_default(),
                end_time: config.end_time.clone().unwrap_or_default(),
            },
        };

        let prior = ledger.load_prior_successes().await?;
        self.logger.info(&format!("{} images already migrated according to the ledger", prior.len()));
        let selection = ImageSelector::new(catalog.clone()).select(&criteria, &prior).await?;
        self.logger.info(&format!(
            "{} images selected, {} skipped as already migrated",
            selection.count(),
            selection.already_migrated
        ));

        let settings = PoolSettings {
            parallelism: config.proc,
            source_registry: config.source_registry.clone(),
            target_registry: config.target_registry.clone(),
            manifest_dir: config.manifest_dir.clone(),
            verify_timeout: config.verify_timeout(),
        };
        let transfer = SyncerProcess::new(config.syncer_path.clone(), config.auth_path.clone(), config.retries);
        let status_sink = catalog.filter(|_| config.record_to_catalog);
        let pool = MigrationPool::new(
            settings,
            Arc::new(transfer),
            Arc::new(verifier),
            Arc::clone(&ledger),
            status_sink,
            self.logger.clone(),
        );

        let summary = pool.sync(WorkBatch::new(selection.images)).wait().await?;
        self.report(&summary, &ledger);
        Ok(summary)
    }

    async fn connect_catalog(&self, config: &AppConfig) -> Result<Option<Arc<dyn ImageCatalog>>> {
        let needed = config.image_list_path.is_none() || config.record_to_catalog;
        if !needed {
            return Ok(None);
        }
        let dsn = config.db_dsn.as_deref().ok_or_else(|| {
            MigratorError::Config("db_dsn is required for catalog access".to_string())
        })?;
        let catalog = MySqlCatalog::connect(dsn, config.normal_status).await?;
        Ok(Some(Arc::new(catalog)))
    }

    fn report(&self, summary: &BatchSummary, ledger: &Ledger) {
        let logger = &self.logger;
        logger.summary_kv(
            "Migration Summary",
            &[
                ("Images", summary.total.to_string()),
                ("Succeeded", summary.succeeded.to_string()),
                ("Failed", summary.failed.to_string()),
                ("Elapsed", logger.format_duration(summary.elapsed)),
                ("Transferred", logger.format_size(summary.transferred_bytes)),
                ("Throughput", logger.format_speed(summary.transferred_bytes, summary.elapsed)),
                ("Success ledger", ledger.success_path().display().to_string()),
                ("Failure ledger", ledger.failure_path().display().to_string()),
            ],
        );
        if summary.failed > 0 {
            logger.warning(&format!(
                "{} images failed, see {}",
                summary.failed,
                ledger.failure_path().display()
            ));
        }
    }

    /// Insert an image-metadata row for every image in the success ledger
    pub async fn publish(&self, args: &PublishArgs) -> Result<PublishReport> {
        self.logger.section("Publish Image Metadata");
        let config = AppConfig::load(&args.config)?.with_env_overrides();

        let az_id = config
            .target_az_id
            .as_deref()
            .filter(|az| !az.is_empty())
            .ok_or_else(|| MigratorError::Config("target_az_id is required for publish".to_string()))?;
        let dsn = config.db_dsn.as_deref().ok_or_else(|| {
            MigratorError::Config("db_dsn is required for publish".to_string())
        })?;

        let outcomes = read_outcomes(&config.output_path.join(crate::ledger::SUCCESS_FILE)).await?;
        let catalog = MySqlCatalog::connect(dsn, config.normal_status).await?;
        let report = publish_outcomes(&catalog, &outcomes, az_id).await;

        self.logger.summary_kv(
            "Publish Summary",
            &[
                ("Published", report.published.to_string()),
                ("Failed", report.failed.to_string()),
            ],
        );
        Ok(report)
    }
}

/// Config file, then environment, then command line, then validation
fn load_config(path: &Path, proc: Option<usize>, image_list: Option<&Path>) -> Result<AppConfig> {
    let mut config = AppConfig::load(path)?.with_env_overrides();
    if let Some(proc) = proc {
        config.proc = proc;
    }
    if let Some(image_list) = image_list {
        config.image_list_path = Some(image_list.to_path_buf());
    }
    config.validate()?;
    Ok(config)
}

/// Publish each successful outcome; a failed row is logged and skipped
pub async fn publish_outcomes(
    catalog: &dyn ImageCatalog,
    outcomes: &[MigrationOutcome],
    az_id: &str,
) -> PublishReport {
    let mut report = PublishReport::default();
    for outcome in outcomes.iter().filter(|o| o.is_success()) {
        match catalog.publish_image_metadata(outcome, az_id).await {
            Ok(()) => report.published += 1,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(
                    image = %outcome.image_ref(),
                    error = %e,
                    "could not publish image metadata"
                );
            }
        }
    }
    report
}
