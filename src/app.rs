// src/app.rs

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::cli::{
    CheckArgs, Commands, CrawlArgs, ImportCommand, PrepareCommand, PrepareImport, PrepareScan,
    ScanCommand,
};
use crate::config::Settings;
use crate::core::archive::ArchiveStream;
use crate::core::batch::{self, BatchFile};
use crate::core::checker::builtin_checkers;
use crate::core::checker::runner::CheckerRunner;
use crate::core::crawl::{self, DATA_HOST};
use crate::core::domains::CrawlSource;
use crate::core::fetch::HttpFetcher;
use crate::core::ip_probe::{HickoryResolver, LivenessProbe};
use crate::core::orchestrator::{self, ScanOrchestrator, ScanSummary};
use crate::core::store::{self, IterateOptions, ResultSink, TargetStore};
use crate::error::{BatchError, ConfigError, SweepError};

/// One configured run of the tool.
pub struct App {
    settings: Settings,
    fetcher: Arc<dyn HttpFetcher>,
}

impl App {
    /// Validates `settings` and builds the shared HTTP client.
    pub fn new(settings: Settings) -> Result<Self, SweepError> {
        settings.validate()?;
        let fetcher: Arc<dyn HttpFetcher> = Arc::new(settings.fetcher()?);
        Ok(Self { settings, fetcher })
    }

    /// For callers that bring their own fetcher.
    pub fn with_fetcher(settings: Settings, fetcher: Arc<dyn HttpFetcher>) -> Result<Self, SweepError> {
        settings.validate()?;
        Ok(Self { settings, fetcher })
    }

    pub async fn run(&self, command: Commands) -> Result<(), SweepError> {
        match command {
            Commands::Scan(scan) => self.scan(scan).await,
            Commands::Import(import) => self.import(import).await,
            Commands::Prepare(prepare) => self.prepare(prepare).await,
            Commands::Datasets => {
                let catalog = crawl::fetch_catalog(self.fetcher.as_ref()).await?;
                for dataset in catalog {
                    println!("{}", dataset.id);
                }
                Ok(())
            }
        }
    }

    async fn scan(&self, command: ScanCommand) -> Result<(), SweepError> {
        let summary = match command {
            ScanCommand::Ipv4 { range, checks, stores } => {
                let range = range.range()?;
                let sinks = open_sinks(&stores.stores).await?;
                let orchestrator = self.orchestrator(&checks, sinks)?;
                info!(from = %range.from, to = %range.to, "Starting IPv4 scan.");
                orchestrator.scan_ipv4(range).await?
            }
            ScanCommand::CommonCrawl { source, checks, stores } => {
                let sinks = open_sinks(&stores.stores).await?;
                let orchestrator = self.orchestrator(&checks, sinks)?;
                let crawl_source = self.crawl_source(&source).await?;
                orchestrator
                    .scan_common_crawl(&self.archive(), crawl_source, self.settings.stream_options(source.skip))
                    .await?
            }
            ScanCommand::Datastore { store, skip, read, checks } => {
                let opened = store::open_store(&store).await?;
                let orchestrator = self.orchestrator(&checks, vec![opened.sink])?;
                orchestrator
                    .scan_datastore(opened.targets, IterateOptions { skip, read })
                    .await?
            }
        };
        report(&summary, "findings");
        Ok(())
    }

    async fn import(&self, command: ImportCommand) -> Result<(), SweepError> {
        let summary = match command {
            ImportCommand::Ipv4 { range, stores } => {
                let range = range.range()?;
                let targets = open_targets(&stores.stores).await?;
                let probe = Arc::new(LivenessProbe::new(
                    Arc::clone(&self.fetcher),
                    Arc::new(HickoryResolver::new()),
                    self.settings.request_timeout,
                ));
                info!(from = %range.from, to = %range.to, "Starting IPv4 import.");
                orchestrator::import_ipv4(
                    &self.settings.queue(),
                    &self.settings.scan_settings(),
                    range,
                    probe,
                    targets,
                )
                .await?
            }
            ImportCommand::CommonCrawl { source, stores, batch_size } => {
                let targets = open_targets(&stores.stores).await?;
                let crawl_source = self.crawl_source(&source).await?;
                orchestrator::import_common_crawl(
                    &self.archive(),
                    crawl_source,
                    self.settings.stream_options(source.skip),
                    targets,
                    batch_size.max(1),
                )
                .await?
            }
        };
        report(&summary, "imported");
        Ok(())
    }

    async fn prepare(&self, command: PrepareCommand) -> Result<(), SweepError> {
        match command {
            PrepareCommand::Import(PrepareImport::Ipv4 { split_into_batches }) => {
                print_json(&batch::split_ipv4(split_into_batches)?)
            }
            PrepareCommand::Import(PrepareImport::CommonCrawl {
                dataset,
                output,
                split_list_every,
            }) => {
                let dataset = self.resolve_dataset(&dataset).await?;
                let files = self.archive().list_manifest(&dataset).await?;
                info!(dataset = %dataset, files = files.len(), "Fetched dataset manifest.");
                if let Some(descriptors) = batch::write_file_list(&output, files, split_list_every).await? {
                    print_json(&descriptors)?;
                }
                Ok(())
            }
            PrepareCommand::Scan(PrepareScan::Datastore {
                store,
                split_into_batches,
            }) => {
                let opened = store::open_store(&store).await?;
                let count = opened.targets.count_sites().await?;
                debug!(count, "Counted stored origins.");
                print_json(&batch::split_records(count, split_into_batches)?)
            }
        }
    }

    fn orchestrator(&self, checks: &CheckArgs, sinks: Vec<Arc<dyn ResultSink>>) -> Result<ScanOrchestrator, SweepError> {
        let settings = Settings {
            probe_clone: checks.probe_clone,
            ..self.settings.clone()
        };
        let registry = builtin_checkers(
            Arc::clone(&self.fetcher),
            settings.clone_probe(),
            settings.request_timeout,
        );
        let selected = registry.select(&checks.checks)?;
        info!(checkers = ?selected.names(), probe_clone = settings.probe_clone, "Selected checkers.");

        let runner = CheckerRunner::new(Arc::clone(&self.fetcher), selected)
            .with_timeouts(settings.request_timeout, settings.target_budget);
        Ok(ScanOrchestrator::new(
            runner,
            settings.queue(),
            sinks,
            settings.scan_settings(),
        ))
    }

    fn archive(&self) -> ArchiveStream {
        ArchiveStream::new(Arc::clone(&self.fetcher), DATA_HOST)
    }

    async fn resolve_dataset(&self, requested: &str) -> Result<String, SweepError> {
        let catalog = crawl::fetch_catalog(self.fetcher.as_ref()).await?;
        Ok(crawl::resolve_dataset(&catalog, requested)?)
    }

    async fn crawl_source(&self, args: &CrawlArgs) -> Result<CrawlSource, SweepError> {
        match (&args.dataset, &args.from_batch_file) {
            (Some(_), None) if args.batch_id.is_some() => Err(ConfigError::Invalid {
                field: "batch-id".to_string(),
                reason: "only applies to --from-batch-file".to_string(),
            }
            .into()),
            (Some(dataset), None) => Ok(CrawlSource::Dataset(self.resolve_dataset(dataset).await?)),
            (None, Some(path)) => {
                let files = BatchFile::load(path).await?.select(args.batch_id)?;
                info!(file = %path.display(), batch_id = ?args.batch_id, files = files.len(), "Loaded batch file.");
                Ok(CrawlSource::Files(files))
            }
            _ => Err(ConfigError::Invalid {
                field: "dataset".to_string(),
                reason: "exactly one of --dataset and --from-batch-file is required".to_string(),
            }
            .into()),
        }
    }
}

async fn open_sinks(uris: &[String]) -> Result<Vec<Arc<dyn ResultSink>>, SweepError> {
    let stores = store::open_stores(uris).await?;
    Ok(stores.into_iter().map(|s| s.sink).collect())
}

async fn open_targets(uris: &[String]) -> Result<Vec<Arc<dyn TargetStore>>, SweepError> {
    let stores = store::open_stores(uris).await?;
    Ok(stores.into_iter().map(|s| s.targets).collect())
}

fn report(summary: &ScanSummary, counted: &str) {
    info!(targets = summary.targets, count = summary.findings, counted, "Run finished.");
}

fn print_json<T: Serialize>(value: &T) -> Result<(), SweepError> {
    let body = serde_json::to_string_pretty(value).map_err(BatchError::from)?;
    println!("{body}");
    Ok(())
}
