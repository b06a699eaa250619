// src/core/orchestrator.rs

//! Wires target sources through the bounded queue into the checker runner.
//!
//! Three sources feed scans: the IPv4 generator, the Common Crawl domain
//! stream, and a target store. The same generator and domain stream also
//! feed the import commands, which fill target stores instead of running
//! checkers.

use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::join_all;
use once_cell::sync::OnceCell;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info};

use crate::core::archive::ArchiveStream;
use crate::core::checker::runner::CheckerRunner;
use crate::core::domains::{CrawlSource, DomainHandler, StreamOptions, StreamSummary, stream_domains};
use crate::core::generator::{GeneratorConfig, GeneratorStart, TargetGenerator};
use crate::core::ip_probe::LivenessProbe;
use crate::core::models::{CheckResult, GenerationWatermark, Ipv4Range, Progress, ScannedSite, Target};
use crate::core::progress::{Eta, Throttle, ThrottleSignal};
use crate::core::queue::BoundedQueue;
use crate::core::store::{IterateOptions, ResultSink, TargetStore, UrlBatch};
use crate::error::SweepError;

/// Scheduling knobs shared by every run.
#[derive(Debug, Clone, Copy)]
pub struct ScanSettings {
    /// Queue depth above which producers stop submitting...
    pub queue_high: usize,
    /// ...until it has drained below this.
    pub queue_resume: usize,
    pub generator_high: u64,
    pub generator_low: u64,
    pub generator: GeneratorConfig,
    /// Log a progress line every this many completed targets. Zero disables it.
    pub progress_every: u64,
    pub verbose: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            queue_high: 10_000,
            queue_resume: 100,
            generator_high: 1000,
            generator_low: 100,
            generator: GeneratorConfig::default(),
            progress_every: 1000,
            verbose: false,
        }
    }
}

/// Totals of a finished run. For imports, `findings` counts imported origins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub targets: u64,
    pub findings: u64,
}

/// Completion counters of a run whose targets are submitted from many places.
#[derive(Debug)]
struct RunStats {
    label: &'static str,
    eta: Eta,
    every: u64,
    processed: AtomicU64,
    findings: AtomicU64,
}

impl RunStats {
    fn new(label: &'static str, total: u64, every: u64) -> Self {
        Self {
            label,
            eta: Eta::start(total),
            every,
            processed: AtomicU64::new(0),
            findings: AtomicU64::new(0),
        }
    }

    fn record(&self, findings: usize) {
        self.findings.fetch_add(findings as u64, Ordering::SeqCst);
        let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        if self.every > 0 && processed % self.every == 0 {
            log_progress(self.label, &self.eta, processed);
        }
    }

    fn summary(&self) -> ScanSummary {
        ScanSummary {
            targets: self.processed.load(Ordering::SeqCst),
            findings: self.findings.load(Ordering::SeqCst),
        }
    }
}

fn log_progress(label: &str, eta: &Eta, processed: u64) {
    let snapshot = eta.get(processed);
    if eta.total() > 0 {
        info!(
            processed,
            total = eta.total(),
            elapsed = %snapshot.elapsed_human(),
            remaining = %snapshot.remaining_human(),
            "{label} progress."
        );
    } else {
        info!(processed, elapsed = %snapshot.elapsed_human(), "{label} progress.");
    }
}

/// Reports a queue task's outcome back to the consumer loop, even if the task
/// panicked or was dropped by a closed queue.
struct Completion {
    tx: mpsc::UnboundedSender<usize>,
    found: usize,
}

impl Drop for Completion {
    fn drop(&mut self) {
        let _ = self.tx.send(self.found);
    }
}

/// Owns `completion` for the whole task, so the count is sent after `work` ran.
async fn report_completion<Fut>(mut completion: Completion, work: Fut)
where
    Fut: Future<Output = usize>,
{
    completion.found = work.await;
}

async fn next_address(generator: &mut Option<TargetGenerator>) -> Option<Ipv4Addr> {
    match generator {
        Some(generator) => generator.next().await,
        None => futures::future::pending().await,
    }
}

/// Feeds every generated address through `queue` as `task(addr)`.
///
/// The produced/processed counters live in this loop only; completions come
/// back over a channel. The generator is paused when the backlog crosses the
/// high watermark and resumed below the low one. A crashed generator closes
/// the queue and fails the run.
async fn drive_generator<F, Fut>(
    queue: &BoundedQueue,
    settings: &ScanSettings,
    range: Ipv4Range,
    label: &'static str,
    task: F,
) -> Result<ScanSummary, SweepError>
where
    F: Fn(Ipv4Addr) -> Fut,
    Fut: Future<Output = usize> + Send + 'static,
{
    let start = GeneratorStart {
        range,
        verbose: settings.verbose,
    };
    let generator = TargetGenerator::spawn(start, settings.generator)?;
    consume_generator(queue, settings, generator, range, label, task).await
}

async fn consume_generator<F, Fut>(
    queue: &BoundedQueue,
    settings: &ScanSettings,
    generator: TargetGenerator,
    range: Ipv4Range,
    label: &'static str,
    task: F,
) -> Result<ScanSummary, SweepError>
where
    F: Fn(Ipv4Addr) -> Fut,
    Fut: Future<Output = usize> + Send + 'static,
{
    let mut generator = Some(generator);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<usize>();
    let mut watermark = GenerationWatermark::default();
    let mut throttle = Throttle::new(settings.generator_high, settings.generator_low);
    let eta = Eta::start(range.len());
    let mut findings = 0u64;

    info!(from = %range.from, to = %range.to, addresses = range.len(), "{label} started.");

    loop {
        if generator.is_none() && watermark.processed >= watermark.generated {
            break;
        }

        tokio::select! {
            next = next_address(&mut generator), if generator.is_some() => match next {
                Some(addr) => {
                    watermark.generated += 1;
                    let completion = Completion { tx: done_tx.clone(), found: 0 };
                    queue.add(report_completion(completion, task(addr)));
                }
                None => {
                    if let Some(finished) = generator.take() {
                        if let Err(err) = finished.join().await {
                            error!(error = %err, "Target generator crashed.");
                            queue.close();
                            return Err(err.into());
                        }
                        debug!(generated = watermark.generated, "Generator finished.");
                    }
                }
            },
            Some(found) = done_rx.recv() => {
                watermark.processed += 1;
                findings += found as u64;
                if settings.progress_every > 0 && watermark.processed % settings.progress_every == 0 {
                    log_progress(label, &eta, watermark.processed);
                }
            }
        }

        if let Some(signal) = throttle.update(watermark.backlog()) {
            if let Some(active) = &generator {
                if settings.verbose {
                    info!(?signal, backlog = watermark.backlog(), "Generator throttling.");
                }
                if let Err(err) = active.set_paused(signal == ThrottleSignal::Pause) {
                    debug!(error = %err, "Generator already stopped.");
                }
            }
        }
    }

    queue.wait_for_empty().await;
    info!(targets = watermark.generated, findings, "{label} done.");
    Ok(ScanSummary {
        targets: watermark.generated,
        findings,
    })
}

/// Hands findings to every sink in parallel. Sink failures are logged only.
pub async fn forward_findings(
    sinks: &[Arc<dyn ResultSink>],
    origin: &str,
    results: Vec<CheckResult>,
) -> usize {
    if results.is_empty() {
        return 0;
    }
    let sites: Vec<ScannedSite> = results
        .into_iter()
        .map(|result| ScannedSite::from_result(origin, result))
        .collect();
    for site in &sites {
        info!(url = %site.url, checker = %site.checker, "Check passed.");
    }

    let inserts = sinks.iter().flat_map(|sink| {
        sites
            .iter()
            .map(move |site| async move { (site, sink.insert_scan(site).await) })
    });
    for (site, result) in join_all(inserts).await {
        if let Err(err) = result {
            error!(url = %site.url, checker = %site.checker, error = %err, "Failed to store finding.");
        }
    }
    sites.len()
}

/// Runs checkers over targets and forwards what they find.
#[derive(Clone)]
pub struct ScanOrchestrator {
    runner: Arc<CheckerRunner>,
    queue: BoundedQueue,
    sinks: Arc<[Arc<dyn ResultSink>]>,
    settings: ScanSettings,
}

impl ScanOrchestrator {
    pub fn new(
        runner: CheckerRunner,
        queue: BoundedQueue,
        sinks: Vec<Arc<dyn ResultSink>>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            runner: Arc::new(runner),
            queue,
            sinks: sinks.into(),
            settings,
        }
    }

    pub fn queue(&self) -> &BoundedQueue {
        &self.queue
    }

    /// Checks one target and forwards its findings. Returns how many there were.
    pub async fn check_target(&self, target: &Target) -> usize {
        if self.settings.verbose {
            info!(target = %target, "Processing.");
        }
        let origin = target.origin();
        let results = self.runner.check_url(&origin).await;
        forward_findings(&self.sinks, &origin, results).await
    }

    /// Submits `target`, first waiting for the queue to drain if it is too deep.
    async fn submit(&self, target: Target, stats: &Arc<RunStats>) {
        if self.queue.queue_length() > self.settings.queue_high {
            debug!(queued = self.queue.queue_length(), "Queue is full, waiting for it to drain.");
            self.queue.wait_until_below(self.settings.queue_resume).await;
        }
        let this = self.clone();
        let stats = Arc::clone(stats);
        self.queue.add(async move {
            let found = this.check_target(&target).await;
            stats.record(found);
        });
    }

    /// Scans `http://<ip>` for every address of `range`.
    pub async fn scan_ipv4(&self, range: Ipv4Range) -> Result<ScanSummary, SweepError> {
        let this = self.clone();
        drive_generator(&self.queue, &self.settings, range, "IPv4 scan", move |addr| {
            let this = this.clone();
            async move { this.check_target(&Target::Address(addr)).await }
        })
        .await
    }

    /// Scans every origin of the archive files described by `source`.
    pub async fn scan_common_crawl(
        &self,
        archive: &ArchiveStream,
        source: CrawlSource,
        options: StreamOptions,
    ) -> Result<ScanSummary, SweepError> {
        let handler = Arc::new(CrawlScan {
            orchestrator: self.clone(),
            stats: Arc::new(RunStats::new("Common Crawl scan", 0, self.settings.progress_every)),
            files_eta: OnceCell::new(),
        });
        let streamed = stream_domains(archive, source, options, handler.clone()).await?;
        self.queue.wait_for_empty().await;
        log_stream_summary(&streamed);

        let summary = handler.stats.summary();
        info!(targets = summary.targets, findings = summary.findings, "Common Crawl scan done.");
        Ok(summary)
    }

    /// Scans the origins of a target store, within the `options` window.
    pub async fn scan_datastore(
        &self,
        store: Arc<dyn TargetStore>,
        options: IterateOptions,
    ) -> Result<ScanSummary, SweepError> {
        let total = match options.read {
            Some(read) => read,
            None => store.count_sites().await?.saturating_sub(options.skip),
        };
        info!(total, skip = options.skip, "Datastore scan started.");
        let stats = Arc::new(RunStats::new("Datastore scan", total, self.settings.progress_every));

        let mut urls = store.iterate_urls(options).await?;
        while let Some(url) = urls.next().await {
            match url {
                Ok(url) => self.submit(Target::Origin(url), &stats).await,
                Err(err) => {
                    error!(error = %err, "Datastore iteration failed.");
                    self.queue.wait_for_empty().await;
                    return Err(err.into());
                }
            }
        }

        self.queue.wait_for_empty().await;
        let summary = stats.summary();
        info!(targets = summary.targets, findings = summary.findings, "Datastore scan done.");
        Ok(summary)
    }
}

fn log_stream_summary(summary: &StreamSummary) {
    info!(
        files = summary.files,
        failed_files = summary.failed_files,
        domains = summary.domains,
        "Archive stream finished."
    );
}

fn log_file_progress(eta: Option<&Eta>, progress: Progress) {
    match eta {
        Some(eta) => {
            let snapshot = eta.get(progress.processed as u64);
            info!(
                processed = progress.processed,
                total = progress.total,
                percent = progress.percent(),
                elapsed = %snapshot.elapsed_human(),
                remaining = %snapshot.remaining_human(),
                "Archive files processed."
            );
        }
        None => info!(processed = progress.processed, total = progress.total, "Archive files processed."),
    }
}

struct CrawlScan {
    orchestrator: ScanOrchestrator,
    stats: Arc<RunStats>,
    files_eta: OnceCell<Eta>,
}

#[async_trait]
impl DomainHandler for CrawlScan {
    async fn on_calculated_total(&self, total: usize) {
        info!(total, "Total Common Crawl data files.");
        let _ = self.files_eta.set(Eta::start(total as u64));
    }

    async fn on_domains(&self, domains: Vec<String>) {
        for origin in domains {
            self.orchestrator.submit(Target::Origin(origin), &self.stats).await;
        }
    }

    async fn on_progress(&self, progress: Progress) {
        log_file_progress(self.files_eta.get(), progress);
    }
}

/// Inserts the live origins of every address of `range` into `targets`.
pub async fn import_ipv4(
    queue: &BoundedQueue,
    settings: &ScanSettings,
    range: Ipv4Range,
    probe: Arc<LivenessProbe>,
    targets: Vec<Arc<dyn TargetStore>>,
) -> Result<ScanSummary, SweepError> {
    let targets: Arc<[Arc<dyn TargetStore>]> = targets.into();
    let verbose = settings.verbose;
    drive_generator(queue, settings, range, "IPv4 import", move |addr| {
        let probe = Arc::clone(&probe);
        let targets = Arc::clone(&targets);
        async move {
            let origins = probe.check_ip(addr).await;
            if origins.is_empty() {
                return 0;
            }
            if verbose {
                info!(addr = %addr, origins = ?origins, "Found origins for address.");
            }
            for result in join_all(targets.iter().map(|store| store.insert_urls(&origins))).await {
                if let Err(err) = result {
                    error!(addr = %addr, error = %err, "Failed to store origins.");
                }
            }
            origins.len()
        }
    })
    .await
}

struct CrawlImport {
    batch: Mutex<UrlBatch>,
    files_eta: OnceCell<Eta>,
}

#[async_trait]
impl DomainHandler for CrawlImport {
    async fn on_calculated_total(&self, total: usize) {
        info!(total, "Total Common Crawl data files.");
        let _ = self.files_eta.set(Eta::start(total as u64));
    }

    async fn on_domains(&self, domains: Vec<String>) {
        self.batch.lock().await.add(domains).await;
    }

    async fn on_progress(&self, progress: Progress) {
        log_file_progress(self.files_eta.get(), progress);
    }
}

/// Streams the origins of `source` into `targets`, `batch_size` at a time.
pub async fn import_common_crawl(
    archive: &ArchiveStream,
    source: CrawlSource,
    options: StreamOptions,
    targets: Vec<Arc<dyn TargetStore>>,
    batch_size: usize,
) -> Result<ScanSummary, SweepError> {
    let handler = Arc::new(CrawlImport {
        batch: Mutex::new(UrlBatch::new(batch_size, targets)),
        files_eta: OnceCell::new(),
    });
    let streamed = stream_domains(archive, source, options, handler.clone()).await;

    // Whatever was accumulated is flushed even when the manifest failed.
    let imported = handler.batch.lock().await.finish().await;
    let streamed = streamed?;
    log_stream_summary(&streamed);
    info!(imported, "Common Crawl import done.");
    Ok(ScanSummary {
        targets: streamed.domains,
        findings: imported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checker::{Checker, CheckerMap, RegisteredChecker};
    use crate::core::fetch::RetryPolicy;
    use crate::core::ip_probe::ReverseResolver;
    use crate::core::models::{CheckOutcome, CheckerContext, Meta, MetaValue};
    use crate::core::store::MemoryStore;
    use crate::core::testing::{StubFetcher, gzip};
    use crate::error::{CheckerError, GeneratorError, StoreError};
    use std::time::Duration;

    struct NonEmptyBody;

    #[async_trait]
    impl Checker for NonEmptyBody {
        async fn check(&self, ctx: &CheckerContext) -> Result<CheckOutcome, CheckerError> {
            if ctx.text().is_empty() {
                return Ok(CheckOutcome::NoMatch);
            }
            let mut meta = Meta::new();
            meta.insert("url".into(), ctx.url.as_str().into());
            meta.insert("length".into(), MetaValue::Int(ctx.text().len() as i64));
            Ok(CheckOutcome::Match(meta))
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl ResultSink for BrokenSink {
        async fn insert_scan(&self, _site: &ScannedSite) -> Result<(), StoreError> {
            Err(StoreError::UnknownStore("broken".into()))
        }
    }

    struct NoPtr;

    #[async_trait]
    impl ReverseResolver for NoPtr {
        async fn reverse(&self, _addr: Ipv4Addr) -> Vec<String> {
            Vec::new()
        }
    }

    fn settings() -> ScanSettings {
        ScanSettings {
            generator: GeneratorConfig {
                emit_delay: Duration::ZERO,
                pause_poll: Duration::from_millis(10),
                channel_capacity: 8,
            },
            ..ScanSettings::default()
        }
    }

    fn queue() -> BoundedQueue {
        BoundedQueue::new(4, Duration::from_millis(10))
    }

    fn orchestrator(fetcher: Arc<StubFetcher>, sinks: Vec<Arc<dyn ResultSink>>) -> ScanOrchestrator {
        let map = CheckerMap::new().register("", RegisteredChecker::new("nonEmpty", Arc::new(NonEmptyBody)));
        ScanOrchestrator::new(CheckerRunner::new(fetcher, map), queue(), sinks, settings())
    }

    fn range(from: [u8; 4], to: [u8; 4]) -> Ipv4Range {
        Ipv4Range::new(Ipv4Addr::from(from), Ipv4Addr::from(to)).unwrap()
    }

    #[tokio::test]
    async fn ipv4_scan_checks_every_address_and_stores_findings() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.respond("http://10.0.0.1/", "hello");
        fetcher.respond("http://10.0.0.3/", "world!");
        let store = Arc::new(MemoryStore::new());
        let sink: Arc<dyn ResultSink> = store.clone();
        let scan = orchestrator(fetcher.clone(), vec![sink]);

        let summary = scan.scan_ipv4(range([10, 0, 0, 0], [10, 0, 0, 3])).await.unwrap();

        assert_eq!(summary, ScanSummary { targets: 4, findings: 2 });
        assert_eq!(fetcher.hits("http://10.0.0.0/"), 1);
        assert_eq!(fetcher.hits("http://10.0.0.2/"), 1);
        let urls: Vec<String> = store.scans().into_iter().map(|s| s.url).collect();
        assert_eq!(urls, vec!["http://10.0.0.1/", "http://10.0.0.3/"]);
        assert!(scan.queue().state().is_idle());
    }

    #[tokio::test]
    async fn generator_pauses_at_the_watermark_and_resumes_when_drained() {
        let settings = ScanSettings {
            generator_high: 50,
            generator_low: 10,
            generator: GeneratorConfig {
                emit_delay: Duration::ZERO,
                pause_poll: Duration::from_millis(5),
                channel_capacity: 4,
            },
            ..ScanSettings::default()
        };
        let queue = BoundedQueue::new(4, Duration::from_millis(5));
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let generated = Arc::new(AtomicU64::new(0));

        let run = {
            let queue = queue.clone();
            let gate = Arc::clone(&gate);
            let generated = Arc::clone(&generated);
            tokio::spawn(async move {
                let task = move |_addr: Ipv4Addr| {
                    generated.fetch_add(1, Ordering::SeqCst);
                    let gate = Arc::clone(&gate);
                    async move {
                        let _pass = gate.acquire().await;
                        1
                    }
                };
                drive_generator(&queue, &settings, range([10, 0, 0, 0], [10, 0, 39, 255]), "test", task).await
            })
        };

        // Nothing completes while the gate is shut, so the backlog only grows.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let stalled = generated.load(Ordering::SeqCst);
        assert!(stalled > 50, "generator never reached the watermark: {stalled}");
        assert!(stalled <= 64, "generator kept going past the watermark: {stalled}");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(generated.load(Ordering::SeqCst), stalled);

        gate.add_permits(64);
        let summary = tokio::time::timeout(Duration::from_secs(30), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(summary, ScanSummary { targets: 10_240, findings: 10_240 });
        assert_eq!(generated.load(Ordering::SeqCst), 10_240);
        assert!(queue.state().is_idle());
    }

    #[tokio::test]
    async fn crashed_generator_closes_the_queue_and_fails_the_run() {
        let generator = TargetGenerator::spawn_worker(settings().generator, |addresses, _control| {
            for last in 0..3 {
                let _ = addresses.blocking_send(Ipv4Addr::new(10, 0, 0, last));
            }
            panic!("address table corrupted");
        })
        .unwrap();
        let queue = queue();
        let settings = settings();

        let run = consume_generator(
            &queue,
            &settings,
            generator,
            range([10, 0, 0, 0], [10, 0, 0, 255]),
            "test",
            |_addr| async { 0 },
        );
        match tokio::time::timeout(Duration::from_secs(5), run).await.unwrap() {
            Err(SweepError::Generator(GeneratorError::Crashed(message))) => {
                assert!(message.contains("address table corrupted"), "{message}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(queue.add(async { 1 }).await.ok().flatten(), None);
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_the_others() {
        let store = Arc::new(MemoryStore::new());
        let sinks: Vec<Arc<dyn ResultSink>> = vec![Arc::new(BrokenSink), store.clone()];
        let mut meta = Meta::new();
        meta.insert("url".into(), "http://a.test/.git/HEAD".into());
        meta.insert("directoryExposed".into(), true.into());
        let results = vec![CheckResult { checker: "git".into(), meta }];

        assert_eq!(forward_findings(&sinks, "http://a.test", results).await, 1);
        let scans = store.scans();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].url, "http://a.test/.git/HEAD");
        assert!(!scans[0].meta.contains_key("url"));
    }

    #[tokio::test]
    async fn datastore_scan_respects_the_window() {
        let fetcher = Arc::new(StubFetcher::default());
        for host in ["b", "c", "e"] {
            fetcher.respond(&format!("http://{host}.test/"), "up");
        }
        let targets = Arc::new(MemoryStore::new());
        let urls: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|h| format!("http://{h}.test")).collect();
        targets.insert_urls(&urls).await.unwrap();
        let sink: Arc<dyn ResultSink> = targets.clone();
        let scan = orchestrator(fetcher.clone(), vec![sink]);

        let summary = scan
            .scan_datastore(targets.clone(), IterateOptions { skip: 1, read: Some(3) })
            .await
            .unwrap();

        assert_eq!(summary, ScanSummary { targets: 3, findings: 2 });
        assert_eq!(fetcher.hits("http://a.test/"), 0);
        assert_eq!(fetcher.hits("http://e.test/"), 0);
        assert_eq!(targets.count_records().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn common_crawl_scan_checks_extracted_origins() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.stream_chunked(
            "https://data.test/f.gz",
            gzip(b"WARC-Target-URI: http://www.shop.test/cart\nWARC-Target-URI: https://blog.test/p/1\n"),
            9,
        );
        fetcher.respond("https://blog.test/", "<html>blog</html>");
        let store = Arc::new(MemoryStore::new());
        let sink: Arc<dyn ResultSink> = store.clone();
        let scan = orchestrator(fetcher.clone(), vec![sink]);
        let archive = ArchiveStream::new(fetcher.clone(), "https://data.test");
        let options = StreamOptions {
            retry: RetryPolicy { max_attempts: 1, base_delay: Duration::ZERO },
            ..StreamOptions::default()
        };

        let summary = scan
            .scan_common_crawl(&archive, CrawlSource::Files(vec!["f.gz".into()]), options)
            .await
            .unwrap();

        assert_eq!(summary, ScanSummary { targets: 2, findings: 1 });
        assert_eq!(fetcher.hits("http://shop.test/"), 1);
        assert_eq!(store.scans()[0].url, "https://blog.test/");
    }

    #[tokio::test]
    async fn ipv4_import_stores_live_origins() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.respond("http://10.0.0.1", "ok");
        let probe = Arc::new(LivenessProbe::new(fetcher, Arc::new(NoPtr), Duration::from_secs(1)));
        let store = Arc::new(MemoryStore::new());
        let target: Arc<dyn TargetStore> = store.clone();

        let summary = import_ipv4(
            &queue(),
            &settings(),
            range([10, 0, 0, 0], [10, 0, 0, 2]),
            probe,
            vec![target],
        )
        .await
        .unwrap();

        assert_eq!(summary, ScanSummary { targets: 3, findings: 1 });
        assert_eq!(store.sites(), vec!["http://10.0.0.1"]);
    }

    #[tokio::test]
    async fn common_crawl_import_flushes_the_tail() {
        let fetcher = Arc::new(StubFetcher::default());
        let lines: String = (0..5).map(|i| format!("WARC-Target-URI: http://site{i}.test/\n")).collect();
        fetcher.stream_chunked("https://data.test/f.gz", gzip(lines.as_bytes()), 16);
        let archive = ArchiveStream::new(fetcher, "https://data.test");
        let store = Arc::new(MemoryStore::new());
        let target: Arc<dyn TargetStore> = store.clone();

        let summary = import_common_crawl(
            &archive,
            CrawlSource::Files(vec!["f.gz".into()]),
            StreamOptions::default(),
            vec![target],
            2,
        )
        .await
        .unwrap();

        assert_eq!(summary.findings, 5);
        assert_eq!(store.count_sites().await.unwrap(), 5);
    }
}
