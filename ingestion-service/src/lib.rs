//! Job orchestrator: a queued worker that drives whole ingestion runs with
//! bounded concurrency, whole-job retry on transient failure, a wall-clock
//! timeout, and progress fan-out over the bus. One job is one Execution
//! audit record from `pending` to a terminal state.

pub mod feed;

use async_trait::async_trait;
use catalog_store::{ExecutionStore, ProjectionStore, SecurityStore, StoreError};
use core_types::config::IngestConfig;
use core_types::progress::{JobEvent, ProgressBus};
use core_types::retry::RetryPolicy;
use core_types::types::{Execution, ExecutionKind, ExecutionStatus, NormalizedSecurity, SyncSource};
use feed::{FeedError, SecurityFeed};
use ingestion_engine::normalize::normalize_feed_record;
use ingestion_engine::{BatchScheduler, BatchStats, ProgressReporter, ReconcileEngine, RunError};
use log::{error, info, warn};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use workbook_source::Workbook;

const QUEUE_DEPTH: usize = 64;

/// What a queued job should do. File jobs own their path and the file is
/// removed after the run regardless of outcome.
#[derive(Debug, Clone)]
pub enum JobSpec {
    File { path: PathBuf },
    Api,
}

impl JobSpec {
    fn kind(&self) -> ExecutionKind {
        match self {
            JobSpec::File { .. } => ExecutionKind::FileSync,
            JobSpec::Api => ExecutionKind::ApiSync,
        }
    }
}

#[derive(Debug)]
struct QueuedJob {
    execution_id: u64,
    spec: JobSpec,
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("ingestion queue is closed")]
    QueueClosed,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("job timed out after {0:?}")]
    Timeout(Duration),
    #[error("api sync requested but no feed is configured")]
    FeedUnconfigured,
}

impl JobError {
    /// Timeouts and feed outages are worth a whole-job re-attempt; format
    /// and store problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            JobError::Run(err) => err.is_transient(),
            JobError::Feed(err) => err.is_transient(),
            JobError::Timeout(_) => true,
            JobError::FeedUnconfigured => false,
        }
    }
}

pub struct IngestionService {
    config: IngestConfig,
    securities: Arc<dyn SecurityStore>,
    executions: Arc<dyn ExecutionStore>,
    projections: Arc<dyn ProjectionStore>,
    feed: Option<Arc<dyn SecurityFeed>>,
    bus: Arc<ProgressBus>,
    retry: RetryPolicy,
    limiter: Arc<Semaphore>,
    queue: mpsc::Sender<QueuedJob>,
    receiver: Mutex<Option<mpsc::Receiver<QueuedJob>>>,
}

impl IngestionService {
    pub fn new(
        config: IngestConfig,
        securities: Arc<dyn SecurityStore>,
        executions: Arc<dyn ExecutionStore>,
        projections: Arc<dyn ProjectionStore>,
        feed: Option<Arc<dyn SecurityFeed>>,
        bus: Arc<ProgressBus>,
    ) -> Arc<Self> {
        let retry = RetryPolicy::new(config.max_attempts, 1_000, 30_000, 0.2);
        Self::with_retry(config, securities, executions, projections, feed, bus, retry)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_retry(
        config: IngestConfig,
        securities: Arc<dyn SecurityStore>,
        executions: Arc<dyn ExecutionStore>,
        projections: Arc<dyn ProjectionStore>,
        feed: Option<Arc<dyn SecurityFeed>>,
        bus: Arc<ProgressBus>,
        retry: RetryPolicy,
    ) -> Arc<Self> {
        let (queue, receiver) = mpsc::channel(QUEUE_DEPTH);
        Arc::new(Self {
            limiter: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            config,
            securities,
            executions,
            projections,
            feed,
            bus,
            retry,
            queue,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Spawns the worker loop. Jobs are picked up in enqueue order; the
    /// semaphore bounds how many run at once.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        let receiver = self.receiver.lock().take();
        tokio::spawn(async move {
            let Some(mut receiver) = receiver else {
                warn!("ingestion worker already started");
                return;
            };
            while let Some(job) = receiver.recv().await {
                let permit = match service.limiter.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let runner = Arc::clone(&service);
                tokio::spawn(async move {
                    runner.run_job(job).await;
                    drop(permit);
                });
            }
        })
    }

    pub async fn enqueue_file(
        &self,
        path: impl Into<PathBuf>,
        trigger: &str,
    ) -> Result<Execution, EnqueueError> {
        self.enqueue(JobSpec::File { path: path.into() }, trigger).await
    }

    pub async fn enqueue_api(&self, trigger: &str) -> Result<Execution, EnqueueError> {
        self.enqueue(JobSpec::Api, trigger).await
    }

    async fn enqueue(&self, spec: JobSpec, trigger: &str) -> Result<Execution, EnqueueError> {
        let execution = self.executions.create(spec.kind(), trigger).await?;
        self.bus.publish(JobEvent {
            execution_id: execution.id,
            status: ExecutionStatus::Pending,
            progress: 0,
            stats: None,
        });
        self.queue
            .send(QueuedJob {
                execution_id: execution.id,
                spec,
            })
            .await
            .map_err(|_| EnqueueError::QueueClosed)?;
        Ok(execution)
    }

    async fn run_job(&self, job: QueuedJob) {
        let id = job.execution_id;
        if let Err(err) = self.executions.mark_running(id).await {
            error!("execution {id}: could not mark running: {err}");
            return;
        }
        self.bus.publish(JobEvent {
            execution_id: id,
            status: ExecutionStatus::Running,
            progress: 0,
            stats: None,
        });
        info!("execution {id} started: {:?}", job.spec);

        let spec = &job.spec;
        let result = self
            .retry
            .retry_async_when(
                |attempt| async move {
                    if attempt > 0 {
                        info!("execution {id}: attempt {}", attempt + 1);
                    }
                    self.attempt(id, spec).await
                },
                JobError::is_transient,
            )
            .await;

        let (status, errors, stats) = match result {
            Ok(stats) => {
                let errors = stats.error_messages();
                let snapshot = Some(stats.snapshot());
                if errors.is_empty() {
                    (ExecutionStatus::Completed, Vec::new(), snapshot)
                } else {
                    // rejected rows fail the whole job even though the rows
                    // that passed validation stay written
                    (ExecutionStatus::Failed, errors, snapshot)
                }
            }
            Err(err) => {
                error!("execution {id} failed: {err}");
                (ExecutionStatus::Failed, vec![err.to_string()], None)
            }
        };

        if let Err(err) = self.executions.finish(id, status, errors).await {
            error!("execution {id}: could not record terminal state: {err}");
        }
        let progress = match self.executions.get(id).await {
            Ok(Some(execution)) => execution.progress,
            _ => 0,
        };
        // remove the upload first so observers of the terminal event never
        // see the file still on disk
        if let JobSpec::File { path } = &job.spec {
            if let Err(err) = tokio::fs::remove_file(path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("execution {id}: could not remove {}: {err}", path.display());
                }
            }
        }
        self.bus.publish(JobEvent {
            execution_id: id,
            status,
            progress,
            stats,
        });
        info!("execution {id} finished: {status:?}");
        self.bus.retire_job(id);
    }

    /// One full pass over the input with the timeout applied around it. The
    /// progress store is monotonic, so a re-attempt never shows regress.
    async fn attempt(&self, execution_id: u64, spec: &JobSpec) -> Result<BatchStats, JobError> {
        let reporter = ExecReporter {
            execution_id,
            executions: self.executions.clone(),
            bus: self.bus.clone(),
        };
        let work = async {
            match spec {
                JobSpec::File { path } => {
                    let workbook = Workbook::open(path).map_err(RunError::from)?;
                    let scheduler = self.scheduler(None);
                    Ok(scheduler.run_workbook(&workbook, &reporter).await?)
                }
                JobSpec::Api => {
                    let feed = self.feed.as_ref().ok_or(JobError::FeedUnconfigured)?;
                    let records = feed.fetch().await?;
                    let normalized: Vec<NormalizedSecurity> = records
                        .iter()
                        .enumerate()
                        .filter_map(|(idx, rec)| normalize_feed_record(idx as u32 + 1, rec))
                        .collect();
                    let scheduler = self.scheduler(Some(SyncSource::Api));
                    Ok(scheduler.run_records(normalized, &reporter).await?)
                }
            }
        };
        let timeout = Duration::from_secs(self.config.job_timeout_secs);
        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(JobError::Timeout(timeout)),
        }
    }

    fn scheduler(&self, override_source: Option<SyncSource>) -> BatchScheduler {
        let mut engine = ReconcileEngine::new(self.securities.clone(), self.projections.clone());
        if let Some(source) = override_source {
            engine = engine.with_override_source(source);
        }
        BatchScheduler::new(engine, self.config.chunk_size)
    }
}

/// Writes each progress tick through the execution store and republishes
/// the effective (monotonic, clamped) value on the bus.
struct ExecReporter {
    execution_id: u64,
    executions: Arc<dyn ExecutionStore>,
    bus: Arc<ProgressBus>,
}

#[async_trait]
impl ProgressReporter for ExecReporter {
    async fn report(&self, progress: u8) {
        match self.executions.set_progress(self.execution_id, progress).await {
            Ok(effective) => self.bus.publish(JobEvent {
                execution_id: self.execution_id,
                status: ExecutionStatus::Running,
                progress: effective,
                stats: None,
            }),
            Err(err) => warn!(
                "execution {}: progress update dropped: {err}",
                self.execution_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_store::{MemoryCatalog, MemoryProjections};
    use core_types::types::{SecurityKey, SyncSource, DEFAULT_SERIES};
    use feed::FeedRecord;
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zip::write::FileOptions;
    use zip::ZipWriter;

    struct Harness {
        store: Arc<MemoryCatalog>,
        bus: Arc<ProgressBus>,
        service: Arc<IngestionService>,
    }

    fn harness(feed: Option<Arc<dyn SecurityFeed>>) -> Harness {
        harness_with(IngestConfig::default(), feed)
    }

    fn harness_with(config: IngestConfig, feed: Option<Arc<dyn SecurityFeed>>) -> Harness {
        let store = Arc::new(MemoryCatalog::new());
        let bus = Arc::new(ProgressBus::new(64));
        let service = IngestionService::with_retry(
            config,
            store.clone(),
            store.clone(),
            Arc::new(MemoryProjections::new()),
            feed,
            bus.clone(),
            RetryPolicy::new(3, 1, 1, 0.0),
        );
        service.start();
        Harness { store, bus, service }
    }

    fn write_sheet(path: &Path, rows: &[String]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        zip.start_file("xl/worksheets/sheet1.xml", FileOptions::default())
            .unwrap();
        let sheet = format!(
            "<worksheet><sheetData>{}</sheetData></worksheet>",
            rows.join("")
        );
        zip.write_all(sheet.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    fn inline(cell: &str, value: &str) -> String {
        format!(r#"<c r="{cell}" t="inlineStr"><is><t>{value}</t></is></c>"#)
    }

    fn security_row(row: u32, code: &str, issuer: &str, duration: &str) -> String {
        format!(
            r#"<row r="{row}">{}{}{}<c r="P{row}"><v>{duration}</v></c></row>"#,
            inline(&format!("B{row}"), code),
            inline(&format!("C{row}"), issuer),
            inline(&format!("H{row}"), "CRI"),
        )
    }

    async fn await_terminal(
        rx: &mut tokio::sync::broadcast::Receiver<JobEvent>,
        execution_id: u64,
    ) -> JobEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if event.execution_id == execution_id && event.status.is_terminal() {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn file_job_runs_to_completion_and_removes_the_file() {
        let h = harness(None);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.xlsx");
        write_sheet(
            &path,
            &[
                security_row(1, "CRI123", "Issuer A", "12"),
                security_row(2, "CRI123", "Issuer B", "12"),
                // no code: skipped, never failing the job
                format!(
                    r#"<row r="3">{}{}<c r="P3"><v>30</v></c></row>"#,
                    inline("C3", "Issuer C"),
                    inline("H3", "CRI"),
                ),
            ],
        );

        let mut events = h.bus.subscribe_all();
        let execution = h.service.enqueue_file(&path, "upload").await.unwrap();
        let terminal = await_terminal(&mut events, execution.id).await;

        assert_eq!(terminal.status, ExecutionStatus::Completed);
        assert_eq!(terminal.progress, 100);
        let stats = terminal.stats.unwrap();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.errors, 0);

        let key = SecurityKey::new("CRI123", DEFAULT_SERIES);
        let stored = SecurityStore::get(h.store.as_ref(), &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.issuer, "Issuer B");
        assert_eq!(stored.sync_source, SyncSource::Xls);
        assert!(!path.exists());

        let audit = ExecutionStore::get(h.store.as_ref(), execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(audit.status, ExecutionStatus::Completed);
        assert!(audit.errors.is_empty());
    }

    #[tokio::test]
    async fn rejected_rows_fail_the_job_but_valid_rows_stay() {
        let h = harness(None);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.xlsx");
        write_sheet(
            &path,
            &[
                security_row(1, "CRI1", "Issuer A", "12"),
                security_row(2, "CRI2", "Issuer A", "0"),
            ],
        );

        let mut events = h.bus.subscribe_all();
        let execution = h.service.enqueue_file(&path, "upload").await.unwrap();
        let terminal = await_terminal(&mut events, execution.id).await;

        assert_eq!(terminal.status, ExecutionStatus::Failed);
        assert_eq!(terminal.stats.unwrap().errors, 1);
        assert_eq!(SecurityStore::count(h.store.as_ref()).await.unwrap(), 1);

        let audit = ExecutionStore::get(h.store.as_ref(), execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(audit.errors.len(), 1);
        assert!(audit.errors[0].starts_with("row 2:"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_file_fails_without_burning_retries() {
        let h = harness(None);
        let mut events = h.bus.subscribe_all();
        let execution = h
            .service
            .enqueue_file("/no/such/export.xlsx", "upload")
            .await
            .unwrap();
        let terminal = await_terminal(&mut events, execution.id).await;

        assert_eq!(terminal.status, ExecutionStatus::Failed);
        assert!(terminal.stats.is_none());
        let audit = ExecutionStore::get(h.store.as_ref(), execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(audit.errors.len(), 1);
    }

    #[tokio::test]
    async fn progress_events_are_monotonic() {
        let h = harness(None);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.xlsx");
        let rows: Vec<String> = (1..=4)
            .map(|i| security_row(i, &format!("CRI{i}"), "Issuer A", "12"))
            .collect();
        write_sheet(&path, &rows);

        let mut events = h.bus.subscribe_all();
        let execution = h.service.enqueue_file(&path, "upload").await.unwrap();

        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.unwrap();
            if event.execution_id != execution.id {
                continue;
            }
            seen.push(event.progress);
            if event.status.is_terminal() {
                break;
            }
        }
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 100);
    }

    struct FlakyFeed {
        calls: AtomicUsize,
        records: Vec<FeedRecord>,
    }

    #[async_trait]
    impl SecurityFeed for FlakyFeed {
        async fn fetch(&self) -> Result<Vec<FeedRecord>, FeedError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(FeedError::Unavailable("connection reset".into()));
            }
            Ok(self.records.clone())
        }
    }

    fn feed_record(code: &str) -> FeedRecord {
        let mut record = HashMap::new();
        record.insert("code".to_string(), code.to_string());
        record.insert("issuer".to_string(), "Issuer F".to_string());
        record.insert("security_type".to_string(), "CRA".to_string());
        record.insert("duration".to_string(), "180".to_string());
        record
    }

    #[tokio::test]
    async fn api_job_retries_transient_feed_failure() {
        let feed = Arc::new(FlakyFeed {
            calls: AtomicUsize::new(0),
            records: vec![feed_record("CRA77")],
        });
        let h = harness(Some(feed.clone()));

        let mut events = h.bus.subscribe_all();
        let execution = h.service.enqueue_api("schedule").await.unwrap();
        let terminal = await_terminal(&mut events, execution.id).await;

        assert_eq!(terminal.status, ExecutionStatus::Completed);
        assert_eq!(terminal.stats.unwrap().created, 1);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 2);

        let key = SecurityKey::new("CRA77", DEFAULT_SERIES);
        let stored = SecurityStore::get(h.store.as_ref(), &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sync_source, SyncSource::Api);
    }

    struct SlowFeed {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SecurityFeed for SlowFeed {
        async fn fetch(&self) -> Result<Vec<FeedRecord>, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn job_exceeding_the_timeout_fails_after_reattempts() {
        let feed = Arc::new(SlowFeed {
            calls: AtomicUsize::new(0),
        });
        let config = IngestConfig {
            job_timeout_secs: 0,
            ..IngestConfig::default()
        };
        let h = harness_with(config, Some(feed.clone()));

        let mut events = h.bus.subscribe_all();
        let execution = h.service.enqueue_api("schedule").await.unwrap();
        let terminal = await_terminal(&mut events, execution.id).await;

        assert_eq!(terminal.status, ExecutionStatus::Failed);
        // a timeout is transient: the whole job is re-attempted to the ceiling
        assert_eq!(feed.calls.load(Ordering::SeqCst), 3);

        let audit = ExecutionStore::get(h.store.as_ref(), execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(audit.status, ExecutionStatus::Failed);
        assert!(audit.errors[0].contains("timed out"));
    }

    #[tokio::test]
    async fn api_job_without_feed_fails_immediately() {
        let h = harness(None);
        let mut events = h.bus.subscribe_all();
        let execution = h.service.enqueue_api("schedule").await.unwrap();
        let terminal = await_terminal(&mut events, execution.id).await;

        assert_eq!(terminal.status, ExecutionStatus::Failed);
        let audit = ExecutionStore::get(h.store.as_ref(), execution.id)
            .await
            .unwrap()
            .unwrap();
        assert!(audit.errors[0].contains("no feed"));
    }

    #[tokio::test]
    async fn jobs_queued_together_each_get_an_execution() {
        let h = harness(None);
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.xlsx");
        let second = dir.path().join("second.xlsx");
        write_sheet(&first, &[security_row(1, "CRI1", "Issuer A", "12")]);
        write_sheet(&second, &[security_row(1, "CRI2", "Issuer A", "12")]);

        let mut events = h.bus.subscribe_all();
        let a = h.service.enqueue_file(&first, "upload").await.unwrap();
        let b = h.service.enqueue_file(&second, "upload").await.unwrap();
        assert_ne!(a.id, b.id);

        let terminal_a = await_terminal(&mut events, a.id).await;
        let terminal_b = await_terminal(&mut events, b.id).await;
        assert_eq!(terminal_a.status, ExecutionStatus::Completed);
        assert_eq!(terminal_b.status, ExecutionStatus::Completed);
        assert_eq!(SecurityStore::count(h.store.as_ref()).await.unwrap(), 2);
    }
}
