//! Sync engine: authenticate, enumerate, filter against the destination,
//! then fetch, normalize and commit new items on a fixed worker pool.
//!
//! Enumeration and filtering finish before any worker starts, so the
//! progress bar knows its total up front. Each task owns a private scratch
//! directory that is removed however the task ends. Task failures are
//! logged and counted; only authentication and enumeration abort a run.

pub mod error;
pub mod exif;
pub mod normalize;
pub mod planner;

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::FixedOffset;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use self::error::SyncError;
use self::planner::{Planned, SyncTask};
use crate::remote::{FetchOutcome, RemoteSession, SizeClass};
use crate::storage::StorageBackend;

/// Subset of application config consumed by the engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub collection: String,
    pub size: SizeClass,
    pub concurrency: usize,
    pub set_exif_datetime: bool,
    pub dry_run: bool,
    pub no_progress_bar: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Authenticating,
    Enumerating,
    Filtering,
    Syncing,
    Done,
    Failed,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub enumerated: usize,
    pub skipped: usize,
    pub already_synced: usize,
    pub dispatched: usize,
    pub committed: usize,
    pub failed: usize,
    /// Planned but never started because the run was interrupted.
    pub interrupted: usize,
    /// Dry run only: tasks that would have been synced.
    pub would_sync: usize,
}

/// What filtering decided for one planned item.
#[derive(Debug)]
pub enum FilterOutcome {
    Pending(SyncTask),
    AlreadySynced,
    Failed,
}

struct WorkerContext {
    remote: Arc<dyn RemoteSession>,
    storage: Arc<dyn StorageBackend>,
    size: SizeClass,
    set_exif_datetime: bool,
}

struct TaskReport {
    id: String,
    path: String,
    result: Result<usize, SyncError>,
}

pub struct SyncEngine {
    remote: Arc<dyn RemoteSession>,
    storage: Arc<dyn StorageBackend>,
    config: SyncConfig,
    shutdown: CancellationToken,
    /// Zone destination folders are dated in; `None` is the system zone.
    time_zone: Option<FixedOffset>,
    phase: SyncPhase,
}

/// Returns `ProgressBar::hidden()` when disabled or stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .expect("valid template")
        .progress_chars("=> "),
    );
    pb
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteSession>,
        storage: Arc<dyn StorageBackend>,
        config: SyncConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            remote,
            storage,
            config,
            shutdown,
            time_zone: None,
            phase: SyncPhase::Authenticating,
        }
    }

    #[cfg(test)]
    fn with_time_zone(mut self, tz: FixedOffset) -> Self {
        self.time_zone = Some(tz);
        self
    }

    #[cfg(test)]
    fn phase(&self) -> SyncPhase {
        self.phase
    }

    fn transition(&mut self, next: SyncPhase) {
        tracing::debug!("Sync phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Run one full sync. Errors are fatal ones only; per-task failures are
    /// in the summary.
    pub async fn run(&mut self) -> anyhow::Result<SyncSummary> {
        let started = Instant::now();
        match self.run_phases().await {
            Ok(summary) => {
                self.transition(SyncPhase::Done);
                log_summary(&summary, self.config.dry_run, started.elapsed());
                Ok(summary)
            }
            Err(e) => {
                self.transition(SyncPhase::Failed);
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self) -> anyhow::Result<SyncSummary> {
        let mut summary = SyncSummary::default();

        self.transition(SyncPhase::Authenticating);
        self.remote.authenticate().await?;

        self.transition(SyncPhase::Enumerating);
        let items = self.remote.list_items(&self.config.collection).await?;
        summary.enumerated = items.len();
        tracing::info!(
            "Found {} items in '{}', syncing to {}",
            items.len(),
            self.config.collection,
            self.storage.describe()
        );

        self.transition(SyncPhase::Filtering);
        let mut pending = Vec::new();
        let total = items.len();
        for (index, item) in items.into_iter().enumerate() {
            if self.shutdown.is_cancelled() {
                tracing::info!(
                    "Shutdown requested, stopping before {} remaining items",
                    total - index
                );
                summary.interrupted += total - index;
                break;
            }
            let planned = match self.time_zone {
                Some(tz) => planner::plan_in(item, &tz),
                None => planner::plan(item),
            };
            let task = match planned {
                Planned::Skip(_) => {
                    summary.skipped += 1;
                    continue;
                }
                Planned::Task(task) => task,
            };
            match self.filter(task).await {
                FilterOutcome::Pending(task) => pending.push(task),
                FilterOutcome::AlreadySynced => summary.already_synced += 1,
                FilterOutcome::Failed => summary.failed += 1,
            }
        }

        if self.config.dry_run {
            for task in &pending {
                tracing::info!("[DRY RUN] Would sync {} to {}", task.item, task.path);
            }
            summary.would_sync = pending.len();
            return Ok(summary);
        }

        self.transition(SyncPhase::Syncing);
        if !pending.is_empty() {
            self.sync_tasks(pending, &mut summary).await;
        }
        Ok(summary)
    }

    async fn filter(&self, task: SyncTask) -> FilterOutcome {
        match self.storage.exists(&task.path).await {
            Ok(true) => {
                tracing::debug!("{} already synced at {}", task.item, task.path);
                FilterOutcome::AlreadySynced
            }
            Ok(false) => FilterOutcome::Pending(task),
            Err(e) => {
                let err = SyncError::Exists(e);
                tracing::error!(id = %task.item.id, path = %task.path, "{}", err);
                FilterOutcome::Failed
            }
        }
    }

    async fn sync_tasks(&self, tasks: Vec<SyncTask>, summary: &mut SyncSummary) {
        let concurrency = self.config.concurrency.max(1);
        let total = tasks.len();
        let pb = create_progress_bar(self.config.no_progress_bar, total as u64);

        let ctx = Arc::new(WorkerContext {
            remote: self.remote.clone(),
            storage: self.storage.clone(),
            size: self.config.size,
            set_exif_datetime: self.config.set_exif_datetime,
        });

        let (task_tx, task_rx) = mpsc::channel::<SyncTask>(concurrency);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (report_tx, mut report_rx) = mpsc::channel::<TaskReport>(concurrency);

        let mut workers = JoinSet::new();
        for _ in 0..concurrency {
            let rx = task_rx.clone();
            let tx = report_tx.clone();
            let ctx = ctx.clone();
            workers.spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(task) = next else { break };
                    let report = run_task(ctx.clone(), task).await;
                    if tx.send(report).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(task_rx);
        drop(report_tx);

        let shutdown = self.shutdown.clone();
        let dispatcher = tokio::spawn(async move {
            let mut dispatched = 0usize;
            for task in tasks {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    sent = task_tx.send(task) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
                dispatched += 1;
            }
            dispatched
        });

        while let Some(report) = report_rx.recv().await {
            match report.result {
                Ok(size) => {
                    summary.committed += 1;
                    pb.suspend(|| {
                        tracing::debug!(
                            id = %report.id,
                            path = %report.path,
                            size_bytes = size,
                            "committed"
                        );
                    });
                }
                Err(e) => {
                    summary.failed += 1;
                    pb.suspend(|| {
                        tracing::error!(
                            id = %report.id,
                            path = %report.path,
                            "Sync failed: {}",
                            e
                        );
                    });
                }
            }
            pb.set_message(report.path);
            pb.inc(1);
        }
        pb.finish_and_clear();

        let dispatched = match dispatcher.await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!("Dispatcher failed: {}", e);
                summary.committed + summary.failed
            }
        };
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("{}", SyncError::Worker(e.to_string()));
            }
        }

        summary.dispatched = dispatched;
        // Reports lost to a dead worker still count against the run.
        let reported = summary.committed + summary.failed;
        if dispatched > reported {
            summary.failed += dispatched - reported;
        }
        summary.interrupted += total - dispatched;
        if summary.interrupted > 0 {
            tracing::info!(
                "Interrupted: {} items were not started and will sync on the next run",
                summary.interrupted
            );
        }
    }
}

/// Run a task on its own tokio task so a panic becomes a reported failure
/// instead of taking the worker down.
async fn run_task(ctx: Arc<WorkerContext>, task: SyncTask) -> TaskReport {
    let id = task.item.id.clone();
    let path = task.path.clone();
    let result = match tokio::spawn(process_task(ctx, task)).await {
        Ok(result) => result,
        Err(e) => Err(SyncError::Worker(e.to_string())),
    };
    TaskReport { id, path, result }
}

/// Fetch → normalize → commit. Returns the committed size in bytes.
async fn process_task(ctx: Arc<WorkerContext>, task: SyncTask) -> Result<usize, SyncError> {
    let scratch = tempfile::Builder::new()
        .prefix("photos-backup-")
        .tempdir()
        .map_err(SyncError::Scratch)?;
    let local = scratch.path().join(&task.filename);

    match ctx
        .remote
        .fetch(&task.item, ctx.size, &local)
        .await
        .map_err(SyncError::Fetch)?
    {
        FetchOutcome::Fetched { bytes } => {
            tracing::debug!(id = %task.item.id, size_bytes = bytes, "fetched");
        }
        FetchOutcome::Unavailable => return Err(SyncError::Unavailable(ctx.size.as_str())),
    }

    let normalize_path = local.clone();
    let kind = task.item.kind.clone();
    let captured = task.captured;
    let set_exif = ctx.set_exif_datetime;
    tokio::task::spawn_blocking(move || {
        normalize::normalize(&normalize_path, &kind, &captured, set_exif)
    })
    .await
    .map_err(|e| SyncError::Worker(e.to_string()))?
    .map_err(SyncError::Normalize)?;

    let data = tokio::fs::read(&local).await.map_err(SyncError::Scratch)?;
    let size = data.len();
    ctx.storage
        .write(&task.path, data)
        .await
        .map_err(SyncError::Write)?;
    Ok(size)
}

fn log_summary(summary: &SyncSummary, dry_run: bool, elapsed: Duration) {
    if dry_run {
        tracing::info!("── Dry Run Summary ──");
        tracing::info!(
            "  {} items would be synced, {} already synced, {} skipped",
            summary.would_sync,
            summary.already_synced,
            summary.skipped
        );
    } else {
        tracing::info!("── Summary ──");
        tracing::info!(
            "  {} enumerated, {} skipped, {} already synced",
            summary.enumerated,
            summary.skipped,
            summary.already_synced
        );
        tracing::info!(
            "  {} committed, {} failed, {} interrupted",
            summary.committed,
            summary.failed,
            summary.interrupted
        );
    }
    tracing::info!("  elapsed: {}", format_duration(elapsed));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::DateTime;

    use crate::remote::{MediaKind, MediaVersion, RemoteError, RemoteItem};
    use crate::storage::StorageError;

    #[derive(Default)]
    struct FakeRemote {
        items: Vec<RemoteItem>,
        fail_auth: bool,
        fail_fetch: HashSet<String>,
        /// Write a partial file, then report an error.
        fail_after_write: HashSet<String>,
        /// Put a directory where the file should be, so normalizing fails.
        fetch_directory: HashSet<String>,
        fetch_delay: Duration,
        fetches: AtomicUsize,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
        scratch_dirs: std::sync::Mutex<Vec<PathBuf>>,
    }

    impl FakeRemote {
        fn fetch_into(
            &self,
            item: &RemoteItem,
            size: SizeClass,
            dest: &Path,
        ) -> Result<FetchOutcome, RemoteError> {
            let fetch_error = || RemoteError::Fetch {
                id: item.id.clone(),
                reason: "HTTP 500".into(),
            };
            if self.fail_fetch.contains(&item.id) {
                return Err(fetch_error());
            }
            if self.fail_after_write.contains(&item.id) {
                std::fs::write(dest, b"trunc").unwrap();
                return Err(fetch_error());
            }
            if self.fetch_directory.contains(&item.id) {
                std::fs::create_dir(dest).unwrap();
                std::fs::write(dest.join("inner"), b"x").unwrap();
                return Ok(FetchOutcome::Fetched { bytes: 1 });
            }
            if !item.versions.contains_key(&size) {
                return Ok(FetchOutcome::Unavailable);
            }
            let body = match (&item.kind, item.extension.as_deref()) {
                (MediaKind::Image, Some("HEIC")) => b"\0\0\0\x18ftypheic\0\0\0\0".to_vec(),
                (MediaKind::Image, _) => super::exif::tiny_jpeg(),
                _ => b"movie bytes".to_vec(),
            };
            std::fs::write(dest, &body).unwrap();
            Ok(FetchOutcome::Fetched {
                bytes: body.len() as u64,
            })
        }

        fn peak(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteSession for FakeRemote {
        async fn authenticate(&self) -> Result<(), RemoteError> {
            if self.fail_auth {
                return Err(RemoteError::Auth("session expired".into()));
            }
            Ok(())
        }

        async fn list_items(&self, _collection: &str) -> Result<Vec<RemoteItem>, RemoteError> {
            Ok(self.items.clone())
        }

        async fn fetch(
            &self,
            item: &RemoteItem,
            size: SizeClass,
            dest: &Path,
        ) -> Result<FetchOutcome, RemoteError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(dir) = dest.parent() {
                self.scratch_dirs.lock().unwrap().push(dir.to_path_buf());
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            let outcome = self.fetch_into(item, size, dest);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    #[derive(Default)]
    struct MemoryStorage {
        objects: std::sync::Mutex<HashMap<String, Vec<u8>>>,
        fail_exists: HashSet<String>,
        exists_calls: AtomicUsize,
        writes: AtomicUsize,
    }

    impl MemoryStorage {
        fn with_object(path: &str) -> Self {
            let storage = Self::default();
            storage
                .objects
                .lock()
                .unwrap()
                .insert(path.to_string(), b"old".to_vec());
            storage
        }

        fn get(&self, path: &str) -> Option<Vec<u8>> {
            self.objects.lock().unwrap().get(path).cloned()
        }

        fn calls(&self) -> usize {
            self.exists_calls.load(Ordering::SeqCst) + self.writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StorageBackend for MemoryStorage {
        async fn exists(&self, path: &str) -> Result<bool, StorageError> {
            self.exists_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_exists.contains(path) {
                return Err(StorageError::HttpStatus {
                    operation: "exists",
                    status: 403,
                    message: "denied".into(),
                });
            }
            Ok(self.objects.lock().unwrap().contains_key(path))
        }

        async fn write(&self, path: &str, data: Vec<u8>) -> Result<(), StorageError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.objects.lock().unwrap().insert(path.to_string(), data);
            Ok(())
        }

        fn describe(&self) -> String {
            "memory".into()
        }
    }

    fn image(id: &str, name: &str, captured: &str) -> RemoteItem {
        let mut versions = HashMap::new();
        versions.insert(
            SizeClass::Original,
            MediaVersion {
                url: format!("https://example.com/{}", id),
                checksum: String::new(),
                size: 0,
            },
        );
        RemoteItem {
            id: id.into(),
            filename: Some(name.into()),
            kind: MediaKind::Image,
            captured: Some(DateTime::parse_from_rfc3339(captured).unwrap()),
            extension: None,
            versions,
        }
    }

    fn numbered_images(n: usize, captured: &str) -> Vec<RemoteItem> {
        (0..n)
            .map(|i| image(&format!("A{}", i), &format!("IMG_{}.JPG", i), captured))
            .collect()
    }

    fn config() -> SyncConfig {
        SyncConfig {
            collection: "All Photos".into(),
            size: SizeClass::Original,
            concurrency: 3,
            set_exif_datetime: true,
            dry_run: false,
            no_progress_bar: true,
        }
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn engine(
        remote: Arc<FakeRemote>,
        storage: Arc<MemoryStorage>,
        config: SyncConfig,
    ) -> SyncEngine {
        SyncEngine::new(remote, storage, config, CancellationToken::new()).with_time_zone(utc())
    }

    #[tokio::test]
    async fn test_new_image_committed_with_exif_tag() {
        let remote = Arc::new(FakeRemote {
            items: vec![image("A1", "IMG_0001.JPG", "2023-05-04T10:00:00-07:00")],
            ..Default::default()
        });
        let storage = Arc::new(MemoryStorage::default());
        let mut engine = SyncEngine::new(
            remote,
            storage.clone(),
            config(),
            CancellationToken::new(),
        )
        .with_time_zone(FixedOffset::west_opt(7 * 3600).unwrap());

        let summary = engine.run().await.unwrap();
        assert_eq!(engine.phase(), SyncPhase::Done);
        assert_eq!(summary.committed, 1);
        assert_eq!(summary.failed, 0);

        let bytes = storage.get("2023/05/04/IMG_0001.JPG").expect("object written");
        let dir = tempfile::tempdir().unwrap();
        let copy = dir.path().join("check.jpg");
        std::fs::write(&copy, bytes).unwrap();
        assert_eq!(
            super::exif::get_datetime_original(&copy).unwrap().as_deref(),
            Some("2023:05:04 10:00:00")
        );
    }

    #[tokio::test]
    async fn test_unsupported_kind_never_touches_backend() {
        let mut audio = image("S1", "memo.m4a", "2023-01-01T00:00:00+00:00");
        audio.kind = MediaKind::Other("audio".into());
        let remote = Arc::new(FakeRemote {
            items: vec![audio],
            ..Default::default()
        });
        let storage = Arc::new(MemoryStorage::default());
        let summary = engine(remote.clone(), storage.clone(), config())
            .run()
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(storage.calls(), 0);
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_existing_destination_not_fetched_or_written() {
        let remote = Arc::new(FakeRemote {
            items: vec![image("A1", "IMG_0001.JPG", "2023-05-04T17:00:00+00:00")],
            ..Default::default()
        });
        let storage = Arc::new(MemoryStorage::with_object("2023/05/04/IMG_0001.JPG"));
        let summary = engine(remote.clone(), storage.clone(), config())
            .run()
            .await
            .unwrap();
        assert_eq!(summary.already_synced, 1);
        assert_eq!(summary.committed, 0);
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(storage.writes.load(Ordering::SeqCst), 0);
        assert_eq!(storage.get("2023/05/04/IMG_0001.JPG").unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_second_run_is_a_noop() {
        let items = numbered_images(6, "2021-03-03T08:00:00+00:00");
        let remote = Arc::new(FakeRemote {
            items,
            ..Default::default()
        });
        let storage = Arc::new(MemoryStorage::default());

        let first = engine(remote.clone(), storage.clone(), config())
            .run()
            .await
            .unwrap();
        assert_eq!(first.committed, 6);
        let writes_after_first = storage.writes.load(Ordering::SeqCst);

        let second = engine(remote, storage.clone(), config()).run().await.unwrap();
        assert_eq!(second.already_synced, 6);
        assert_eq!(second.committed, 0);
        assert_eq!(storage.writes.load(Ordering::SeqCst), writes_after_first);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_siblings() {
        let items = numbered_images(5, "2022-02-02T02:00:00+00:00");
        let remote = Arc::new(FakeRemote {
            items,
            fail_fetch: HashSet::from(["A2".to_string()]),
            ..Default::default()
        });
        let storage = Arc::new(MemoryStorage::default());
        let summary = engine(remote, storage.clone(), config()).run().await.unwrap();
        assert_eq!(summary.dispatched, 5);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.committed, summary.dispatched - summary.failed);
        assert!(storage.get("2022/02/02/IMG_2.JPG").is_none());
        assert!(storage.get("2022/02/02/IMG_4.JPG").is_some());
    }

    #[tokio::test]
    async fn test_exists_error_counts_as_failed_and_is_not_dispatched() {
        let remote = Arc::new(FakeRemote {
            items: vec![
                image("A1", "a.jpg", "2020-01-01T00:00:00+00:00"),
                image("A2", "b.jpg", "2020-01-01T00:00:00+00:00"),
            ],
            ..Default::default()
        });
        let storage = Arc::new(MemoryStorage {
            fail_exists: HashSet::from(["2020/01/01/a.jpg".to_string()]),
            ..Default::default()
        });
        let summary = engine(remote.clone(), storage.clone(), config())
            .run()
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.dispatched, 1);
        assert_eq!(summary.committed, 1);
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_size_is_a_failure() {
        let mut item = image("A1", "a.jpg", "2020-01-01T00:00:00+00:00");
        item.versions.clear();
        let remote = Arc::new(FakeRemote {
            items: vec![item],
            ..Default::default()
        });
        let storage = Arc::new(MemoryStorage::default());
        let summary = engine(remote, storage.clone(), config()).run().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(storage.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal() {
        let remote = Arc::new(FakeRemote {
            fail_auth: true,
            ..Default::default()
        });
        let storage = Arc::new(MemoryStorage::default());
        let mut engine = engine(remote, storage.clone(), config());
        let err = engine.run().await.unwrap_err();
        assert!(err.to_string().contains("session expired"));
        assert_eq!(engine.phase(), SyncPhase::Failed);
        assert_eq!(storage.calls(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_fetches_and_writes_nothing() {
        let remote = Arc::new(FakeRemote {
            items: vec![
                image("A1", "a.jpg", "2020-01-01T00:00:00+00:00"),
                image("A2", "b.jpg", "2020-01-01T00:00:00+00:00"),
            ],
            ..Default::default()
        });
        let storage = Arc::new(MemoryStorage::with_object("2020/01/01/b.jpg"));
        let summary = engine(
            remote.clone(),
            storage.clone(),
            SyncConfig {
                dry_run: true,
                ..config()
            },
        )
        .run()
        .await
        .unwrap();
        assert_eq!(summary.would_sync, 1);
        assert_eq!(summary.already_synced, 1);
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(storage.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_nothing() {
        let remote = Arc::new(FakeRemote {
            items: vec![image("A1", "a.jpg", "2020-01-01T00:00:00+00:00")],
            ..Default::default()
        });
        let storage = Arc::new(MemoryStorage::default());
        let token = CancellationToken::new();
        token.cancel();
        let summary = SyncEngine::new(remote.clone(), storage.clone(), config(), token)
            .with_time_zone(utc())
            .run()
            .await
            .unwrap();
        assert_eq!(summary.interrupted, 1);
        assert_eq!(summary.committed, 0);
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_syncs() {
        let remote = Arc::new(FakeRemote {
            items: vec![image("V1", "clip.mov", "2020-01-01T00:00:00+00:00")],
            ..Default::default()
        });
        let storage = Arc::new(MemoryStorage::default());
        let summary = engine(
            remote,
            storage.clone(),
            SyncConfig {
                concurrency: 0,
                ..config()
            },
        )
        .run()
        .await
        .unwrap();
        assert_eq!(summary.committed, 1);
        assert!(storage.get("2020/01/01/clip.mov").is_some());
    }

    #[tokio::test]
    async fn test_unnamed_heic_commits_under_hinted_extension() {
        let mut heic = image("AeB3+xK9", "", "2020-01-01T00:00:00+00:00");
        heic.filename = None;
        heic.extension = Some("HEIC".into());
        let remote = Arc::new(FakeRemote {
            items: vec![heic],
            ..Default::default()
        });
        let storage = Arc::new(MemoryStorage::default());

        let first = engine(remote.clone(), storage.clone(), config())
            .run()
            .await
            .unwrap();
        assert_eq!(first.committed, 1);
        assert_eq!(first.failed, 0);
        let stored = storage.get("2020/01/01/AeB3_xK9.HEIC").expect("object written");
        assert!(stored.starts_with(b"\0\0\0\x18ftypheic"));

        let second = engine(remote, storage, config()).run().await.unwrap();
        assert_eq!(second.already_synced, 1);
    }

    #[tokio::test]
    async fn test_pool_width_bounds_in_flight_fetches() {
        for width in [1, 3] {
            let remote = Arc::new(FakeRemote {
                items: numbered_images(10, "2022-02-02T02:00:00+00:00"),
                fetch_delay: Duration::from_millis(20),
                ..Default::default()
            });
            let storage = Arc::new(MemoryStorage::default());
            let summary = engine(
                remote.clone(),
                storage,
                SyncConfig {
                    concurrency: width,
                    ..config()
                },
            )
            .run()
            .await
            .unwrap();
            assert_eq!(summary.committed, 10);
            assert_eq!(remote.peak(), width, "width {}", width);
        }
    }

    #[tokio::test]
    async fn test_scratch_removed_on_every_exit_path() {
        let mut items = numbered_images(4, "2020-01-01T00:00:00+00:00");
        items[3].versions.clear();
        let remote = Arc::new(FakeRemote {
            items,
            fail_fetch: HashSet::from(["A0".to_string()]),
            fail_after_write: HashSet::from(["A1".to_string()]),
            fetch_directory: HashSet::from(["A2".to_string()]),
            ..Default::default()
        });
        let storage = Arc::new(MemoryStorage::default());
        let summary = engine(remote.clone(), storage, config()).run().await.unwrap();
        assert_eq!(summary.failed, 4);
        assert_eq!(summary.committed, 0);

        let dirs = remote.scratch_dirs.lock().unwrap().clone();
        assert_eq!(dirs.len(), 4);
        for dir in &dirs {
            assert!(!dir.exists(), "scratch {} left behind", dir.display());
        }
        let unique: HashSet<_> = dirs.iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[tokio::test]
    async fn test_scratch_removed_after_commit() {
        let remote = Arc::new(FakeRemote {
            items: numbered_images(2, "2020-01-01T00:00:00+00:00"),
            ..Default::default()
        });
        let storage = Arc::new(MemoryStorage::default());
        let summary = engine(remote.clone(), storage, config()).run().await.unwrap();
        assert_eq!(summary.committed, 2);
        for dir in remote.scratch_dirs.lock().unwrap().iter() {
            assert!(!dir.exists(), "scratch {} left behind", dir.display());
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 05s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 02m 05s");
    }

    #[test]
    fn test_progress_bar_hidden_when_disabled() {
        assert!(create_progress_bar(true, 10).is_hidden());
    }
}
