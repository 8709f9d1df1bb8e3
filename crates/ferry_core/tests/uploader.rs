use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use ferry_core::{
    BackoffConfig, BlockClient, BlockError, Error, FileResumeStore, MemoryBlockClient,
    ProgressReporter, ResumeLocation, ResumeRecord, ResumeStateStore, UploadFailure,
    UploadOptions, Uploader,
};

type StageHook = Box<dyn Fn(usize) -> Option<BlockError> + Send + Sync>;

/// Wraps a [`MemoryBlockClient`] and injects failures by stage call number.
struct FlakyClient {
    inner: Arc<MemoryBlockClient>,
    calls: AtomicUsize,
    fail_stage: StageHook,
    fail_commit: AtomicBool,
    attempted: Mutex<Vec<String>>,
    committed: Mutex<Vec<String>>,
    cancel_after: Option<(usize, CancellationToken)>,
    reporter: OnceLock<ProgressReporter>,
    observed: Mutex<Vec<f64>>,
}

impl FlakyClient {
    fn new(inner: Arc<MemoryBlockClient>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            fail_stage: Box::new(|_| None),
            fail_commit: AtomicBool::new(false),
            attempted: Mutex::new(Vec::new()),
            committed: Mutex::new(Vec::new()),
            cancel_after: None,
            reporter: OnceLock::new(),
            observed: Mutex::new(Vec::new()),
        }
    }

    fn failing_stage(mut self, hook: impl Fn(usize) -> Option<BlockError> + Send + Sync + 'static) -> Self {
        self.fail_stage = Box::new(hook);
        self
    }

    fn failing_commit(self) -> Self {
        self.fail_commit.store(true, Ordering::SeqCst);
        self
    }

    fn cancelling_after(mut self, successes: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((successes, token));
        self
    }

    fn attempted(&self) -> Vec<String> {
        self.attempted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlockClient for FlakyClient {
    async fn stage_block(
        &self,
        object_name: &str,
        block_id: &ferry_core::BlockId,
        bytes: Bytes,
    ) -> Result<(), BlockError> {
        if let Some(reporter) = self.reporter.get() {
            self.observed.lock().unwrap().push(reporter.percentage());
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.attempted.lock().unwrap().push(block_id.to_string());
        if let Some(e) = (self.fail_stage)(call) {
            return Err(e);
        }
        self.inner.stage_block(object_name, block_id, bytes).await?;

        if let Some((successes, token)) = &self.cancel_after {
            if self.inner.stage_calls() >= *successes {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn commit_block_list(
        &self,
        object_name: &str,
        block_ids: &[ferry_core::BlockId],
    ) -> Result<(), BlockError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(BlockError::fatal("commit rejected"));
        }
        *self.committed.lock().unwrap() = block_ids.iter().map(|b| b.to_string()).collect();
        self.inner.commit_block_list(object_name, block_ids).await
    }
}

/// Counts saves on top of a file store.
struct CountingStore {
    inner: FileResumeStore,
    saves: AtomicUsize,
}

#[async_trait]
impl ResumeStateStore for CountingStore {
    async fn save(&self, record: &ResumeRecord) -> ferry_core::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(record).await
    }

    async fn load(&self, object_name: &str) -> Option<ResumeRecord> {
        self.inner.load(object_name).await
    }

    async fn clear(&self, object_name: &str) -> ferry_core::Result<()> {
        self.inner.clear(object_name).await
    }
}

fn transient() -> BlockError {
    BlockError::transient("connection reset by peer")
}

fn options() -> UploadOptions {
    UploadOptions {
        chunk_size: 10,
        max_retries: 3,
        backoff: BackoffConfig {
            base_delay_ms: 1,
            max_delay_ms: 4,
        },
        ..UploadOptions::default()
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    source: PathBuf,
    data: Vec<u8>,
    store: Arc<FileResumeStore>,
    memory: Arc<MemoryBlockClient>,
}

impl Fixture {
    fn new(len: usize) -> Self {
        Self::with_location(len, |dir| ResumeLocation::PerObject(dir.join("state")))
    }

    fn with_location(len: usize, location: impl Fn(&Path) -> ResumeLocation) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
        std::fs::write(&source, &data).unwrap();
        let store = Arc::new(FileResumeStore::new(location(dir.path())));
        Self {
            _dir: dir,
            source,
            data,
            store,
            memory: Arc::new(MemoryBlockClient::new()),
        }
    }

    fn uploader(&self, client: Arc<dyn BlockClient>) -> Uploader {
        Uploader::new(client, self.store.clone(), options()).unwrap()
    }

    fn plain_uploader(&self) -> Uploader {
        self.uploader(self.memory.clone())
    }
}

#[tokio::test]
async fn commits_chunks_in_staging_order_and_cleans_up() {
    let f = Fixture::new(95);
    let client = Arc::new(FlakyClient::new(f.memory.clone()));
    let mut uploader = f.uploader(client.clone());
    let progress = uploader.progress();

    let summary = uploader.upload(&f.source, "videos/a.bin").await.unwrap();

    assert_eq!(summary.bytes, 95);
    assert_eq!(summary.blocks, 10);
    assert_eq!(summary.resumed_from, 0);
    assert_eq!(client.attempted(), *client.committed.lock().unwrap());
    assert_eq!(f.memory.committed("videos/a.bin"), Some(Bytes::from(f.data.clone())));
    assert_eq!(progress.percentage(), 100.0);
    assert!(progress.is_complete());

    assert!(!f.source.exists());
    assert_eq!(f.store.load("videos/a.bin").await, None);
    assert!(!f.store.path_for("videos/a.bin").exists());
}

#[tokio::test]
async fn resume_after_interruption_skips_staged_chunks() {
    let f = Fixture::new(95);
    let crashing = Arc::new(
        FlakyClient::new(f.memory.clone())
            .failing_stage(|call| (call >= 4).then(|| BlockError::fatal("process killed"))),
    );

    let err = f
        .uploader(crashing)
        .upload(&f.source, "a.bin")
        .await
        .unwrap_err();
    match err {
        Error::Upload(e) => {
            assert_eq!(e.uploaded_size, 40);
            assert!(matches!(e.cause, UploadFailure::StageFailed { offset: 40, .. }));
        }
        e => panic!("expected upload error, got {e:?}"),
    }

    let record = f.store.load("a.bin").await.expect("record kept after failure");
    assert_eq!(record.uploaded_size, 40);
    assert_eq!(record.block_ids.len(), 4);
    assert!(f.source.exists());

    let before = f.memory.stage_calls();
    let summary = f.plain_uploader().upload(&f.source, "a.bin").await.unwrap();

    assert_eq!(f.memory.stage_calls() - before, 6);
    assert_eq!(summary.resumed_from, 40);
    assert_eq!(summary.blocks, 10);
    assert_eq!(f.memory.committed("a.bin"), Some(Bytes::from(f.data.clone())));
}

#[tokio::test]
async fn transient_failures_retry_the_same_block() {
    let f = Fixture::new(25);
    let client = Arc::new(
        FlakyClient::new(f.memory.clone()).failing_stage(|call| (call < 2).then(transient)),
    );

    f.uploader(client.clone())
        .upload(&f.source, "a.bin")
        .await
        .unwrap();

    let attempted = client.attempted();
    assert_eq!(attempted.len(), 5);
    assert_eq!(attempted[0], attempted[1]);
    assert_eq!(attempted[1], attempted[2]);
    assert_ne!(attempted[2], attempted[3]);
    assert_eq!(f.memory.committed("a.bin"), Some(Bytes::from(f.data.clone())));
}

#[tokio::test]
async fn retry_counter_resets_per_chunk() {
    let f = Fixture::new(30);
    // every chunk fails three times before it goes through
    let client = Arc::new(
        FlakyClient::new(f.memory.clone()).failing_stage(|call| (call % 4 != 3).then(transient)),
    );

    let summary = f
        .uploader(client.clone())
        .upload(&f.source, "a.bin")
        .await
        .unwrap();

    assert_eq!(summary.blocks, 3);
    assert_eq!(client.attempted().len(), 12);
}

#[tokio::test]
async fn retry_ceiling_aborts_and_keeps_last_checkpoint() {
    let f = Fixture::new(50);
    let client = Arc::new(
        FlakyClient::new(f.memory.clone()).failing_stage(|call| (call >= 2).then(transient)),
    );

    let err = f
        .uploader(client.clone())
        .upload(&f.source, "a.bin")
        .await
        .unwrap_err();

    match err {
        Error::Upload(e) => {
            assert_eq!(e.object_name, "a.bin");
            assert_eq!(e.uploaded_size, 20);
            match e.cause {
                UploadFailure::RetriesExhausted {
                    offset,
                    retries,
                    source,
                    ..
                } => {
                    assert_eq!(offset, 20);
                    assert_eq!(retries, 3);
                    assert!(source.is_transient());
                }
                c => panic!("expected exhausted retries, got {c:?}"),
            }
        }
        e => panic!("expected upload error, got {e:?}"),
    }

    // two good chunks, then one initial attempt plus three retries
    assert_eq!(client.attempted().len(), 2 + 4);
    let record = f.store.load("a.bin").await.unwrap();
    assert_eq!(record.uploaded_size, 20);
    assert_eq!(record.block_ids, client.attempted()[..2].to_vec());
    assert!(f.source.exists());
    assert_eq!(f.memory.committed("a.bin"), None);
}

#[tokio::test]
async fn fatal_stage_error_is_not_retried() {
    let f = Fixture::new(30);
    let client = Arc::new(
        FlakyClient::new(f.memory.clone())
            .failing_stage(|call| (call == 1).then(|| BlockError::fatal("access denied"))),
    );

    let err = f
        .uploader(client.clone())
        .upload(&f.source, "a.bin")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Upload(ferry_core::UploadError {
            cause: UploadFailure::StageFailed { .. },
            ..
        })
    ));
    assert_eq!(client.attempted().len(), 2);
}

#[tokio::test]
async fn mismatched_record_starts_fresh() {
    let f = Fixture::with_location(45, |dir| ResumeLocation::Single(dir.join("upload_state.json")));
    f.store
        .save(&ResumeRecord {
            object_name: "other.bin".into(),
            uploaded_size: 40,
            block_ids: vec!["x".into(), "y".into(), "z".into(), "w".into()],
        })
        .await
        .unwrap();

    let summary = f.plain_uploader().upload(&f.source, "a.bin").await.unwrap();

    assert_eq!(summary.resumed_from, 0);
    assert_eq!(f.memory.stage_calls(), 5);
    assert_eq!(f.memory.committed("a.bin"), Some(Bytes::from(f.data.clone())));
}

#[tokio::test]
async fn inconsistent_record_starts_fresh() {
    let f = Fixture::new(45);
    f.store
        .save(&ResumeRecord {
            object_name: "a.bin".into(),
            uploaded_size: 400,
            block_ids: vec!["x".into()],
        })
        .await
        .unwrap();

    let summary = f.plain_uploader().upload(&f.source, "a.bin").await.unwrap();

    assert_eq!(summary.resumed_from, 0);
    assert_eq!(f.memory.stage_calls(), 5);
}

#[tokio::test]
async fn record_with_too_few_blocks_starts_fresh() {
    let f = Fixture::new(95);
    f.store
        .save(&ResumeRecord {
            object_name: "a.bin".into(),
            uploaded_size: 40,
            block_ids: vec!["x".into()],
        })
        .await
        .unwrap();

    let summary = f.plain_uploader().upload(&f.source, "a.bin").await.unwrap();

    assert_eq!(summary.resumed_from, 0);
    assert_eq!(f.memory.stage_calls(), 10);
    assert_eq!(f.memory.committed("a.bin"), Some(Bytes::from(f.data.clone())));
}

#[tokio::test]
async fn corrupt_record_starts_fresh() {
    let f = Fixture::new(45);
    let path = f.store.path_for("a.bin");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, br#"{"blob_name": "a.bin", "uploaded_"#).unwrap();

    let summary = f.plain_uploader().upload(&f.source, "a.bin").await.unwrap();

    assert_eq!(summary.resumed_from, 0);
    assert_eq!(f.memory.committed("a.bin"), Some(Bytes::from(f.data.clone())));
}

#[tokio::test]
async fn oversized_file_fails_before_any_remote_call() {
    let f = Fixture::new(101);
    let client = Arc::new(FlakyClient::new(f.memory.clone()));
    let mut uploader = f.uploader(client.clone());

    let opts = UploadOptions {
        max_file_size: 100,
        ..options()
    };
    let err = uploader
        .upload_with(&f.source, "a.bin", &opts)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::FileTooLarge { size: 101, max: 100 }));
    assert!(client.attempted().is_empty());
    assert!(f.source.exists());

    // exactly at the limit is fine
    let opts = UploadOptions {
        max_file_size: 101,
        ..options()
    };
    uploader.upload_with(&f.source, "a.bin", &opts).await.unwrap();
}

#[tokio::test]
async fn failed_commit_keeps_source_and_record_then_recommits() {
    let f = Fixture::new(35);
    let client = Arc::new(FlakyClient::new(f.memory.clone()).failing_commit());
    let mut uploader = f.uploader(client.clone());
    let progress = uploader.progress();

    let err = uploader.upload(&f.source, "a.bin").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Upload(ferry_core::UploadError {
            uploaded_size: 35,
            cause: UploadFailure::CommitFailed { blocks: 4, .. },
            ..
        })
    ));
    assert!(f.source.exists());
    let record = f.store.load("a.bin").await.unwrap();
    assert_eq!(record.uploaded_size, 35);
    assert!(progress.percentage() < 100.0);

    let before = f.memory.stage_calls();
    let summary = f.plain_uploader().upload(&f.source, "a.bin").await.unwrap();

    assert_eq!(f.memory.stage_calls(), before);
    assert_eq!(summary.resumed_from, 35);
    assert_eq!(f.memory.committed("a.bin"), Some(Bytes::from(f.data.clone())));
    assert!(!f.source.exists());
    assert_eq!(f.store.load("a.bin").await, None);
}

#[tokio::test]
async fn progress_is_monotonic_and_completes_after_commit() {
    let f = Fixture::new(100);
    let client = Arc::new(FlakyClient::new(f.memory.clone()));
    let mut uploader = f.uploader(client.clone());
    let progress = uploader.progress();
    client.reporter.set(progress.clone()).unwrap();

    assert_eq!(progress.percentage(), 0.0);
    uploader.upload(&f.source, "a.bin").await.unwrap();

    let observed = client.observed.lock().unwrap().clone();
    assert_eq!(observed.len(), 10);
    assert_eq!(observed[0], 0.0);
    assert!(observed.windows(2).all(|w| w[0] <= w[1]));
    assert!(observed.iter().all(|p| *p < 100.0));
    assert_eq!(progress.percentage(), 100.0);
}

#[tokio::test]
async fn cancellation_stops_at_chunk_boundary() {
    let f = Fixture::new(95);
    let token = CancellationToken::new();
    let client = Arc::new(FlakyClient::new(f.memory.clone()).cancelling_after(3, token.clone()));
    let mut uploader = f.uploader(client.clone()).with_cancellation(token);

    let err = uploader.upload(&f.source, "a.bin").await.unwrap_err();

    assert!(matches!(
        err,
        Error::Cancelled {
            uploaded_size: 30,
            ..
        }
    ));
    let record = f.store.load("a.bin").await.unwrap();
    assert_eq!(record.uploaded_size, 30);
    assert_eq!(record.block_ids.len(), 3);
    assert!(f.source.exists());
}

#[tokio::test]
async fn cancellation_interrupts_backoff() {
    let f = Fixture::new(30);
    let token = CancellationToken::new();
    let client = Arc::new(FlakyClient::new(f.memory.clone()).failing_stage(|_| Some(transient())));
    let opts = UploadOptions {
        backoff: BackoffConfig {
            base_delay_ms: 60_000,
            max_delay_ms: 60_000,
        },
        ..options()
    };
    let mut uploader = Uploader::new(client, f.store.clone(), opts)
        .unwrap()
        .with_cancellation(token.clone());

    let cancel = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        token.cancel();
    });
    let err = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        uploader.upload(&f.source, "a.bin"),
    )
    .await
    .expect("cancellation should not wait for the backoff")
    .unwrap_err();
    cancel.await.unwrap();

    assert!(matches!(err, Error::Cancelled { uploaded_size: 0, .. }));
}

#[tokio::test]
async fn checkpoint_interval_batches_saves() {
    let f = Fixture::new(100);
    let store = Arc::new(CountingStore {
        inner: FileResumeStore::new(ResumeLocation::PerObject(f.source.with_extension("state"))),
        saves: AtomicUsize::new(0),
    });
    let opts = UploadOptions {
        checkpoint_interval: 4,
        ..options()
    };
    let mut uploader = Uploader::new(f.memory.clone(), store.clone(), opts).unwrap();

    uploader.upload(&f.source, "a.bin").await.unwrap();

    // after chunks 4 and 8, then the remaining 2 before commit
    assert_eq!(store.saves.load(Ordering::SeqCst), 3);
    assert_eq!(f.memory.committed("a.bin"), Some(Bytes::from(f.data.clone())));
}

#[tokio::test]
async fn empty_file_commits_empty_object() {
    let f = Fixture::new(0);
    let mut uploader = f.plain_uploader();
    let progress = uploader.progress();

    let summary = uploader.upload(&f.source, "empty").await.unwrap();

    assert_eq!(summary.blocks, 0);
    assert_eq!(f.memory.committed("empty"), Some(Bytes::new()));
    assert_eq!(progress.percentage(), 100.0);
    assert!(!f.source.exists());
}

#[tokio::test]
async fn missing_source_is_an_io_error() {
    let f = Fixture::new(10);
    let err = f
        .plain_uploader()
        .upload(&f.source.with_extension("missing"), "a.bin")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(f.memory.stage_calls(), 0);
}
