//! The durable (or in-memory) work queue: dedup, next-to-process selection,
//! and job bookkeeping.

use std::path::PathBuf;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::Mutex;

use crate::base_uri::BaseUriCollection;
use crate::error::CrawlError;
use crate::uri::CrawlUri;

/// One job's worth of queue state: its frozen seed set plus every CrawlUri
/// seen so far, in first-insertion order (IndexMap preserves that, giving
/// `getNext` a deterministic FIFO-by-insertion order for free).
#[derive(Clone, serde::Serialize, serde::Deserialize)]
struct JobRecord {
    base_uris: BaseUriCollection,
    entries: IndexMap<String, CrawlUri>,
}

/// The Queue contract (spec.md §4.4): per-job storage of `CrawlUri`,
/// deduplicated by normalized identity, with fair `getNext` selection.
///
/// Implementations must serialize concurrent upserts per key (spec.md §5) —
/// both backends below do so with an internal lock around `add`/`get_next`.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Mints an opaque job id and seeds the queue with a level-0 CrawlUri
    /// for each base URI.
    async fn create_job_id(&self, base_uris: BaseUriCollection) -> Result<String, CrawlError>;

    async fn is_job_id_valid(&self, job_id: &str) -> bool;

    async fn get_base_uris(&self, job_id: &str) -> Option<BaseUriCollection>;

    /// Lookup by normalized identity.
    async fn get(&self, job_id: &str, uri: &str) -> Option<CrawlUri>;

    /// Upsert by identity; replaces any existing record for the same key.
    async fn add(&self, job_id: &str, crawl_uri: CrawlUri) -> Result<(), CrawlError>;

    /// Returns any unprocessed entry, or `None` if the job has none left.
    async fn get_next(&self, job_id: &str) -> Option<CrawlUri>;

    /// Atomically returns the existing entry for `candidate`'s identity, or
    /// inserts and returns `candidate` if none exists. Used by
    /// `Engine::add_uri_to_queue` to guarantee at-most-one CrawlUri per
    /// normalized URI per job even under concurrent callers.
    async fn get_or_insert(&self, job_id: &str, candidate: CrawlUri) -> Result<CrawlUri, CrawlError>;
}

/// A transient, process-local `Queue` backend.
#[derive(Default)]
pub struct InMemoryQueue {
    jobs: Mutex<IndexMap<String, JobRecord>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn seed_entries(base_uris: &BaseUriCollection) -> Result<IndexMap<String, CrawlUri>, CrawlError> {
        let mut entries = IndexMap::new();
        for uri in base_uris.iter() {
            let normalized = CrawlUri::normalize_uri(uri)?;
            let crawl_uri = CrawlUri::new(normalized.clone(), 0, false, None)?;
            entries.insert(normalized, crawl_uri);
        }
        Ok(entries)
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn create_job_id(&self, base_uris: BaseUriCollection) -> Result<String, CrawlError> {
        let entries = Self::seed_entries(&base_uris)?;
        let job_id = format!("job_{}", uuid::Uuid::new_v4().simple());
        self.jobs
            .lock()
            .await
            .insert(job_id.clone(), JobRecord { base_uris, entries });
        Ok(job_id)
    }

    async fn is_job_id_valid(&self, job_id: &str) -> bool {
        self.jobs.lock().await.contains_key(job_id)
    }

    async fn get_base_uris(&self, job_id: &str) -> Option<BaseUriCollection> {
        self.jobs.lock().await.get(job_id).map(|job| job.base_uris.clone())
    }

    async fn get(&self, job_id: &str, uri: &str) -> Option<CrawlUri> {
        self.jobs.lock().await.get(job_id)?.entries.get(uri).cloned()
    }

    async fn add(&self, job_id: &str, crawl_uri: CrawlUri) -> Result<(), CrawlError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| CrawlError::Queue(format!("unknown job id {job_id:?}")))?;
        job.entries.insert(crawl_uri.uri().to_string(), crawl_uri);
        Ok(())
    }

    async fn get_next(&self, job_id: &str) -> Option<CrawlUri> {
        let jobs = self.jobs.lock().await;
        let job = jobs.get(job_id)?;
        job.entries.values().find(|c| !c.processed()).cloned()
    }

    async fn get_or_insert(&self, job_id: &str, candidate: CrawlUri) -> Result<CrawlUri, CrawlError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| CrawlError::Queue(format!("unknown job id {job_id:?}")))?;
        if let Some(existing) = job.entries.get(candidate.uri()) {
            return Ok(existing.clone());
        }
        job.entries.insert(candidate.uri().to_string(), candidate.clone());
        Ok(candidate)
    }
}

/// A persistent `Queue` backend: one JSON document per job under `dir`.
///
/// Chosen over a SQL backend (also valid per spec.md §4.4) because it needs
/// no external service to demonstrate job resumability across restarts.
pub struct FileQueue {
    dir: PathBuf,
    cache: Mutex<IndexMap<String, JobRecord>>,
}

impl FileQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(IndexMap::new()),
        }
    }

    fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    async fn load(&self, job_id: &str) -> Option<JobRecord> {
        if let Some(record) = self.cache.lock().await.get(job_id) {
            return Some(record.clone());
        }
        let bytes = tokio::fs::read(self.path_for(job_id)).await.ok()?;
        let record: JobRecord = serde_json::from_slice(&bytes).ok()?;
        self.cache.lock().await.insert(job_id.to_string(), record.clone());
        Some(record)
    }

    async fn store(&self, job_id: &str, record: JobRecord) -> Result<(), CrawlError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CrawlError::Queue(e.to_string()))?;
        let bytes = serde_json::to_vec(&record).map_err(|e| CrawlError::Queue(e.to_string()))?;
        tokio::fs::write(self.path_for(job_id), bytes)
            .await
            .map_err(|e| CrawlError::Queue(e.to_string()))?;
        self.cache.lock().await.insert(job_id.to_string(), record);
        Ok(())
    }
}

#[async_trait]
impl Queue for FileQueue {
    async fn create_job_id(&self, base_uris: BaseUriCollection) -> Result<String, CrawlError> {
        let entries = InMemoryQueue::seed_entries(&base_uris)?;
        let job_id = format!("job_{}", uuid::Uuid::new_v4().simple());
        self.store(&job_id, JobRecord { base_uris, entries }).await?;
        Ok(job_id)
    }

    async fn is_job_id_valid(&self, job_id: &str) -> bool {
        self.load(job_id).await.is_some()
    }

    async fn get_base_uris(&self, job_id: &str) -> Option<BaseUriCollection> {
        self.load(job_id).await.map(|job| job.base_uris)
    }

    async fn get(&self, job_id: &str, uri: &str) -> Option<CrawlUri> {
        self.load(job_id).await?.entries.get(uri).cloned()
    }

    async fn add(&self, job_id: &str, crawl_uri: CrawlUri) -> Result<(), CrawlError> {
        let mut record = self
            .load(job_id)
            .await
            .ok_or_else(|| CrawlError::Queue(format!("unknown job id {job_id:?}")))?;
        record.entries.insert(crawl_uri.uri().to_string(), crawl_uri);
        self.store(job_id, record).await
    }

    async fn get_next(&self, job_id: &str) -> Option<CrawlUri> {
        let record = self.load(job_id).await?;
        record.entries.values().find(|c| !c.processed()).cloned()
    }

    async fn get_or_insert(&self, job_id: &str, candidate: CrawlUri) -> Result<CrawlUri, CrawlError> {
        let mut record = self
            .load(job_id)
            .await
            .ok_or_else(|| CrawlError::Queue(format!("unknown job id {job_id:?}")))?;
        if let Some(existing) = record.entries.get(candidate.uri()) {
            return Ok(existing.clone());
        }
        record.entries.insert(candidate.uri().to_string(), candidate.clone());
        self.store(job_id, record).await?;
        Ok(candidate)
    }
}

/// Convenience constructor shared by both backends' `AddUriToQueue` path:
/// builds a child CrawlUri at `found_on.level() + 1` with `found_on.uri()`
/// as parent.
pub(crate) fn child_of(uri: &str, found_on: &CrawlUri, processed: bool) -> Result<CrawlUri, CrawlError> {
    let normalized = CrawlUri::normalize_uri(uri)?;
    CrawlUri::new(normalized, found_on.level() + 1, processed, Some(found_on.uri().to_string()))
}
