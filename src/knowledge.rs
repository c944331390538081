//! Vector-store management: store lifecycle, uploads, indexing and listings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::ai_sdk::{BatchStatus, FileRecord, IndexingBatch, VectorStore, VectorStoreApi};
use crate::error::ApiError;

pub const UPLOAD_PURPOSE: &str = "assistants";

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("vector store {store_id} still holds {file_count} file(s); remove them first")]
    NotEmpty { store_id: String, file_count: u64 },

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("could not read {}: {source}", .path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    pub poll: PollConfig,
    /// Upper bound on concurrent file-metadata requests.
    pub metadata_concurrency: usize,
    pub store_list_limit: u32,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            metadata_concurrency: 10,
            store_list_limit: 100,
        }
    }
}

/// One row of a store's file listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEntry {
    Resolved(FileRecord),
    /// Metadata could not be fetched; the file is still a member of the store.
    Unavailable {
        id: String,
        created_at: i64,
        reason: String,
    },
}

impl FileEntry {
    pub fn id(&self) -> &str {
        match self {
            FileEntry::Resolved(record) => &record.id,
            FileEntry::Unavailable { id, .. } => id,
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            FileEntry::Resolved(record) => &record.filename,
            FileEntry::Unavailable { .. } => "<Error>",
        }
    }

    pub fn created_at(&self) -> i64 {
        match self {
            FileEntry::Resolved(record) => record.created_at,
            FileEntry::Unavailable { created_at, .. } => *created_at,
        }
    }
}

pub struct KnowledgeBase {
    api: Arc<dyn VectorStoreApi>,
    config: KnowledgeConfig,
    stores: Mutex<HashMap<String, VectorStore>>,
}

type KbResult<T> = Result<T, KnowledgeError>;

impl KnowledgeBase {
    pub fn new(api: Arc<dyn VectorStoreApi>, config: KnowledgeConfig) -> Self {
        Self {
            api,
            config,
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_store(&self, store_id: &str) -> Option<VectorStore> {
        self.stores.lock().get(store_id).cloned()
    }

    fn remember(&self, store: &VectorStore) {
        self.stores.lock().insert(store.id.clone(), store.clone());
    }

    /// Lists stores and replaces the local cache with the result.
    pub async fn list_stores(&self) -> KbResult<Vec<VectorStore>> {
        let stores = self
            .api
            .list_vector_stores(self.config.store_list_limit)
            .await?;
        let mut cache = self.stores.lock();
        cache.clear();
        for store in &stores {
            cache.insert(store.id.clone(), store.clone());
        }
        tracing::debug!(count = stores.len(), "listed vector stores");
        Ok(stores)
    }

    pub async fn create_store(&self, name: &str) -> KbResult<VectorStore> {
        let store = self.api.create_vector_store(name.trim()).await?;
        tracing::info!(store_id = %store.id, name = store.display_name(), "created vector store");
        self.remember(&store);
        Ok(store)
    }

    pub async fn rename_store(&self, store_id: &str, name: &str) -> KbResult<VectorStore> {
        let store = self.api.update_vector_store(store_id, name.trim()).await?;
        tracing::info!(store_id, name = store.display_name(), "renamed vector store");
        self.remember(&store);
        Ok(store)
    }

    /// Deletes an empty store. A store that still holds files is refused
    /// before any delete request is made.
    pub async fn delete_store(&self, store_id: &str) -> KbResult<bool> {
        let store = match self.cached_store(store_id) {
            Some(store) => store,
            None => {
                let store = self.api.retrieve_vector_store(store_id).await?;
                self.remember(&store);
                store
            }
        };

        if store.file_count > 0 {
            tracing::warn!(store_id, file_count = store.file_count, "refusing to delete non-empty store");
            return Err(KnowledgeError::NotEmpty {
                store_id: store_id.to_string(),
                file_count: store.file_count,
            });
        }

        let deleted = self.api.delete_vector_store(store_id).await?;
        if deleted {
            self.stores.lock().remove(store_id);
        }
        tracing::info!(store_id, deleted, "deleted vector store");
        Ok(deleted)
    }

    pub async fn upload_file(&self, path: &Path) -> KbResult<FileRecord> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(KnowledgeError::FileNotFound(path.to_path_buf())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(KnowledgeError::FileNotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(KnowledgeError::LocalIo {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }

        let contents = tokio::fs::read(path)
            .await
            .map_err(|source| KnowledgeError::LocalIo {
                path: path.to_path_buf(),
                source,
            })?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let bytes = contents.len();
        let record = self
            .api
            .upload_file(&filename, contents, UPLOAD_PURPOSE)
            .await?;
        tracing::info!(file_id = %record.id, %filename, bytes, "uploaded file");
        Ok(record)
    }

    pub async fn index_files(&self, store_id: &str, file_ids: &[String]) -> KbResult<IndexingBatch> {
        let batch = self.api.create_file_batch(store_id, file_ids).await?;
        tracing::info!(store_id, batch_id = %batch.id, files = file_ids.len(), "indexing batch created");
        Ok(batch)
    }

    /// Polls a batch until it reaches a terminal status. Errors on individual
    /// polls are logged and do not end the loop; running out of attempts
    /// yields `TimedOut`.
    pub async fn poll_batch(
        &self,
        store_id: &str,
        batch_id: &str,
        interval: Duration,
        max_attempts: u32,
    ) -> BatchStatus {
        for attempt in 1..=max_attempts {
            match self.api.retrieve_file_batch(store_id, batch_id).await {
                Ok(batch) if batch.status.is_terminal() => {
                    tracing::info!(batch_id, attempt, status = batch.status.as_str(), "batch finished");
                    return batch.status;
                }
                Ok(batch) => {
                    tracing::debug!(batch_id, attempt, status = batch.status.as_str(), "batch pending");
                }
                Err(err) => {
                    tracing::warn!(batch_id, attempt, error = %err, "batch poll failed");
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        tracing::warn!(batch_id, max_attempts, "batch did not finish in time");
        BatchStatus::TimedOut
    }

    /// Lists a store's files with metadata, newest first. Metadata is fetched
    /// concurrently up to `metadata_concurrency`; a failed fetch marks that
    /// file unavailable rather than failing the listing. A missing store lists
    /// as empty.
    pub async fn list_store_files(&self, store_id: &str) -> KbResult<Vec<FileEntry>> {
        let refs = match self.api.list_store_files(store_id).await {
            Ok(refs) => refs,
            Err(ApiError::NotFound { .. }) => {
                tracing::warn!(store_id, "store not found while listing files");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let ids: Vec<String> = refs.iter().map(|file| file.id.clone()).collect();
        let fetched: HashMap<String, Result<FileRecord, ApiError>> =
            futures::stream::iter(ids.into_iter().map(|id| {
                let api = Arc::clone(&self.api);
                async move {
                    let result = api.retrieve_file(&id).await;
                    (id, result)
                }
            }))
            .buffer_unordered(self.config.metadata_concurrency.max(1))
            .collect()
            .await;

        let mut entries: Vec<FileEntry> = refs
            .into_iter()
            .map(|file| match fetched.get(&file.id) {
                Some(Ok(record)) => FileEntry::Resolved(record.clone()),
                Some(Err(err)) => {
                    tracing::warn!(file_id = %file.id, error = %err, "file metadata unavailable");
                    FileEntry::Unavailable {
                        id: file.id,
                        created_at: file.created_at,
                        reason: err.to_string(),
                    }
                }
                None => FileEntry::Unavailable {
                    id: file.id,
                    created_at: file.created_at,
                    reason: "not fetched".to_string(),
                },
            })
            .collect();

        entries.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(entries)
    }

    /// Detaches a file from the store, then deletes the file itself.
    pub async fn remove_file(&self, store_id: &str, file_id: &str) -> KbResult<()> {
        self.api.delete_store_file(store_id, file_id).await?;
        self.api.delete_file(file_id).await?;
        if let Some(store) = self.stores.lock().get_mut(store_id) {
            store.file_count = store.file_count.saturating_sub(1);
        }
        tracing::info!(store_id, file_id, "removed file");
        Ok(())
    }

    /// Upload, index and wait for the batch, reporting each step to `progress`.
    pub async fn add_document<P>(
        &self,
        store_id: &str,
        path: &Path,
        progress: P,
    ) -> KbResult<(FileRecord, BatchStatus)>
    where
        P: Fn(String) + Send + Sync,
    {
        let record = self.upload_file(path).await?;
        progress(format!("Uploaded {} as {}", record.filename, record.id));

        let batch = self
            .index_files(store_id, std::slice::from_ref(&record.id))
            .await?;
        progress(format!("Indexing started (batch {})", batch.id));

        let poll = self.config.poll;
        let status = if batch.status.is_terminal() {
            batch.status
        } else {
            self.poll_batch(store_id, &batch.id, poll.interval, poll.max_attempts)
                .await
        };

        if status == BatchStatus::Completed
            && let Some(store) = self.stores.lock().get_mut(store_id)
        {
            store.file_count += 1;
        }
        progress(format!("Indexing {}", status.as_str()));
        Ok((record, status))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KbRequest {
    ListStores,
    CreateStore { name: String },
    RenameStore { store_id: String, name: String },
    DeleteStore { store_id: String },
    ListFiles { store_id: String },
    AddDocument { store_id: String, path: PathBuf },
    RemoveFile { store_id: String, file_id: String },
}

impl KbRequest {
    pub fn label(&self) -> &'static str {
        match self {
            KbRequest::ListStores => "list stores",
            KbRequest::CreateStore { .. } => "create store",
            KbRequest::RenameStore { .. } => "rename store",
            KbRequest::DeleteStore { .. } => "delete store",
            KbRequest::ListFiles { .. } => "list files",
            KbRequest::AddDocument { .. } => "add document",
            KbRequest::RemoveFile { .. } => "remove file",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum KbEvent {
    Stores(Vec<VectorStore>),
    StoreSaved(VectorStore),
    StoreDeleted { store_id: String },
    Files { store_id: String, files: Vec<FileEntry> },
    DocumentAdded { store_id: String, file: FileRecord, status: BatchStatus },
    FileRemoved { store_id: String, file_id: String },
    Progress(String),
    Failed { operation: &'static str, message: String },
    Done,
}

/// Runs knowledge-base operations off the UI loop and queues their outcomes.
pub struct KnowledgeBridge {
    kb: Arc<KnowledgeBase>,
    tx: mpsc::Sender<KbEvent>,
    rx: mpsc::Receiver<KbEvent>,
    pending: usize,
}

impl KnowledgeBridge {
    pub fn new(kb: Arc<KnowledgeBase>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            kb,
            tx,
            rx,
            pending: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.pending > 0
    }

    pub fn request(&mut self, request: KbRequest) {
        self.pending += 1;
        let kb = Arc::clone(&self.kb);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let operation = request.label();
            let outcome = run_request(&kb, request, &tx).await;
            if let Err(err) = outcome {
                tracing::warn!(operation, error = %err, "knowledge base operation failed");
                let _ = tx
                    .send(KbEvent::Failed {
                        operation,
                        message: err.to_string(),
                    })
                    .await;
            }
            let _ = tx.send(KbEvent::Done).await;
        });
    }

    /// Pops up to `max_items` queued events without blocking.
    pub fn drain_once(&mut self, max_items: usize) -> Vec<KbEvent> {
        let mut events = Vec::new();
        while events.len() < max_items {
            match self.rx.try_recv() {
                Ok(event) => {
                    if event == KbEvent::Done {
                        self.pending = self.pending.saturating_sub(1);
                    }
                    events.push(event);
                }
                Err(_) => break,
            }
        }
        events
    }
}

async fn run_request(
    kb: &KnowledgeBase,
    request: KbRequest,
    tx: &mpsc::Sender<KbEvent>,
) -> KbResult<()> {
    let event = match request {
        KbRequest::ListStores => KbEvent::Stores(kb.list_stores().await?),
        KbRequest::CreateStore { name } => KbEvent::StoreSaved(kb.create_store(&name).await?),
        KbRequest::RenameStore { store_id, name } => {
            KbEvent::StoreSaved(kb.rename_store(&store_id, &name).await?)
        }
        KbRequest::DeleteStore { store_id } => {
            kb.delete_store(&store_id).await?;
            KbEvent::StoreDeleted { store_id }
        }
        KbRequest::ListFiles { store_id } => {
            let files = kb.list_store_files(&store_id).await?;
            KbEvent::Files { store_id, files }
        }
        KbRequest::AddDocument { store_id, path } => {
            let progress_tx = tx.clone();
            let (file, status) = kb
                .add_document(&store_id, &path, move |message| {
                    let _ = progress_tx.try_send(KbEvent::Progress(message));
                })
                .await?;
            KbEvent::DocumentAdded {
                store_id,
                file,
                status,
            }
        }
        KbRequest::RemoveFile { store_id, file_id } => {
            kb.remove_file(&store_id, &file_id).await?;
            KbEvent::FileRemoved { store_id, file_id }
        }
    };
    let _ = tx.send(event).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_sdk::StoreFileRef;
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeStores {
        stores: Mutex<HashMap<String, VectorStore>>,
        store_files: Mutex<Vec<StoreFileRef>>,
        failing_files: HashSet<String>,
        missing_store: bool,
        batch_statuses: Mutex<VecDeque<Result<BatchStatus, ApiError>>>,
        fetch_delay: Duration,
        batch_calls: AtomicU32,
        delete_store_calls: AtomicU32,
        delete_file_calls: AtomicU32,
        detach_calls: AtomicU32,
        uploads: AtomicU32,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    fn store(id: &str, file_count: u64) -> VectorStore {
        VectorStore {
            id: id.into(),
            name: Some(format!("store {id}")),
            status: "completed".into(),
            file_count,
            usage_bytes: 0,
        }
    }

    #[async_trait]
    impl VectorStoreApi for FakeStores {
        async fn list_vector_stores(&self, _limit: u32) -> Result<Vec<VectorStore>, ApiError> {
            Ok(self.stores.lock().values().cloned().collect())
        }

        async fn retrieve_vector_store(&self, store_id: &str) -> Result<VectorStore, ApiError> {
            self.stores
                .lock()
                .get(store_id)
                .cloned()
                .ok_or_else(|| ApiError::NotFound {
                    message: store_id.into(),
                })
        }

        async fn create_vector_store(&self, name: &str) -> Result<VectorStore, ApiError> {
            let mut created = store("vs_new", 0);
            created.name = Some(name.into());
            self.stores.lock().insert(created.id.clone(), created.clone());
            Ok(created)
        }

        async fn update_vector_store(&self, store_id: &str, name: &str) -> Result<VectorStore, ApiError> {
            let mut stores = self.stores.lock();
            let entry = stores.get_mut(store_id).ok_or_else(|| ApiError::NotFound {
                message: store_id.into(),
            })?;
            entry.name = Some(name.into());
            Ok(entry.clone())
        }

        async fn delete_vector_store(&self, store_id: &str) -> Result<bool, ApiError> {
            self.delete_store_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.stores.lock().remove(store_id).is_some())
        }

        async fn upload_file(
            &self,
            filename: &str,
            contents: Vec<u8>,
            purpose: &str,
        ) -> Result<FileRecord, ApiError> {
            assert_eq!(purpose, UPLOAD_PURPOSE);
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(FileRecord {
                id: "file_up".into(),
                filename: filename.into(),
                created_at: 1,
                bytes: Some(contents.len() as u64),
            })
        }

        async fn retrieve_file(&self, file_id: &str) -> Result<FileRecord, ApiError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.fetch_delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing_files.contains(file_id) {
                return Err(ApiError::from_status(500, None, "metadata backend down"));
            }
            let created_at = file_id
                .trim_start_matches("file_")
                .parse::<i64>()
                .unwrap_or_default();
            Ok(FileRecord {
                id: file_id.into(),
                filename: format!("{file_id}.pdf"),
                created_at,
                bytes: None,
            })
        }

        async fn delete_file(&self, _file_id: &str) -> Result<bool, ApiError> {
            self.delete_file_calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn create_file_batch(
            &self,
            _store_id: &str,
            _file_ids: &[String],
        ) -> Result<IndexingBatch, ApiError> {
            Ok(IndexingBatch {
                id: "vsfb_1".into(),
                status: BatchStatus::InProgress,
            })
        }

        async fn retrieve_file_batch(
            &self,
            _store_id: &str,
            batch_id: &str,
        ) -> Result<IndexingBatch, ApiError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            let status = self
                .batch_statuses
                .lock()
                .pop_front()
                .unwrap_or(Ok(BatchStatus::InProgress))?;
            Ok(IndexingBatch {
                id: batch_id.into(),
                status,
            })
        }

        async fn list_store_files(&self, store_id: &str) -> Result<Vec<StoreFileRef>, ApiError> {
            if self.missing_store {
                return Err(ApiError::NotFound {
                    message: store_id.into(),
                });
            }
            Ok(self.store_files.lock().clone())
        }

        async fn delete_store_file(&self, _store_id: &str, _file_id: &str) -> Result<bool, ApiError> {
            self.detach_calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn kb_with(fake: Arc<FakeStores>) -> KnowledgeBase {
        KnowledgeBase::new(
            fake,
            KnowledgeConfig {
                poll: PollConfig {
                    interval: Duration::from_millis(1),
                    max_attempts: 5,
                },
                ..KnowledgeConfig::default()
            },
        )
    }

    fn statuses(seq: Vec<Result<BatchStatus, ApiError>>) -> Mutex<VecDeque<Result<BatchStatus, ApiError>>> {
        Mutex::new(seq.into_iter().collect())
    }

    #[tokio::test]
    async fn non_empty_store_is_not_deleted() {
        let fake = Arc::new(FakeStores::default());
        fake.stores.lock().insert("vs_1".into(), store("vs_1", 3));
        let kb = kb_with(fake.clone());
        kb.list_stores().await.unwrap();

        let err = kb.delete_store("vs_1").await.unwrap_err();
        assert!(matches!(err, KnowledgeError::NotEmpty { file_count: 3, .. }));
        assert_eq!(fake.delete_store_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn created_and_renamed_stores_are_cached() {
        let fake = Arc::new(FakeStores::default());
        let kb = kb_with(fake.clone());

        let created = kb.create_store("  Reports ").await.unwrap();
        assert_eq!(created.name.as_deref(), Some("Reports"));
        assert!(kb.cached_store("vs_new").is_some());

        let renamed = kb.rename_store("vs_new", "Archive").await.unwrap();
        assert_eq!(renamed.display_name(), "Archive");
        assert_eq!(
            kb.cached_store("vs_new").unwrap().name.as_deref(),
            Some("Archive")
        );
        assert_eq!(kb.list_stores().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn uncached_store_is_checked_before_delete() {
        let fake = Arc::new(FakeStores::default());
        fake.stores.lock().insert("vs_2".into(), store("vs_2", 1));
        fake.stores.lock().insert("vs_3".into(), store("vs_3", 0));
        let kb = kb_with(fake.clone());

        assert!(matches!(
            kb.delete_store("vs_2").await,
            Err(KnowledgeError::NotEmpty { .. })
        ));
        assert_eq!(fake.delete_store_calls.load(Ordering::SeqCst), 0);

        assert!(kb.delete_store("vs_3").await.unwrap());
        assert_eq!(fake.delete_store_calls.load(Ordering::SeqCst), 1);
        assert!(kb.cached_store("vs_3").is_none());
    }

    #[tokio::test]
    async fn poll_returns_first_terminal_status() {
        let fake = Arc::new(FakeStores {
            batch_statuses: statuses(vec![
                Ok(BatchStatus::InProgress),
                Ok(BatchStatus::InProgress),
                Ok(BatchStatus::Completed),
            ]),
            ..FakeStores::default()
        });
        let kb = kb_with(fake.clone());
        let status = kb
            .poll_batch("vs_1", "vsfb_1", Duration::from_millis(1), 5)
            .await;
        assert_eq!(status, BatchStatus::Completed);
        assert_eq!(fake.batch_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_times_out_after_max_attempts() {
        let fake = Arc::new(FakeStores::default());
        let kb = kb_with(fake.clone());
        let status = kb
            .poll_batch("vs_1", "vsfb_1", Duration::from_millis(1), 3)
            .await;
        assert_eq!(status, BatchStatus::TimedOut);
        assert_eq!(fake.batch_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_survives_a_failed_attempt() {
        let fake = Arc::new(FakeStores {
            batch_statuses: statuses(vec![
                Err(ApiError::Connection("reset".into())),
                Ok(BatchStatus::Failed),
            ]),
            ..FakeStores::default()
        });
        let kb = kb_with(fake.clone());
        let status = kb
            .poll_batch("vs_1", "vsfb_1", Duration::from_millis(1), 5)
            .await;
        assert_eq!(status, BatchStatus::Failed);
        assert_eq!(fake.batch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_upload_fails_before_network() {
        let fake = Arc::new(FakeStores::default());
        let kb = kb_with(fake.clone());
        let dir = tempfile::tempdir().unwrap();
        let err = kb
            .upload_file(&dir.path().join("absent.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::FileNotFound(_)));
        assert!(matches!(
            kb.upload_file(dir.path()).await,
            Err(KnowledgeError::FileNotFound(_))
        ));
        assert_eq!(fake.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn add_document_uploads_indexes_and_waits() {
        let fake = Arc::new(FakeStores {
            batch_statuses: statuses(vec![Ok(BatchStatus::Completed)]),
            ..FakeStores::default()
        });
        fake.stores.lock().insert("vs_1".into(), store("vs_1", 0));
        let kb = kb_with(fake.clone());
        kb.list_stores().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# notes").unwrap();

        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        let (record, status) = kb
            .add_document("vs_1", &path, move |m| sink.lock().push(m))
            .await
            .unwrap();

        assert_eq!(record.filename, "notes.md");
        assert_eq!(record.bytes, Some(7));
        assert_eq!(status, BatchStatus::Completed);
        assert_eq!(kb.cached_store("vs_1").unwrap().file_count, 1);
        assert_eq!(messages.lock().len(), 3);
    }

    #[tokio::test]
    async fn listing_is_bounded_tolerant_and_sorted() {
        let refs: Vec<StoreFileRef> = (1..=25)
            .map(|n| StoreFileRef {
                id: format!("file_{n}"),
                created_at: n,
                status: Some("completed".into()),
            })
            .collect();
        let fake = Arc::new(FakeStores {
            store_files: Mutex::new(refs),
            failing_files: HashSet::from(["file_7".to_string()]),
            fetch_delay: Duration::from_millis(10),
            ..FakeStores::default()
        });
        let kb = kb_with(fake.clone());

        let files = kb.list_store_files("vs_1").await.unwrap();
        assert_eq!(files.len(), 25);
        let max = fake.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 10, "max in flight was {max}");
        assert!(max > 1);

        let created: Vec<i64> = files.iter().map(FileEntry::created_at).collect();
        let mut sorted = created.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(created, sorted);

        let broken = files.iter().find(|f| f.id() == "file_7").unwrap();
        assert_eq!(broken.filename(), "<Error>");
        assert!(matches!(broken, FileEntry::Unavailable { .. }));
        assert_eq!(files[0].filename(), "file_25.pdf");
    }

    #[tokio::test]
    async fn missing_store_lists_as_empty() {
        let fake = Arc::new(FakeStores {
            missing_store: true,
            ..FakeStores::default()
        });
        let kb = kb_with(fake);
        assert!(kb.list_store_files("vs_gone").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_file_detaches_then_deletes() {
        let fake = Arc::new(FakeStores::default());
        fake.stores.lock().insert("vs_1".into(), store("vs_1", 2));
        let kb = kb_with(fake.clone());
        kb.list_stores().await.unwrap();

        kb.remove_file("vs_1", "file_1").await.unwrap();
        assert_eq!(fake.detach_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fake.delete_file_calls.load(Ordering::SeqCst), 1);
        assert_eq!(kb.cached_store("vs_1").unwrap().file_count, 1);
    }

    #[tokio::test]
    async fn bridge_reports_results_and_failures() {
        let fake = Arc::new(FakeStores::default());
        fake.stores.lock().insert("vs_1".into(), store("vs_1", 4));
        let mut bridge = KnowledgeBridge::new(Arc::new(kb_with(fake)), 16);

        bridge.request(KbRequest::ListStores);
        bridge.request(KbRequest::DeleteStore {
            store_id: "vs_1".into(),
        });
        assert!(bridge.is_busy());

        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while bridge.is_busy() {
            assert!(tokio::time::Instant::now() < deadline);
            events.extend(bridge.drain_once(8));
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(events.iter().filter(|e| **e == KbEvent::Done).count(), 2);
        assert!(events.iter().any(|e| matches!(e, KbEvent::Stores(s) if s.len() == 1)));
        assert!(events.iter().any(|e| matches!(
            e,
            KbEvent::Failed { operation: "delete store", message } if message.contains("4 file")
        )));
    }
}
