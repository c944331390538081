use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorStore {
    pub id: String,
    pub name: Option<String>,
    pub status: String,
    pub file_count: u64,
    pub usage_bytes: u64,
}

impl VectorStore {
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => "(No Name)",
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct VectorStoreObject {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    usage_bytes: u64,
    #[serde(default)]
    file_counts: FileCounts,
}

#[derive(Debug, Default, Deserialize)]
struct FileCounts {
    #[serde(default)]
    total: u64,
}

impl From<VectorStoreObject> for VectorStore {
    fn from(object: VectorStoreObject) -> Self {
        Self {
            id: object.id,
            name: object.name,
            status: object.status.unwrap_or_else(|| "unknown".to_string()),
            file_count: object.file_counts.total,
            usage_bytes: object.usage_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub filename: String,
    pub created_at: i64,
    #[serde(default)]
    pub bytes: Option<u64>,
}

/// A file's membership in a vector store; metadata lives on the file itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreFileRef {
    pub id: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl BatchStatus {
    /// Unknown provider statuses are treated as still running.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "queued" => BatchStatus::Queued,
            "completed" => BatchStatus::Completed,
            "failed" => BatchStatus::Failed,
            "cancelled" | "canceled" => BatchStatus::Cancelled,
            "timed_out" => BatchStatus::TimedOut,
            _ => BatchStatus::InProgress,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::Cancelled
                | BatchStatus::TimedOut
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingBatch {
    pub id: String,
    pub status: BatchStatus,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileBatchObject {
    id: String,
    #[serde(default)]
    status: String,
}

impl From<FileBatchObject> for IndexingBatch {
    fn from(object: FileBatchObject) -> Self {
        Self {
            id: object.id,
            status: BatchStatus::from_wire(&object.status),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListPage<T> {
    pub(crate) data: Vec<T>,
    #[serde(default)]
    pub(crate) has_more: bool,
    #[serde(default)]
    pub(crate) last_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeletionStatus {
    #[serde(default)]
    pub(crate) deleted: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct StoreNameRequest<'a> {
    pub(crate) name: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct FileBatchRequest<'a> {
    pub(crate) file_ids: &'a [String],
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vector_store_object_maps_file_counts() {
        let object: VectorStoreObject = serde_json::from_value(json!({
            "id": "vs_1",
            "object": "vector_store",
            "name": "Reports",
            "status": "completed",
            "usage_bytes": 2048,
            "file_counts": {"in_progress": 0, "completed": 3, "total": 3}
        }))
        .unwrap();
        let store = VectorStore::from(object);
        assert_eq!(store.file_count, 3);
        assert_eq!(store.usage_bytes, 2048);
        assert_eq!(store.display_name(), "Reports");
    }

    #[test]
    fn unnamed_store_has_placeholder_display_name() {
        let object: VectorStoreObject =
            serde_json::from_value(json!({"id": "vs_2", "name": null})).unwrap();
        let store = VectorStore::from(object);
        assert_eq!(store.display_name(), "(No Name)");
        assert_eq!(store.file_count, 0);
        assert_eq!(store.status, "unknown");
    }

    #[test]
    fn batch_status_terminal_states() {
        assert!(!BatchStatus::from_wire("in_progress").is_terminal());
        assert!(!BatchStatus::from_wire("queued").is_terminal());
        assert!(!BatchStatus::from_wire("something_new").is_terminal());
        assert!(BatchStatus::from_wire("completed").is_terminal());
        assert!(BatchStatus::from_wire("failed").is_terminal());
        assert!(BatchStatus::from_wire("cancelled").is_terminal());
        assert!(BatchStatus::TimedOut.is_terminal());
    }
}
