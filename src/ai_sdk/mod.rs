//! Wire types for the provider API and the traits the rest of the app talks to.

pub(crate) mod responses;
pub(crate) mod vector_stores;

pub use responses::*;
pub use vector_stores::*;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::ApiError;

pub type EventStream = BoxStream<'static, Result<RawEvent, ApiError>>;

/// Opens streamed responses. A returned stream has already been accepted by the
/// server; failures after that point arrive as `Err` items.
#[async_trait]
pub trait ResponsesApi: Send + Sync {
    async fn create_response_stream(&self, payload: &RequestPayload) -> Result<EventStream, ApiError>;
}

#[async_trait]
pub trait VectorStoreApi: Send + Sync {
    async fn list_vector_stores(&self, limit: u32) -> Result<Vec<VectorStore>, ApiError>;

    async fn retrieve_vector_store(&self, store_id: &str) -> Result<VectorStore, ApiError>;

    async fn create_vector_store(&self, name: &str) -> Result<VectorStore, ApiError>;

    async fn update_vector_store(&self, store_id: &str, name: &str) -> Result<VectorStore, ApiError>;

    async fn delete_vector_store(&self, store_id: &str) -> Result<bool, ApiError>;

    async fn upload_file(
        &self,
        filename: &str,
        contents: Vec<u8>,
        purpose: &str,
    ) -> Result<FileRecord, ApiError>;

    async fn retrieve_file(&self, file_id: &str) -> Result<FileRecord, ApiError>;

    async fn delete_file(&self, file_id: &str) -> Result<bool, ApiError>;

    async fn create_file_batch(
        &self,
        store_id: &str,
        file_ids: &[String],
    ) -> Result<IndexingBatch, ApiError>;

    async fn retrieve_file_batch(
        &self,
        store_id: &str,
        batch_id: &str,
    ) -> Result<IndexingBatch, ApiError>;

    async fn list_store_files(&self, store_id: &str) -> Result<Vec<StoreFileRef>, ApiError>;

    async fn delete_store_file(&self, store_id: &str, file_id: &str) -> Result<bool, ApiError>;
}
