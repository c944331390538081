use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::ai_sdk::vector_stores::{
    DeletionStatus, FileBatchObject, FileBatchRequest, ListPage, StoreNameRequest,
    VectorStoreObject,
};
use crate::ai_sdk::{
    EventStream, FileRecord, IndexingBatch, RawEvent, RequestPayload, ResponsesApi,
    StoreFileRef, VectorStore, VectorStoreApi,
};
use crate::error::ApiError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const STORE_FILES_PAGE_SIZE: u32 = 100;

pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub connect_timeout: Duration,
}

/// HTTP client for the Responses and vector-store endpoints.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    http: HttpClient,
}

type ApiResult<T> = Result<T, ApiError>;

impl OpenAiClient {
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        // No overall request timeout: a streamed response may legitimately run for minutes.
        let http = HttpClient::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(ApiError::from_reqwest)?;

        Ok(Self {
            base_url: normalize_base_url(&config.base_url),
            api_key: config.api_key,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = parse_retry_after(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, retry_after, &body));
        }

        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = self.send(request).await?;
        response.json::<T>().await.map_err(ApiError::from_reqwest)
    }
}

#[async_trait]
impl ResponsesApi for OpenAiClient {
    async fn create_response_stream(&self, payload: &RequestPayload) -> ApiResult<EventStream> {
        let response = self
            .send(
                self.http
                    .post(self.url("responses"))
                    .header("Accept", "text/event-stream")
                    .json(payload),
            )
            .await?;

        Ok(sse_events(response).boxed())
    }
}

#[async_trait]
impl VectorStoreApi for OpenAiClient {
    async fn list_vector_stores(&self, limit: u32) -> ApiResult<Vec<VectorStore>> {
        let page: ListPage<VectorStoreObject> = self
            .send_json(
                self.http
                    .get(self.url("vector_stores"))
                    .query(&[("limit", limit.to_string())]),
            )
            .await?;
        Ok(page.data.into_iter().map(VectorStore::from).collect())
    }

    async fn retrieve_vector_store(&self, store_id: &str) -> ApiResult<VectorStore> {
        let object: VectorStoreObject = self
            .send_json(self.http.get(self.url(&format!("vector_stores/{}", store_id))))
            .await?;
        Ok(object.into())
    }

    async fn create_vector_store(&self, name: &str) -> ApiResult<VectorStore> {
        let object: VectorStoreObject = self
            .send_json(
                self.http
                    .post(self.url("vector_stores"))
                    .json(&StoreNameRequest { name }),
            )
            .await?;
        Ok(object.into())
    }

    async fn update_vector_store(&self, store_id: &str, name: &str) -> ApiResult<VectorStore> {
        let object: VectorStoreObject = self
            .send_json(
                self.http
                    .post(self.url(&format!("vector_stores/{}", store_id)))
                    .json(&StoreNameRequest { name }),
            )
            .await?;
        Ok(object.into())
    }

    async fn delete_vector_store(&self, store_id: &str) -> ApiResult<bool> {
        let status: DeletionStatus = self
            .send_json(
                self.http
                    .delete(self.url(&format!("vector_stores/{}", store_id))),
            )
            .await?;
        Ok(status.deleted)
    }

    async fn upload_file(
        &self,
        filename: &str,
        contents: Vec<u8>,
        purpose: &str,
    ) -> ApiResult<FileRecord> {
        let part = reqwest::multipart::Part::bytes(contents).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .text("purpose", purpose.to_string())
            .part("file", part);

        self.send_json(self.http.post(self.url("files")).multipart(form))
            .await
    }

    async fn retrieve_file(&self, file_id: &str) -> ApiResult<FileRecord> {
        self.send_json(self.http.get(self.url(&format!("files/{}", file_id))))
            .await
    }

    async fn delete_file(&self, file_id: &str) -> ApiResult<bool> {
        let status: DeletionStatus = self
            .send_json(self.http.delete(self.url(&format!("files/{}", file_id))))
            .await?;
        Ok(status.deleted)
    }

    async fn create_file_batch(
        &self,
        store_id: &str,
        file_ids: &[String],
    ) -> ApiResult<IndexingBatch> {
        let object: FileBatchObject = self
            .send_json(
                self.http
                    .post(self.url(&format!("vector_stores/{}/file_batches", store_id)))
                    .json(&FileBatchRequest { file_ids }),
            )
            .await?;
        Ok(object.into())
    }

    async fn retrieve_file_batch(
        &self,
        store_id: &str,
        batch_id: &str,
    ) -> ApiResult<IndexingBatch> {
        let object: FileBatchObject = self
            .send_json(self.http.get(self.url(&format!(
                "vector_stores/{}/file_batches/{}",
                store_id, batch_id
            ))))
            .await?;
        Ok(object.into())
    }

    async fn list_store_files(&self, store_id: &str) -> ApiResult<Vec<StoreFileRef>> {
        let mut files = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = vec![("limit", STORE_FILES_PAGE_SIZE.to_string())];
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }

            let page: ListPage<StoreFileRef> = self
                .send_json(
                    self.http
                        .get(self.url(&format!("vector_stores/{}/files", store_id)))
                        .query(&query),
                )
                .await?;

            let next = page
                .last_id
                .clone()
                .or_else(|| page.data.last().map(|file| file.id.clone()));
            files.extend(page.data);

            match next {
                Some(cursor) if page.has_more => after = Some(cursor),
                _ => break,
            }
        }

        Ok(files)
    }

    async fn delete_store_file(&self, store_id: &str, file_id: &str) -> ApiResult<bool> {
        let status: DeletionStatus = self
            .send_json(self.http.delete(self.url(&format!(
                "vector_stores/{}/files/{}",
                store_id, file_id
            ))))
            .await?;
        Ok(status.deleted)
    }
}

/// Turns a streaming HTTP body into decoded events. A transport failure or a
/// malformed event ends the stream with one `Err`.
fn sse_events(response: Response) -> impl futures::Stream<Item = ApiResult<RawEvent>> + Send {
    async_stream::stream! {
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::default();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(ApiError::Stream(err.to_string()));
                    return;
                }
            };

            for data in decoder.push(&chunk) {
                match parse_event(&data) {
                    Some(Ok(event)) => yield Ok(event),
                    Some(Err(err)) => {
                        yield Err(err);
                        return;
                    }
                    None => {}
                }
            }
        }

        if let Some(data) = decoder.finish() {
            match parse_event(&data) {
                Some(Ok(event)) => yield Ok(event),
                Some(Err(err)) => yield Err(err),
                None => {}
            }
        }
    }
}

fn parse_event(data: &str) -> Option<ApiResult<RawEvent>> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(
        serde_json::from_str::<serde_json::Value>(data)
            .map(RawEvent::from_value)
            .map_err(|err| ApiError::Stream(format!("malformed event: {}", err))),
    )
}

/// Incremental server-sent-event framer.
///
/// Works on bytes so that multi-byte characters split across network chunks
/// are only decoded once the whole frame has arrived.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    after_cr: bool,
}

impl SseDecoder {
    /// Feeds a chunk and returns the `data` payload of every completed frame.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // CRLF, CR and LF all end a line. A CR that closes one chunk may pair
        // with an LF that opens the next.
        for &byte in chunk {
            match byte {
                b'\r' => {
                    self.buffer.push(b'\n');
                    self.after_cr = true;
                }
                b'\n' if self.after_cr => self.after_cr = false,
                _ => {
                    self.buffer.push(byte);
                    self.after_cr = false;
                }
            }
        }

        let mut payloads = Vec::new();
        while let Some(idx) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..idx + 2).collect();
            let raw = String::from_utf8_lossy(&frame[..idx]);
            if let Some(data) = extract_sse_data(&raw) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flushes a trailing frame that was not followed by a blank line.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        extract_sse_data(&String::from_utf8_lossy(&rest))
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\n\n")
}

fn extract_sse_data(raw: &str) -> Option<String> {
    let mut data_lines = Vec::new();
    for line in raw.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
    }

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| Duration::from_secs_f64(secs.min(3600.0)))
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}

pub fn default_data_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        return PathBuf::from(home).join(".scribe");
    }

    PathBuf::from(".scribe")
}
