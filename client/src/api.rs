//! The backend as seen by the upload pipeline.

use std::{io, path::Path, sync::Arc, time::Duration};

use async_stream::stream;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use common::{
    data::DocumentRecord,
    hash_file,
    helpers::now_millis,
    payloads::*,
};
use log::debug;
use reqwest::{Body, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use tokio::{fs::File, io::AsyncReadExt, task::spawn_blocking};
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Called with the number of bytes handed to the transport so far.
pub type ProgressSink = Arc<dyn Fn(u64) + Send + Sync>;

/// What the processing stage reported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub success: bool,
    pub error: Option<String>,
}

#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Creates the metadata record, initially `uploading`.
    async fn create_document(
        &self,
        owner_id: &str,
        file_name: &str,
        file_type: &str,
        file_size: u64,
    ) -> ClientResult<DocumentRecord>;

    async fn update_document(
        &self,
        id: &str,
        update: UpdateDocumentPayload,
    ) -> ClientResult<DocumentRecord>;

    /// Stores the file's bytes and returns the storage path.
    async fn upload_bytes(
        &self,
        source: &Path,
        owner_id: &str,
        file_name: &str,
        progress: ProgressSink,
    ) -> ClientResult<String>;

    /// Runs extraction and indexing. A pipeline failure is an `Ok` outcome
    /// with `success: false`; `Err` means the call itself failed.
    async fn process_document(
        &self,
        document_id: &str,
        storage_path: &str,
        owner_id: &str,
    ) -> ClientResult<ProcessOutcome>;

    /// All of the owner's documents, newest first.
    async fn list_documents(&self, owner_id: &str) -> ClientResult<Vec<DocumentRecord>>;
}

const CHUNK_SIZE: usize = 256 * 1024;
const LIST_LIMIT: usize = 1000;

#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    token: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: String) -> ClientResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("docchat-upload/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .build()?;
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| ClientError::BadResponse(format!("invalid base url {base_url}: {e}")))?;
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn url(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::BadResponse(format!("{} cannot be a base url", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }

    /// Checks the status code and unwraps the response envelope.
    async fn process_response<Resp: DeserializeOwned>(
        input: reqwest::Result<reqwest::Response>,
        expected_status: u16,
    ) -> ClientResult<Resp> {
        let response: ApiResponse<Resp> = Self::envelope(input, expected_status).await?;
        if !response.success {
            return Err(ClientError::Api(response.error.unwrap_or(response.message)));
        }
        response
            .data
            .ok_or(ClientError::BadResponse(response.message))
    }

    async fn envelope<Resp: DeserializeOwned>(
        input: reqwest::Result<reqwest::Response>,
        expected_status: u16,
    ) -> ClientResult<ApiResponse<Resp>> {
        let res = input?;
        let code = res.status().as_u16();
        let text = res.text().await?;
        if code != expected_status {
            // Error responses still carry the envelope; its message beats the status line.
            if let Ok(ApiResponse {
                error: Some(error), ..
            }) = serde_json::from_str::<ApiResponse<serde_json::Value>>(&text)
            {
                return Err(ClientError::Api(error));
            }
            return Err(ClientError::BadStatusCode { code, body: text });
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn send_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: Url,
        payload: &Req,
        expected_status: u16,
    ) -> ClientResult<Resp> {
        let res = self
            .authed(self.client.request(method, url))
            .json(payload)
            .send()
            .await;
        Self::process_response(res, expected_status).await
    }
}

#[async_trait]
impl DocumentBackend for HttpBackend {
    async fn create_document(
        &self,
        owner_id: &str,
        file_name: &str,
        file_type: &str,
        file_size: u64,
    ) -> ClientResult<DocumentRecord> {
        let payload = CreateDocumentPayload {
            user_id: owner_id.to_string(),
            name: file_name.to_string(),
            file_type: file_type.to_string(),
            file_size,
        };
        self.send_json(reqwest::Method::POST, self.url(&["documents"])?, &payload, 201)
            .await
    }

    async fn update_document(
        &self,
        id: &str,
        update: UpdateDocumentPayload,
    ) -> ClientResult<DocumentRecord> {
        self.send_json(reqwest::Method::PATCH, self.url(&["documents", id])?, &update, 200)
            .await
    }

    async fn upload_bytes(
        &self,
        source: &Path,
        owner_id: &str,
        file_name: &str,
        progress: ProgressSink,
    ) -> ClientResult<String> {
        let hash_source = std::fs::File::open(source)?;
        let hash = spawn_blocking(move || hash_file(hash_source))
            .await
            .map_err(|e| ClientError::Io(io::Error::other(e)))??;

        let object = format!("{}_{}", now_millis(), file_name);
        let url = self.url(&["storage", owner_id, &object])?;
        debug!("uploading {} to {url}", source.display());

        let mut file = File::open(source).await?;
        let body = stream! {
            let mut sent: u64 = 0;
            loop {
                let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
                match file.read_buf(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        sent += n as u64;
                        progress(sent);
                        yield Ok::<Bytes, io::Error>(buf.freeze());
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };
        let res = self
            .authed(self.client.put(url))
            .header(CONTENT_HASH_HEADER, hash)
            .body(Body::wrap_stream(body))
            .send()
            .await;
        let stored: StoredObject = Self::process_response(res, 201).await?;
        Ok(stored.path)
    }

    async fn process_document(
        &self,
        document_id: &str,
        storage_path: &str,
        owner_id: &str,
    ) -> ClientResult<ProcessOutcome> {
        let payload = ProcessDocumentPayload {
            file_path: storage_path.to_string(),
            document_id: document_id.to_string(),
            user_id: owner_id.to_string(),
        };
        let res = self
            .authed(self.client.post(self.url(&["upload_document"])?))
            .json(&payload)
            .send()
            .await;
        let response: ApiResponse<ProcessDocumentResponse> = Self::envelope(res, 200).await?;
        Ok(ProcessOutcome {
            success: response.success,
            error: response.error,
        })
    }

    async fn list_documents(&self, owner_id: &str) -> ClientResult<Vec<DocumentRecord>> {
        let mut url = self.url(&["documents"])?;
        url.query_pairs_mut()
            .append_pair("limit", &LIST_LIMIT.to_string());
        debug!("listing documents for {owner_id}");
        let res = self.authed(self.client.get(url)).send().await;
        let list: DocumentListResponse = Self::process_response(res, 200).await?;
        Ok(list.documents)
    }
}
