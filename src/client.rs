//! HTTP binding of the installer API.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use pkgferry_common::{Error, Result, SessionKey};
use pkgferry_pkg::TempFileStore;
use pkgferry_upload::{
    ChunkDescriptor, ChunkListing, ChunkUploadReply, InitSession, InstallerApi, ProgressFn,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::config::ServerConfig;

/// Bytes handed to the transport between progress reports.
const UPLOAD_SLICE: usize = 64 * 1024;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitReply {
    session_key: SessionKey,
}

#[derive(Deserialize)]
struct TempFileReply {
    path: String,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: String,
}

/// Talks to the installer service over HTTP.
pub struct HttpInstaller {
    client: Client,
    base_url: String,
}

impl HttpInstaller {
    pub fn new(config: &ServerConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with connect timeout: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// URL under which the installer serves a stored temp file.
    pub fn stream_url(&self, path: &str) -> String {
        format!("{}/fs/stream/{}", self.url(""), path)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::network(format!("{what}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorReply>(&body)
            .map(|r| r.error)
            .ok()
            .filter(|m| !m.is_empty())
            .or_else(|| Some(body).filter(|b| !b.is_empty()))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        Err(Error::api(status.as_u16(), format!("{what}: {message}")))
    }

    async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::network(format!("{what}: {e}")))?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Ask the installer to fetch and install a package from `url`.
    pub async fn install_from_url(&self, url: &str) -> Result<()> {
        let request = self
            .client
            .post(self.url("/package/install"))
            .json(&json!({ "path": url }));
        self.send(request, "install from URL").await?;
        tracing::info!(url, "Install requested");
        Ok(())
    }
}

/// Wrap `data` in a streaming body that reports cumulative bytes handed to
/// the transport.
fn progress_body(data: Bytes, progress: ProgressFn) -> Body {
    let total = data.len();
    let mut sent = 0u64;
    let slices = futures::stream::iter((0..total).step_by(UPLOAD_SLICE))
        .map(move |at| data.slice(at..(at + UPLOAD_SLICE).min(total)))
        .map(move |slice| {
            sent += slice.len() as u64;
            progress(sent);
            Ok::<_, std::io::Error>(slice)
        });
    Body::wrap_stream(slices)
}

#[async_trait]
impl InstallerApi for HttpInstaller {
    async fn init_session(&self, request: &InitSession) -> Result<SessionKey> {
        let size = request.total_size.to_string();
        let query = [
            ("size", size.as_str()),
            ("titleId", request.title_id.as_str()),
            ("title", request.title.as_str()),
            ("iconPath", request.icon_ref.as_deref().unwrap_or("null")),
        ];
        let response = self
            .send(
                self.client.post(self.url("/package/upload/init")).query(&query),
                "init upload",
            )
            .await?;
        let reply: InitReply = Self::read_json(response, "init upload").await?;
        Ok(reply.session_key)
    }

    async fn list_outstanding_chunks(
        &self,
        session: &SessionKey,
        poll_id: u64,
    ) -> Result<ChunkListing> {
        let id = poll_id.to_string();
        let response = self
            .send(
                self.client
                    .post(self.url("/package/upload/list"))
                    .query(&[("sessionKey", session.as_str()), ("id", id.as_str())]),
                "list chunks",
            )
            .await?;
        Self::read_json(response, "list chunks").await
    }

    async fn upload_chunk(
        &self,
        session: &SessionKey,
        chunk: &ChunkDescriptor,
        data: Bytes,
        progress: ProgressFn,
    ) -> Result<ChunkUploadReply> {
        let length = data.len() as u64;
        let part = Part::stream_with_length(progress_body(data, progress), length)
            .file_name(chunk.key.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| Error::internal(format!("invalid part mime type: {e}")))?;
        let form = Form::new().part("file", part);

        let response = self
            .send(
                self.client
                    .post(self.url("/package/upload"))
                    .query(&[("sessionKey", session.as_str()), ("chunkKey", chunk.key.as_str())])
                    .multipart(form),
                "upload chunk",
            )
            .await?;

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::network(format!("upload chunk: {e}")))?;
        Ok(serde_json::from_slice(&body).unwrap_or_else(|e| {
            tracing::debug!(chunk = %chunk.key, error = %e, "Unparsable upload reply, treating as empty");
            ChunkUploadReply::default()
        }))
    }

    async fn cancel_session(&self, session: &SessionKey) -> Result<()> {
        let request = self
            .client
            .post(self.url("/package/upload/cancel"))
            .json(&json!({ "sessionKey": session }));
        self.send(request, "cancel upload").await?;
        Ok(())
    }
}

#[async_trait]
impl TempFileStore for HttpInstaller {
    async fn store(&self, data: Bytes) -> Result<String> {
        let request = self
            .client
            .post(self.url("/fs/temp/file"))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data);
        let response = self.send(request, "store temp file").await?;
        let reply: TempFileReply = Self::read_json(response, "store temp file").await?;
        Ok(self.stream_url(&reply.path))
    }
}
