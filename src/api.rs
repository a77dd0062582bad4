use std::path::Path;
use anyhow::{Result, anyhow};
use futures_util::StreamExt;
use log::warn;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use tokio::sync::mpsc;

pub const GENERIC_UPLOAD_ERROR: &str = "Error uploading file";

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct UploadResponse {
    pub message: Option<String>,
    pub pdf_id: String,
}

#[derive(Deserialize)]
struct UploadBody {
    message: Option<String>,
    pdf_id: Option<String>,
    file: Option<UploadedFile>,
}

#[derive(Deserialize)]
struct UploadedFile {
    id: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMessage {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Deserialize)]
struct HistoryBody {
    #[serde(default)]
    messages: Vec<HistoryMessage>,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Upload a PDF as multipart field `file`, reporting percentages on
    /// `progress` as the body is consumed. Errors carry the user-facing
    /// message from the server's error body when one exists.
    pub async fn upload_pdf(
        &self,
        path: &Path,
        progress: mpsc::UnboundedSender<u8>,
    ) -> Result<UploadResponse> {
        let url = format!("{}/api/upload", self.base_url);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.pdf".to_string());

        // Size is capped at 10MB by validation, so buffering the whole
        // file keeps the progress stream simple.
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| anyhow!("Could not read {}: {}", path.display(), e))?;
        let total = bytes.len() as u64;

        let chunks: Vec<Vec<u8>> = bytes
            .chunks(UPLOAD_CHUNK_BYTES)
            .map(|c| c.to_vec())
            .collect();
        let mut loaded: u64 = 0;
        let body_stream = futures_util::stream::iter(chunks).map(move |chunk| {
            loaded += chunk.len() as u64;
            let _ = progress.send(percent(loaded, total));
            Ok::<Vec<u8>, std::io::Error>(chunk)
        });

        let part = Part::stream_with_length(Body::wrap_stream(body_stream), total)
            .file_name(file_name)
            .mime_str("application/pdf")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                warn!("upload request failed: {}", e);
                anyhow!(GENERIC_UPLOAD_ERROR)
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.message)
                .unwrap_or_else(|_| GENERIC_UPLOAD_ERROR.to_string());
            warn!("upload rejected with status {}: {}", status, message);
            return Err(anyhow!(message));
        }

        let body: UploadBody = response.json().await.map_err(|e| {
            warn!("upload response did not parse: {}", e);
            anyhow!(GENERIC_UPLOAD_ERROR)
        })?;

        // The documented shape is a top-level pdf_id; older deployments
        // nest it as file.id.
        let pdf_id = body
            .pdf_id
            .or(body.file.map(|f| f.id))
            .ok_or_else(|| anyhow!(GENERIC_UPLOAD_ERROR))?;

        Ok(UploadResponse {
            message: body.message,
            pdf_id,
        })
    }

    pub async fn chat_history(&self, pdf_id: &str) -> Result<Vec<HistoryMessage>> {
        let url = format!("{}/api/chat/{}/history", self.base_url, pdf_id);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "history request failed with status: {}",
                response.status()
            ));
        }

        let body: HistoryBody = response.json().await?;
        Ok(body.messages)
    }
}

fn percent(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((loaded as f64) * 100.0 / (total as f64)).round() as u8
}
