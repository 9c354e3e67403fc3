//! Multipart upload driver
//!
//! Splits one payload into fixed-size parts, asks the caller for a presigned
//! URL per part, uploads each part and collects the integrity tags needed to
//! complete the session. Starting and completing the session stay with the
//! caller, so an abandoned upload is simply never completed.

use crate::client::check_presigned;
use crate::error::{RemoteError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Parameters a presigned part URL is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRequest {
    /// 1-based part number
    pub number: u32,
    /// Exact size of the part in bytes
    pub content_length: usize,
}

/// A part accepted by object storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: u32,
    /// Integrity tag returned for the part
    pub etag: String,
}

/// Uploads the parts of one payload
#[derive(Debug, Clone)]
pub struct MultipartUploader {
    http: reqwest::Client,
    part_size: usize,
    retry: RetryPolicy,
}

impl MultipartUploader {
    /// Create an uploader sending parts of `part_size` bytes
    #[must_use]
    pub fn new(http: reqwest::Client, part_size: usize, retry: RetryPolicy) -> Self {
        Self {
            http,
            part_size: part_size.max(1),
            retry,
        }
    }

    /// Upload `file`, calling `generate_url` once per part.
    ///
    /// Returns the parts in order. An empty file is sent as a single empty part.
    pub async fn upload<F, Fut>(&self, file: &Path, mut generate_url: F) -> Result<Vec<CompletedPart>>
    where
        F: FnMut(PartRequest) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let mut reader = tokio::fs::File::open(file)
            .await
            .map_err(|e| RemoteError::io(e, file, "open"))?;
        let mut parts = Vec::new();
        let mut number = 0u32;

        loop {
            let chunk = read_part(&mut reader, self.part_size)
                .await
                .map_err(|e| RemoteError::io(e, file, "read"))?;
            if chunk.is_empty() && number > 0 {
                break;
            }
            number += 1;
            let request = PartRequest {
                number,
                content_length: chunk.len(),
            };

            let url = self
                .retry
                .run("multipart generate url", || generate_url(request))
                .await?;
            let etag = self
                .retry
                .run("multipart part upload", || self.put_part(&url, chunk.clone()))
                .await?;
            debug!(part = number, bytes = chunk.len(), "Uploaded part");
            parts.push(CompletedPart {
                part_number: number,
                etag,
            });

            if chunk.len() < self.part_size {
                break;
            }
        }
        Ok(parts)
    }

    async fn put_part(&self, url: &str, body: Vec<u8>) -> Result<String> {
        const OPERATION: &str = "multipart part upload";
        let length = body.len();
        let response = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(body)
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(OPERATION, &e))?;

        check_presigned(OPERATION, response)
            .await?
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RemoteError::invalid_response(OPERATION, "missing ETag header"))
    }
}

async fn read_part(reader: &mut tokio::fs::File, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let read = reader.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    buffer.truncate(filled);
    Ok(buffer)
}
