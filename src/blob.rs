//! Blob Client: reads and writes opaque byte blobs referenced by id.
//!
//! Closure payloads, gob-encoded values, HTTP bodies and error bodies are all
//! stored as blobs rather than inlined on the wire. Blobs are owned by the flow
//! that produced them; the client never retains bytes after encoding (SPEC_FULL.md
//! section 4.4, "Ownership").

use async_trait::async_trait;

use crate::datum::BlobRef;
use crate::error::FlowError;

/// Abstraction over the remote blob store, following the same "thin typed client
/// behind a trait" shape the teacher uses for `StorageBackend`.
#[async_trait]
pub trait BlobClient: Send + Sync {
    /// Write `bytes` under the given content type, returning a reference to the
    /// stored blob.
    async fn write(&self, prefix: &str, content_type: &str, bytes: Vec<u8>) -> Result<BlobRef, FlowError>;

    /// Read the bytes for a previously written blob.
    async fn read(&self, blob_ref: &BlobRef) -> Result<Vec<u8>, FlowError>;
}

/// HTTP-backed [`BlobClient`] talking to `POST /blobs/{prefix}` and
/// `GET /blobs/{prefix}/{blob_id}`, per SPEC_FULL.md section 6.
#[cfg(feature = "http-client")]
pub struct HttpBlobClient {
    http: reqwest::Client,
    base_url: String,
}

#[cfg(feature = "http-client")]
impl HttpBlobClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[cfg(feature = "http-client")]
#[async_trait]
impl BlobClient for HttpBlobClient {
    async fn write(&self, prefix: &str, content_type: &str, bytes: Vec<u8>) -> Result<BlobRef, FlowError> {
        let url = format!("{}/blobs/{}", self.base_url, prefix);
        let len = bytes.len() as u64;
        let resp = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;
        let resp = ensure_success(&url, resp).await?;

        #[derive(serde::Deserialize)]
        struct WriteResponse {
            blob_id: String,
            #[allow(dead_code)]
            length: u64,
            content_type: String,
        }
        let parsed: WriteResponse = resp
            .json()
            .await
            .map_err(|e| transport_error(&url, e))?;
        Ok(BlobRef {
            prefix: prefix.to_string(),
            id: parsed.blob_id,
            content_type: parsed.content_type,
            length: len,
        })
    }

    async fn read(&self, blob_ref: &BlobRef) -> Result<Vec<u8>, FlowError> {
        let url = format!("{}/blobs/{}/{}", self.base_url, blob_ref.prefix, blob_ref.id);
        let resp = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, &blob_ref.content_type)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;
        let resp = ensure_success(&url, resp).await?;
        let bytes = resp.bytes().await.map_err(|e| transport_error(&url, e))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(feature = "http-client")]
async fn ensure_success(url: &str, resp: reqwest::Response) -> Result<reqwest::Response, FlowError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(FlowError::Transport {
            endpoint: url.to_string(),
            message: format!("status {}", resp.status()),
        })
    }
}

#[cfg(feature = "http-client")]
fn transport_error(url: &str, e: reqwest::Error) -> FlowError {
    FlowError::Transport {
        endpoint: url.to_string(),
        message: e.to_string(),
    }
}

/// In-memory [`BlobClient`] used by tests and by anything exercising the
/// composition algebra without a real Flow service, matching the teacher's
/// in-memory-first testing style (`InMemoryStorage` mirrored here for blobs).
#[derive(Default)]
pub struct InMemoryBlobClient {
    blobs: tokio::sync::Mutex<std::collections::HashMap<String, (String, Vec<u8>)>>,
}

impl InMemoryBlobClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobClient for InMemoryBlobClient {
    async fn write(&self, prefix: &str, content_type: &str, bytes: Vec<u8>) -> Result<BlobRef, FlowError> {
        let id = uuid::Uuid::new_v4().to_string();
        let len = bytes.len() as u64;
        self.blobs
            .lock()
            .await
            .insert(id.clone(), (content_type.to_string(), bytes));
        Ok(BlobRef {
            prefix: prefix.to_string(),
            id,
            content_type: content_type.to_string(),
            length: len,
        })
    }

    async fn read(&self, blob_ref: &BlobRef) -> Result<Vec<u8>, FlowError> {
        self.blobs
            .lock()
            .await
            .get(&blob_ref.id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| FlowError::Transport {
                endpoint: format!("memory://blobs/{}", blob_ref.id),
                message: "blob not found".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_blob_client_roundtrips() {
        let client = InMemoryBlobClient::new();
        let blob_ref = client
            .write("closures", "application/json", b"hello".to_vec())
            .await
            .unwrap();
        let bytes = client.read(&blob_ref).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn reading_unknown_blob_is_an_error() {
        let client = InMemoryBlobClient::new();
        let missing = BlobRef {
            prefix: "closures".to_string(),
            id: "does-not-exist".to_string(),
            content_type: "application/json".to_string(),
            length: 0,
        };
        assert!(client.read(&missing).await.is_err());
    }
}
