//! Wire representation of stage values.
//!
//! A [`Datum`] is the one-of-seven envelope every stage result travels in, and a
//! [`CompletionResult`] pairs a `Datum` with the success/failure flag. These types
//! are pure data — see [`crate::codec`] for the encode/decode policy that bridges
//! them to and from Rust values.

use serde::{Deserialize, Serialize};

/// Reference to an opaque blob stored in the blob store. `prefix` is the bucket
/// the blob was written under (`closures`, `values`, `errors`, `http`, ...) and is
/// required to reconstruct the `GET /blobs/{prefix}/{blob_id}` read path (SPEC_FULL.md
/// section 6) — the write path is `POST /blobs/{prefix}` but the id alone does not
/// carry the prefix back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub prefix: String,
    pub id: String,
    pub content_type: String,
    pub length: u64,
}

/// An HTTP method, carried on `HttpReq` datums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

/// An HTTP request or response body, with the body itself offloaded to the blob
/// store (`body_blob`) rather than inlined, matching the source's `HttpReq`/`HttpResp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpReqDatum {
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body_blob: Option<BlobRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRespDatum {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body_blob: Option<BlobRef>,
}

/// A scoped identifier for a stage within some flow, carried by `StageRef` datums.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageId(pub String);

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminated union of everything a stage can resolve to. Exactly one variant
/// is present on the wire; this is modeled directly as a Rust enum rather than as
/// a struct-of-optionals, which the `serde(tag = ...)` representation below
/// preserves on the wire as a single `kind` discriminator plus payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Datum {
    /// No value. Used for triggers (`Delay`, `ThenRun`, `ThenAccept`, ...).
    Empty,
    /// Bulk bytes held in the blob store.
    Blob(BlobRef),
    /// A forwarding reference to another stage's eventual result.
    StageRef { stage_id: StageId },
    HttpReq(HttpReqDatum),
    HttpResp(HttpRespDatum),
    /// A platform-produced error (stage timeout, invoke failure, ...).
    Error { kind: String, message: String },
    /// An opaque lifecycle/status token (e.g. committed / not committed).
    Status { kind: String },
}

/// MIME type used for a successful, non-special value blob.
pub const GOB_MEDIA_TYPE: &str = "application/x-gob";
/// MIME type used for a user-produced error blob.
pub const JSON_MEDIA_TYPE: &str = "application/json";
/// MIME type used for HTTP body blobs.
pub const OCTET_STREAM_MEDIA_TYPE: &str = "application/octet-stream";

impl Datum {
    /// Build the `Empty` datum.
    pub fn empty() -> Self {
        Datum::Empty
    }

    /// Build a `Blob{application/json}` datum carrying `{"error": message}`, the
    /// wire form of a user-produced error value.
    pub fn error_blob(message: impl Into<String>) -> Self {
        let body = serde_json::json!({ "error": message.into() }).to_string();
        Datum::Blob(BlobRef {
            // The actual content-addressed id and prefix are assigned once this
            // datum's bytes are written through the Blob Client; callers that only
            // need the in-memory representation (e.g. for local composition or
            // tests) can use this placeholder.
            prefix: "errors".to_string(),
            id: String::new(),
            content_type: JSON_MEDIA_TYPE.to_string(),
            length: body.len() as u64,
        })
    }

    /// True if this datum represents the empty/unit value.
    pub fn is_empty(&self) -> bool {
        matches!(self, Datum::Empty)
    }
}

/// A stage's result: a datum plus whether the stage completed successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResult {
    pub successful: bool,
    pub datum: Datum,
}

impl CompletionResult {
    pub fn success(datum: Datum) -> Self {
        Self {
            successful: true,
            datum,
        }
    }

    pub fn failure(datum: Datum) -> Self {
        Self {
            successful: false,
            datum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_blob_carries_json_content_type() {
        let datum = Datum::error_blob("boom");
        match datum {
            Datum::Blob(blob_ref) => assert_eq!(blob_ref.content_type, JSON_MEDIA_TYPE),
            other => panic!("expected Blob datum, got {other:?}"),
        }
    }

    #[test]
    fn completion_result_roundtrips_through_json() {
        let cr = CompletionResult::success(Datum::Empty);
        let encoded = serde_json::to_string(&cr).unwrap();
        let decoded: CompletionResult = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.successful);
        assert!(decoded.datum.is_empty());
    }
}
