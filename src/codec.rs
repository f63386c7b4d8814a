//! Value Codec: bidirectional mapping between Rust values and wire [`Datum`]s.
//!
//! Encoding policy (SPEC_FULL.md section 4.4):
//! 1. A [`crate::flow::FlowFuture`] encodes as `StageRef`.
//! 2. An HTTP request/response handle encodes as `HttpReq`/`HttpResp`, body in the blob store.
//! 3. `()` encodes as `Empty`.
//! 4. A user error encodes as a `Blob{application/json}` of `{"error": message}`.
//! 5. Anything else encodes as a `Blob{application/x-gob}` of a self-describing binary form.
//!
//! Rust has no runtime reflection of a closure's declared types, so point 5 is
//! implemented via the [`Gob`] newtype wrapper rather than a blanket impl over every
//! `Serialize` type — this sidesteps the coherence conflict a blanket impl would have
//! with the dedicated impls for `()`, `FlowFuture<T>` and the HTTP handles (see
//! DESIGN.md for the tradeoff).

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::blob::BlobClient;
use crate::datum::{
    BlobRef, CompletionResult, Datum, GOB_MEDIA_TYPE, HttpMethod, HttpReqDatum, HttpRespDatum,
    JSON_MEDIA_TYPE, OCTET_STREAM_MEDIA_TYPE,
};
use crate::error::FlowError;
use crate::flow::Flow;

/// Errors specific to encoding/decoding, folded into [`FlowError::Codec`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to serialize value: {0}")]
    Serialize(String),
    #[error("failed to deserialize value as the expected type: {0}")]
    Deserialize(String),
    #[error("expected result type is unknown; call get_type::<T>() to decode explicitly")]
    UnknownType,
    #[error("datum variant {found} cannot decode into the requested type")]
    VariantMismatch { found: &'static str },
}

/// Self-describing envelope used for the `application/x-gob` blob body: a type tag
/// (diagnostic only) plus the value serialized through `serde_json::Value` and then
/// `bincode`, the nearest stand-in for Go's self-describing `encoding/gob`.
#[derive(Serialize, serde::Deserialize)]
struct GobEnvelope {
    type_tag: String,
    payload: serde_json::Value,
}

fn encode_gob<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let payload =
        serde_json::to_value(value).map_err(|e| CodecError::Serialize(e.to_string()))?;
    let envelope = GobEnvelope {
        type_tag: std::any::type_name::<T>().to_string(),
        payload,
    };
    bincode::serialize(&envelope).map_err(|e| CodecError::Serialize(e.to_string()))
}

fn decode_gob<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let envelope: GobEnvelope =
        bincode::deserialize(bytes).map_err(|e| CodecError::Deserialize(e.to_string()))?;
    serde_json::from_value(envelope.payload).map_err(|e| CodecError::Deserialize(e.to_string()))
}

/// Newtype wrapper marking a value as eligible for the generic gob-style encoding.
/// Wrap any `Serialize + DeserializeOwned` application value in `Gob` to use it as
/// an action argument or return value: `fn upper(s: Gob<String>) -> Result<Gob<String>, MyError>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gob<T>(pub T);

impl<T> From<T> for Gob<T> {
    fn from(value: T) -> Self {
        Gob(value)
    }
}

/// A value that can become the successful payload of a stage.
#[async_trait]
pub trait EncodeDatum: Send {
    async fn encode(self, blobs: &dyn BlobClient) -> Result<Datum, FlowError>;
}

/// A value that can be recovered from a stage's completion result.
#[async_trait]
pub trait DecodeDatum: Sized + Send {
    async fn decode(
        result: &CompletionResult,
        blobs: &dyn BlobClient,
        flow: &Flow,
    ) -> Result<Self, FlowError>;
}

#[async_trait]
impl EncodeDatum for () {
    async fn encode(self, _blobs: &dyn BlobClient) -> Result<Datum, FlowError> {
        Ok(Datum::Empty)
    }
}

#[async_trait]
impl DecodeDatum for () {
    async fn decode(
        result: &CompletionResult,
        _blobs: &dyn BlobClient,
        _flow: &Flow,
    ) -> Result<Self, FlowError> {
        match &result.datum {
            Datum::Empty => Ok(()),
            _ => Ok(()), // decoding to the unit type discards any payload, by design
        }
    }
}

#[async_trait]
impl<T: Serialize + DeserializeOwned + Send + Sync> EncodeDatum for Gob<T> {
    async fn encode(self, blobs: &dyn BlobClient) -> Result<Datum, FlowError> {
        let bytes = encode_gob(&self.0)?;
        let blob_ref = blobs.write("values", GOB_MEDIA_TYPE, bytes).await?;
        Ok(Datum::Blob(blob_ref))
    }
}

#[async_trait]
impl<T: Serialize + DeserializeOwned + Default + Send + Sync> DecodeDatum for Gob<T> {
    async fn decode(
        result: &CompletionResult,
        blobs: &dyn BlobClient,
        _flow: &Flow,
    ) -> Result<Self, FlowError> {
        decode_blob_as::<T>(result, blobs).await.map(Gob)
    }
}

/// Shared "decode a successful gob blob, or fail with a clear type-mismatch" path
/// used by [`Gob<T>`] and convenience scalar impls. `T: Default` backs the
/// Empty-datum-decodes-to-zero-value contract (SPEC_FULL.md section 4.2/4.4):
/// an `Empty` arg never carries JSON, so there is nothing to deserialize and the
/// zero value is substituted directly rather than routed through `serde_json::Value::Null`,
/// which round-trips `()` fine but errors for `String`, `i64` and most scalars.
async fn decode_blob_as<T: DeserializeOwned + Default>(
    result: &CompletionResult,
    blobs: &dyn BlobClient,
) -> Result<T, FlowError> {
    match (&result.datum, result.successful) {
        (Datum::Empty, _) => Ok(T::default()),
        (Datum::Blob(blob_ref), true) => {
            let bytes = blobs.read(blob_ref).await?;
            decode_gob::<T>(&bytes).map_err(FlowError::from)
        }
        (Datum::Blob(blob_ref), false) => {
            let bytes = blobs.read(blob_ref).await?;
            let body: serde_json::Value = serde_json::from_slice(&bytes)
                .map_err(|e| FlowError::Codec(CodecError::Deserialize(e.to_string())))?;
            let message = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string();
            Err(FlowError::UserAction(message))
        }
        (Datum::Error { kind, message }, _) => {
            Err(FlowError::from_platform_datum(kind.clone(), message.clone()))
        }
        (other, _) => Err(FlowError::Codec(CodecError::VariantMismatch {
            found: datum_variant_name(other),
        })),
    }
}

fn datum_variant_name(datum: &Datum) -> &'static str {
    match datum {
        Datum::Empty => "Empty",
        Datum::Blob(_) => "Blob",
        Datum::StageRef { .. } => "StageRef",
        Datum::HttpReq(_) => "HttpReq",
        Datum::HttpResp(_) => "HttpResp",
        Datum::Error { .. } => "Error",
        Datum::Status { .. } => "Status",
    }
}

/// An in-memory HTTP request handle: method, headers, and a body.
#[derive(Debug, Clone)]
pub struct HttpRequestValue {
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// An in-memory HTTP response handle: status, headers, and a body.
#[derive(Debug, Clone)]
pub struct HttpResponseValue {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[async_trait]
impl EncodeDatum for HttpRequestValue {
    async fn encode(self, blobs: &dyn BlobClient) -> Result<Datum, FlowError> {
        let body_blob = if self.body.is_empty() {
            None
        } else {
            Some(blobs.write("http", OCTET_STREAM_MEDIA_TYPE, self.body).await?)
        };
        Ok(Datum::HttpReq(HttpReqDatum {
            method: self.method,
            headers: self.headers,
            body_blob,
        }))
    }
}

#[async_trait]
impl DecodeDatum for HttpRequestValue {
    async fn decode(
        result: &CompletionResult,
        blobs: &dyn BlobClient,
        _flow: &Flow,
    ) -> Result<Self, FlowError> {
        match &result.datum {
            Datum::HttpReq(req) => Ok(HttpRequestValue {
                method: req.method,
                headers: req.headers.clone(),
                body: read_optional_blob(blobs, &req.body_blob).await?,
            }),
            other => Err(FlowError::Codec(CodecError::VariantMismatch {
                found: datum_variant_name(other),
            })),
        }
    }
}

#[async_trait]
impl EncodeDatum for HttpResponseValue {
    async fn encode(self, blobs: &dyn BlobClient) -> Result<Datum, FlowError> {
        let body_blob = if self.body.is_empty() {
            None
        } else {
            Some(blobs.write("http", OCTET_STREAM_MEDIA_TYPE, self.body).await?)
        };
        Ok(Datum::HttpResp(HttpRespDatum {
            status_code: self.status_code,
            headers: self.headers,
            body_blob,
        }))
    }
}

#[async_trait]
impl DecodeDatum for HttpResponseValue {
    async fn decode(
        result: &CompletionResult,
        blobs: &dyn BlobClient,
        _flow: &Flow,
    ) -> Result<Self, FlowError> {
        match &result.datum {
            Datum::HttpResp(resp) => Ok(HttpResponseValue {
                status_code: resp.status_code,
                headers: resp.headers.clone(),
                body: read_optional_blob(blobs, &resp.body_blob).await?,
            }),
            other => Err(FlowError::Codec(CodecError::VariantMismatch {
                found: datum_variant_name(other),
            })),
        }
    }
}

async fn read_optional_blob(
    blobs: &dyn BlobClient,
    blob_ref: &Option<BlobRef>,
) -> Result<Vec<u8>, FlowError> {
    match blob_ref {
        Some(b) => blobs.read(b).await,
        None => Ok(Vec::new()),
    }
}

/// The error message carried by a failed stage, decoded regardless of whether the
/// failure originated from a user action (`Blob{application/json}`) or the platform
/// (`Error`). Used as the argument type for `exceptionally`/`exceptionally_compose`
/// actions, which only ever run on the failure path and only ever need the message.
#[derive(Debug, Clone)]
pub struct ErrorMessage(pub String);

#[async_trait]
impl DecodeDatum for ErrorMessage {
    async fn decode(
        result: &CompletionResult,
        blobs: &dyn BlobClient,
        _flow: &Flow,
    ) -> Result<Self, FlowError> {
        Ok(ErrorMessage(failure_message(result, blobs).await?))
    }
}

async fn failure_message(
    result: &CompletionResult,
    blobs: &dyn BlobClient,
) -> Result<String, FlowError> {
    match &result.datum {
        Datum::Blob(blob_ref) => {
            let bytes = blobs.read(blob_ref).await?;
            let body: serde_json::Value = serde_json::from_slice(&bytes)
                .map_err(|e| FlowError::Codec(CodecError::Deserialize(e.to_string())))?;
            Ok(body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string())
        }
        Datum::Error { kind, message } => Ok(format!("{kind}: {message}")),
        other => Ok(format!(
            "non-decodable failure datum: {}",
            datum_variant_name(other)
        )),
    }
}

/// Decodes a stage's (value, error) pair without propagating the failure as a Rust
/// `Err`, which is exactly the contract `when_complete`/`handle` need: the action
/// must observe both outcomes rather than short-circuit on one of them.
#[async_trait]
impl<T: DecodeDatum> DecodeDatum for Result<T, ErrorMessage> {
    async fn decode(
        result: &CompletionResult,
        blobs: &dyn BlobClient,
        flow: &Flow,
    ) -> Result<Self, FlowError> {
        if result.successful {
            Ok(Ok(T::decode(result, blobs, flow).await?))
        } else {
            Ok(Err(ErrorMessage(failure_message(result, blobs).await?)))
        }
    }
}

/// A lifecycle/state token, the client-side form of a `Status` datum (e.g. a
/// committed/not-committed marker returned by a couple of introspection calls in
/// the original source; this implementation exposes it for parity without adding
/// any new stage-construction operation beyond those in SPEC_FULL.md section 4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusToken(pub String);

#[async_trait]
impl DecodeDatum for StatusToken {
    async fn decode(
        result: &CompletionResult,
        _blobs: &dyn BlobClient,
        _flow: &Flow,
    ) -> Result<Self, FlowError> {
        match &result.datum {
            Datum::Status { kind } => Ok(StatusToken(kind.clone())),
            other => Err(FlowError::Codec(CodecError::VariantMismatch {
                found: datum_variant_name(other),
            })),
        }
    }
}

/// Encode a user-level action failure as the json error-blob datum described in
/// SPEC_FULL.md section 4.4 point 4.
pub async fn encode_user_error(
    blobs: &dyn BlobClient,
    message: impl Into<String>,
) -> Result<Datum, FlowError> {
    let message = message.into();
    let body = serde_json::json!({ "error": message }).to_string().into_bytes();
    let blob_ref = blobs.write("errors", JSON_MEDIA_TYPE, body).await?;
    Ok(Datum::Blob(blob_ref))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobClient;
    use crate::flow::test_support::fake_flow;

    #[tokio::test]
    async fn gob_roundtrips_a_struct() {
        #[derive(Debug, Default, Serialize, serde::Deserialize, PartialEq)]
        struct Point {
            x: i32,
            y: i32,
        }

        let blobs = InMemoryBlobClient::new();
        let flow = fake_flow();
        let datum = Gob(Point { x: 1, y: 2 }).encode(&blobs).await.unwrap();
        let result = CompletionResult::success(datum);
        let Gob(decoded) = Gob::<Point>::decode(&result, &blobs, &flow).await.unwrap();
        assert_eq!(decoded, Point { x: 1, y: 2 });
    }

    #[tokio::test]
    async fn unit_decodes_from_empty() {
        let blobs = InMemoryBlobClient::new();
        let flow = fake_flow();
        let result = CompletionResult::success(Datum::Empty);
        <() as DecodeDatum>::decode(&result, &blobs, &flow)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_blob_decodes_as_user_action_error() {
        let blobs = InMemoryBlobClient::new();
        let flow = fake_flow();
        let datum = encode_user_error(&blobs, "boom").await.unwrap();
        let result = CompletionResult::failure(datum);
        let err = Gob::<String>::decode(&result, &blobs, &flow)
            .await
            .unwrap_err();
        match err {
            FlowError::UserAction(msg) => assert_eq!(msg, "boom"),
            other => panic!("expected UserAction error, got {other:?}"),
        }
    }
}
