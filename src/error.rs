//! Crate-wide error taxonomy.
//!
//! Every fallible surface in this crate ultimately returns [`FlowError`]. Narrower
//! errors (codec, blob client, action registry) get their own `thiserror` enum and
//! convert into `FlowError` via `#[from]`, the same layering the teacher repo uses
//! for `FlowError: From<NodeError>`.

use crate::datum::Datum;

/// Top-level error type for the Flow SDK.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Missing or invalid environment configuration (e.g. `COMPLETER_BASE_URL`).
    #[error("configuration error: {0}")]
    Config(String),

    /// A request to the Flow service or blob store failed at the transport layer,
    /// or returned a non-success status.
    #[error("transport error calling {endpoint}: {message}")]
    Transport {
        endpoint: String,
        message: String,
    },

    /// A value could not be encoded to or decoded from its wire `Datum`.
    #[error("codec error: {0}")]
    Codec(#[from] crate::codec::CodecError),

    /// `current_flow()` was called outside of an active flow.
    #[error("no flow is active in this process")]
    NoActiveFlow,

    /// A continuation invocation named an action id with no matching registration.
    #[error("action '{0}' is not registered in this process")]
    UnregisteredAction(String),

    /// An action was invoked with a number of arguments that does not match its
    /// declared arity.
    #[error("action '{action}' expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        action: String,
        expected: usize,
        actual: usize,
    },

    /// A completion result could not be decoded into the type the caller asked for.
    #[error("cannot decode result as the requested type: {0}")]
    TypeMismatch(String),

    /// The Flow service returned a platform-level `Error` datum.
    #[error("platform error {kind}: {message}")]
    Platform { kind: String, message: String },

    /// A registered action returned a user-level error value.
    #[error("action failed: {0}")]
    UserAction(String),

    /// The continuation envelope on stdin was malformed.
    #[error("malformed continuation invocation: {0}")]
    MalformedInvocation(String),
}

impl FlowError {
    /// Build a [`FlowError::Platform`] from a service-produced `Error` datum.
    pub fn from_platform_datum(kind: impl Into<String>, message: impl Into<String>) -> Self {
        FlowError::Platform {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Render this error as the failed-completion `Datum` that gets sent back to
    /// the service (a JSON error blob, per the Value Codec's encoding policy).
    pub fn to_error_datum(&self) -> Datum {
        Datum::error_blob(self.to_string())
    }
}
