//! Continuation Executor.
//!
//! Every time the Flow service needs an action to run, it re-invokes this FaaS
//! function over HTTP with a set of `FnProject-` headers identifying the flow,
//! stage and action, and a JSON body carrying that action's argument(s). This
//! module turns that HTTP request into an [`ActionRegistry`] lookup and the
//! resulting [`CompletionResult`] back into an HTTP response, the same envelope the
//! [`crate::dispatch`] entry point uses to decide fresh-flow vs. continuation mode.

use crate::action::ActionRegistry;
use crate::blob::BlobClient;
use crate::datum::{CompletionResult, StageId};
use crate::error::FlowError;
use crate::flow::Flow;
use crate::service_client::FlowId;

/// `FnProject-`-prefixed header names, following the source's header contract.
pub const FLOW_ID_HEADER: &str = "FnProject-FlowId";
pub const STAGE_ID_HEADER: &str = "FnProject-StageId";
pub const METHOD_HEADER: &str = "FnProject-Method";
pub const RESULT_STATUS_HEADER: &str = "FnProject-ResultStatus";
pub const RESULT_CODE_HEADER: &str = "FnProject-ResultCode";
pub const DATUM_TYPE_HEADER: &str = "FnProject-DatumType";
pub const CODE_LOCATION_HEADER: &str = "FnProject-Codeloc";
pub const ERROR_TYPE_HEADER: &str = "FnProject-ErrorType";
pub const USER_HEADER_PREFIX: &str = "FnProject-Header-";

/// Method token recorded in `FnProject-Method` identifying a continuation call
/// (as opposed to the plain user invocation that starts a fresh flow).
pub const CONTINUATION_METHOD: &str = "invoke-action";

/// A continuation invocation, already parsed out of its HTTP envelope.
#[derive(Debug, Clone)]
pub struct ContinuationRequest {
    pub flow_id: FlowId,
    pub stage_id: StageId,
    pub action_id: String,
    pub args: Vec<CompletionResult>,
}

/// The body of a continuation request, following
/// `MaxContinuationArgCount = 2` in SPEC_FULL.md section 4.5.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ContinuationBody {
    action_id: String,
    args: Vec<CompletionResult>,
}

pub const MAX_CONTINUATION_ARG_COUNT: usize = 2;

impl ContinuationRequest {
    /// Parse a continuation request out of its HTTP headers and JSON body.
    pub fn from_http(headers: &http::HeaderMap, body: &[u8]) -> Result<Self, FlowError> {
        let flow_id = header_str(headers, FLOW_ID_HEADER)?;
        let stage_id = header_str(headers, STAGE_ID_HEADER)?;
        let parsed: ContinuationBody = serde_json::from_slice(body).map_err(|e| {
            FlowError::MalformedInvocation(format!("invalid continuation body: {e}"))
        })?;
        if parsed.args.len() > MAX_CONTINUATION_ARG_COUNT {
            return Err(FlowError::MalformedInvocation(format!(
                "continuation carries {} args, max is {MAX_CONTINUATION_ARG_COUNT}",
                parsed.args.len()
            )));
        }
        Ok(ContinuationRequest {
            flow_id: FlowId(flow_id),
            stage_id: StageId(stage_id),
            action_id: parsed.action_id,
            args: parsed.args,
        })
    }
}

/// True if `headers` carry the pair of identifiers that mark a continuation
/// invocation, per SPEC_FULL.md section 5's "Two-mode entry point".
pub fn is_continuation_invocation(headers: &http::HeaderMap) -> bool {
    headers.contains_key(FLOW_ID_HEADER) && headers.contains_key(STAGE_ID_HEADER)
}

fn header_str(headers: &http::HeaderMap, name: &str) -> Result<String, FlowError> {
    headers
        .get(name)
        .ok_or_else(|| FlowError::MalformedInvocation(format!("missing header {name}")))?
        .to_str()
        .map(str::to_string)
        .map_err(|e| FlowError::MalformedInvocation(format!("header {name} is not valid utf-8: {e}")))
}

/// Run one continuation: look the action up by id, decode its arguments, invoke it,
/// and fold the outcome into a [`CompletionResult`] ready to send back to the
/// service. Never returns an `Err` for a *user* action failure — only for
/// infrastructure problems (unregistered action id, arity mismatch, bad blob read).
pub async fn run_continuation(
    request: ContinuationRequest,
    registry: &ActionRegistry,
    blobs: &dyn BlobClient,
    flow: &Flow,
) -> Result<CompletionResult, FlowError> {
    tracing::info!(
        flow_id = %request.flow_id,
        stage_id = %request.stage_id,
        action_id = %request.action_id,
        "running continuation"
    );
    match registry
        .invoke(&request.action_id, request.args, blobs, flow)
        .await
    {
        Ok(datum) => Ok(CompletionResult::success(datum)),
        Err(FlowError::UserAction(message)) => {
            let datum = crate::codec::encode_user_error(blobs, message).await?;
            Ok(CompletionResult::failure(datum))
        }
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobClient;
    use crate::codec::Gob;
    use crate::flow::test_support::fake_flow;

    #[tokio::test]
    async fn runs_a_registered_action_to_success() {
        let registry = ActionRegistry::global();
        let action = registry
            .register1("continuation_tests::double", |Gob(n): Gob<i64>| async move {
                Ok::<_, std::convert::Infallible>(Gob(n * 2))
            })
            .unwrap();

        let blobs = InMemoryBlobClient::new();
        let flow = fake_flow();
        let arg_datum = Gob(21i64).encode(&blobs).await.unwrap();
        let request = ContinuationRequest {
            flow_id: FlowId("flow-1".to_string()),
            stage_id: StageId("stage-1".to_string()),
            action_id: action.id.clone(),
            args: vec![CompletionResult::success(arg_datum)],
        };
        let result = run_continuation(request, registry, &blobs, &flow).await.unwrap();
        assert!(result.successful);
    }

    #[tokio::test]
    async fn unregistered_action_is_an_infrastructure_error() {
        let registry = ActionRegistry::global();
        let blobs = InMemoryBlobClient::new();
        let flow = fake_flow();
        let request = ContinuationRequest {
            flow_id: FlowId("flow-1".to_string()),
            stage_id: StageId("stage-1".to_string()),
            action_id: "continuation_tests::does-not-exist".to_string(),
            args: vec![],
        };
        let err = run_continuation(request, registry, &blobs, &flow).await.unwrap_err();
        assert!(matches!(err, FlowError::UnregisteredAction(_)));
    }

    #[test]
    fn continuation_mode_requires_both_headers() {
        let mut headers = http::HeaderMap::new();
        assert!(!is_continuation_invocation(&headers));
        headers.insert(FLOW_ID_HEADER, "flow-1".parse().unwrap());
        assert!(!is_continuation_invocation(&headers));
        headers.insert(STAGE_ID_HEADER, "stage-1".parse().unwrap());
        assert!(is_continuation_invocation(&headers));
    }
}
