//! Entry Dispatcher.
//!
//! One process handles two kinds of invocation (SPEC_FULL.md section 5):
//!
//! * **Fresh invocation** — the user's function was called directly (no
//!   `FnProject-FlowId`/`FnProject-StageId` headers). [`with_flow`] creates a new
//!   flow, runs the user's closure to build the initial graph, commits the flow, and
//!   returns.
//! * **Continuation invocation** — those headers are present. The Flow service is
//!   asking this process to run one action. [`with_flow`] never calls the user's
//!   closure in this case; it hands the request straight to
//!   [`crate::continuation::run_continuation`], because the action being asked for
//!   was already registered as a side effect of this process's module
//!   initialization (actions are registered unconditionally at startup, the graph
//!   is only built on a fresh invocation).
//!
//! [`current_flow`] exposes the active [`Flow`] to code running inside the fresh-
//! invocation closure via a task-local, mirroring the teacher's reliance on a
//! request-scoped context rather than a bare global.

use std::future::Future;
use std::sync::Arc;

use crate::action::ActionRegistry;
use crate::blob::BlobClient;
use crate::continuation::{self, ContinuationRequest};
use crate::error::FlowError;
use crate::flow::Flow;
use crate::service_client::{FlowId, ServiceClient};

tokio::task_local! {
    static CURRENT_FLOW: Flow;
}

/// The active flow for the currently-running fresh invocation, if any.
pub fn current_flow() -> Result<Flow, FlowError> {
    CURRENT_FLOW
        .try_with(|flow| flow.clone())
        .map_err(|_| FlowError::NoActiveFlow)
}

/// Raw HTTP-shaped invocation as delivered by the FaaS runtime.
pub struct EntryRequest {
    pub headers: http::HeaderMap,
    pub body: Vec<u8>,
}

/// Raw HTTP-shaped response to hand back to the FaaS runtime.
pub struct EntryResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl EntryResponse {
    fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body,
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        let body = serde_json::json!({ "error": message.into() })
            .to_string()
            .into_bytes();
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body,
        }
    }
}

/// Function id this process serves, used when creating a new flow. The source
/// derives this from the function's own routing context; here it is supplied by
/// the embedder since this crate has no FaaS-platform integration of its own.
pub struct EntryConfig {
    pub function_id: String,
}

/// Drive one invocation of the user's function through the fresh-vs-continuation
/// split described above.
pub async fn with_flow<F, Fut>(
    request: EntryRequest,
    config: &EntryConfig,
    service: Arc<dyn ServiceClient>,
    blobs: Arc<dyn BlobClient>,
    user_fn: F,
) -> EntryResponse
where
    F: FnOnce(Flow) -> Fut,
    Fut: Future<Output = Result<(), FlowError>>,
{
    if continuation::is_continuation_invocation(&request.headers) {
        return handle_continuation(request, service, blobs).await;
    }
    handle_fresh_invocation(request, config, service, blobs, user_fn).await
}

async fn handle_continuation(
    request: EntryRequest,
    service: Arc<dyn ServiceClient>,
    blobs: Arc<dyn BlobClient>,
) -> EntryResponse {
    let parsed = match ContinuationRequest::from_http(&request.headers, &request.body) {
        Ok(parsed) => parsed,
        Err(err) => return EntryResponse::error(400, err.to_string()),
    };
    let flow = Flow::new(service, blobs.clone(), parsed.flow_id.clone());
    match continuation::run_continuation(parsed, ActionRegistry::global(), blobs.as_ref(), &flow).await {
        Ok(result) => match serde_json::to_vec(&result) {
            Ok(body) => EntryResponse::ok(body),
            Err(e) => EntryResponse::error(500, format!("failed to encode completion result: {e}")),
        },
        Err(err) => {
            tracing::error!(error = %err, "continuation failed");
            EntryResponse::error(500, err.to_string())
        }
    }
}

async fn handle_fresh_invocation<F, Fut>(
    _request: EntryRequest,
    config: &EntryConfig,
    service: Arc<dyn ServiceClient>,
    blobs: Arc<dyn BlobClient>,
    user_fn: F,
) -> EntryResponse
where
    F: FnOnce(Flow) -> Fut,
    Fut: Future<Output = Result<(), FlowError>>,
{
    let flow_id = match service.create_flow(&config.function_id).await {
        Ok(id) => id,
        Err(err) => return EntryResponse::error(500, err.to_string()),
    };
    let flow = Flow::new(service.clone(), blobs, flow_id.clone());

    let run_result = CURRENT_FLOW.scope(flow.clone(), user_fn(flow.clone())).await;

    if let Err(err) = run_result {
        tracing::error!(error = %err, flow_id = %flow_id, "failed to build flow graph");
        return EntryResponse::error(500, err.to_string());
    }

    if let Err(err) = service.commit(&flow_id).await {
        tracing::error!(error = %err, flow_id = %flow_id, "failed to commit flow");
        return EntryResponse::error(500, err.to_string());
    }

    EntryResponse::ok(serde_json::json!({ "flow_id": flow_id.0 }).to_string().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobClient;
    use crate::codec::Gob;
    use crate::service_client::InMemoryServiceClient;

    #[tokio::test]
    async fn fresh_invocation_creates_and_commits_a_flow() {
        let service = Arc::new(InMemoryServiceClient::new());
        let blobs = Arc::new(InMemoryBlobClient::new());
        let config = EntryConfig {
            function_id: "app/fn".to_string(),
        };
        let request = EntryRequest {
            headers: http::HeaderMap::new(),
            body: Vec::new(),
        };

        let response = with_flow(request, &config, service.clone(), blobs, |flow| async move {
            let value = current_flow()?;
            assert_eq!(value.id(), flow.id());
            flow.completed_value(Gob(1i64)).await?;
            Ok(())
        })
        .await;

        assert_eq!(response.status, 200);
        assert!(service.is_committed(&crate::service_client::FlowId("flow-1".to_string())));
    }

    #[tokio::test]
    async fn current_flow_is_not_active_outside_with_flow() {
        assert!(matches!(current_flow(), Err(FlowError::NoActiveFlow)));
    }

    #[tokio::test]
    async fn continuation_invocation_never_calls_the_user_closure() {
        let service = Arc::new(InMemoryServiceClient::new());
        let blobs = Arc::new(InMemoryBlobClient::new());
        let config = EntryConfig {
            function_id: "app/fn".to_string(),
        };
        let registry = ActionRegistry::global();
        let action = registry
            .register0("dispatch_tests::noop", || async {
                Ok::<_, std::convert::Infallible>(())
            })
            .unwrap();

        let mut headers = http::HeaderMap::new();
        headers.insert(continuation::FLOW_ID_HEADER, "flow-1".parse().unwrap());
        headers.insert(continuation::STAGE_ID_HEADER, "stage-1".parse().unwrap());
        let body = serde_json::json!({ "action_id": action.id, "args": [] })
            .to_string()
            .into_bytes();

        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let called_clone = called.clone();
        let response = with_flow(
            EntryRequest { headers, body },
            &config,
            service,
            blobs,
            move |_flow| {
                called_clone.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok(()) }
            },
        )
        .await;

        assert_eq!(response.status, 200);
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }
}
