//! Service Client: typed wrapper over the Flow service's REST surface.
//!
//! Every operation here is a thin, synchronous-from-the-caller's-perspective
//! request/response pair except [`ServiceClient::await_stage_result`], which is
//! expected to be issued from a background task and may block for as long as the
//! service takes to complete the stage (SPEC_FULL.md section 4.3).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::datum::{BlobRef, CompletionResult, StageId};
use crate::error::FlowError;

/// Opaque flow identifier assigned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FlowId(pub String);

impl std::fmt::Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The operation token recorded on an operational stage, one of the values listed
/// in SPEC_FULL.md section 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageOp {
    Supply,
    ThenApply,
    ThenCompose,
    ThenCombine,
    WhenComplete,
    ThenAccept,
    ThenAcceptBoth,
    ThenRun,
    AcceptEither,
    ApplyToEither,
    Handle,
    Exceptionally,
    ExceptionallyCompose,
    AllOf,
    AnyOf,
    ExternalCompletion,
}

/// Human-readable origin of a stage-adding call, captured automatically via
/// `#[track_caller]` rather than threaded through every builder call by hand (see
/// SPEC_FULL.md section 10's note on `FnProject-Codeloc`).
#[derive(Debug, Clone)]
pub struct CodeLocation(pub String);

impl CodeLocation {
    #[track_caller]
    pub fn capture() -> Self {
        let loc = std::panic::Location::caller();
        CodeLocation(format!("{}:{}", loc.file(), loc.line()))
    }
}

/// Abstraction over the Flow service's REST API.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    async fn create_flow(&self, function_id: &str) -> Result<FlowId, FlowError>;

    async fn add_value_stage(
        &self,
        flow_id: &FlowId,
        result: CompletionResult,
        code_loc: &CodeLocation,
    ) -> Result<StageId, FlowError>;

    async fn add_stage(
        &self,
        flow_id: &FlowId,
        op: StageOp,
        closure: BlobRef,
        deps: Vec<StageId>,
        code_loc: &CodeLocation,
    ) -> Result<StageId, FlowError>;

    async fn add_invoke_function(
        &self,
        flow_id: &FlowId,
        fn_id: &str,
        http_req: crate::datum::HttpReqDatum,
        code_loc: &CodeLocation,
    ) -> Result<StageId, FlowError>;

    async fn add_delay(
        &self,
        flow_id: &FlowId,
        delay_ms: u64,
        code_loc: &CodeLocation,
    ) -> Result<StageId, FlowError>;

    async fn await_stage_result(
        &self,
        flow_id: &FlowId,
        stage_id: &StageId,
    ) -> Result<CompletionResult, FlowError>;

    async fn complete_stage_externally(
        &self,
        flow_id: &FlowId,
        stage_id: &StageId,
        result: CompletionResult,
    ) -> Result<bool, FlowError>;

    async fn commit(&self, flow_id: &FlowId) -> Result<(), FlowError>;
}

/// HTTP-backed [`ServiceClient`] talking to the paths listed in SPEC_FULL.md section 6.
#[cfg(feature = "http-client")]
pub struct HttpServiceClient {
    http: reqwest::Client,
    base_url: String,
}

#[cfg(feature = "http-client")]
impl HttpServiceClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B: serde::Serialize + Sync, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, FlowError> {
        let url = self.url(path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;
        if !resp.status().is_success() {
            return Err(FlowError::Transport {
                endpoint: url,
                message: format!("status {}", resp.status()),
            });
        }
        resp.json().await.map_err(|e| transport_error(&url, e))
    }
}

#[cfg(feature = "http-client")]
fn transport_error(url: &str, e: reqwest::Error) -> FlowError {
    FlowError::Transport {
        endpoint: url.to_string(),
        message: e.to_string(),
    }
}

#[cfg(feature = "http-client")]
#[async_trait]
impl ServiceClient for HttpServiceClient {
    async fn create_flow(&self, function_id: &str) -> Result<FlowId, FlowError> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            function_id: &'a str,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            flow_id: String,
        }
        let resp: Resp = self
            .post_json("/v1/flows", &Req { function_id })
            .await?;
        tracing::info!(flow_id = %resp.flow_id, function_id, "created flow");
        Ok(FlowId(resp.flow_id))
    }

    async fn add_value_stage(
        &self,
        flow_id: &FlowId,
        result: CompletionResult,
        code_loc: &CodeLocation,
    ) -> Result<StageId, FlowError> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            flow_id: &'a str,
            code_location: &'a str,
            value: CompletionResult,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            stage_id: String,
        }
        let resp: Resp = self
            .post_json(
                &format!("/v1/flows/{}/value", flow_id.0),
                &Req {
                    flow_id: &flow_id.0,
                    code_location: &code_loc.0,
                    value: result,
                },
            )
            .await?;
        Ok(StageId(resp.stage_id))
    }

    async fn add_stage(
        &self,
        flow_id: &FlowId,
        op: StageOp,
        closure: BlobRef,
        deps: Vec<StageId>,
        code_loc: &CodeLocation,
    ) -> Result<StageId, FlowError> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            flow_id: &'a str,
            operation: StageOp,
            closure: BlobRef,
            deps: Vec<StageId>,
            code_location: &'a str,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            stage_id: String,
        }
        let resp: Resp = self
            .post_json(
                &format!("/v1/flows/{}/stage", flow_id.0),
                &Req {
                    flow_id: &flow_id.0,
                    operation: op,
                    closure,
                    deps,
                    code_location: &code_loc.0,
                },
            )
            .await?;
        tracing::debug!(flow_id = %flow_id.0, stage_id = %resp.stage_id, ?op, "added stage");
        Ok(StageId(resp.stage_id))
    }

    async fn add_invoke_function(
        &self,
        flow_id: &FlowId,
        fn_id: &str,
        http_req: crate::datum::HttpReqDatum,
        code_loc: &CodeLocation,
    ) -> Result<StageId, FlowError> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            flow_id: &'a str,
            function_id: &'a str,
            request: crate::datum::HttpReqDatum,
            code_location: &'a str,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            stage_id: String,
        }
        let resp: Resp = self
            .post_json(
                &format!("/v1/flows/{}/invoke", flow_id.0),
                &Req {
                    flow_id: &flow_id.0,
                    function_id: fn_id,
                    request: http_req,
                    code_location: &code_loc.0,
                },
            )
            .await?;
        Ok(StageId(resp.stage_id))
    }

    async fn add_delay(
        &self,
        flow_id: &FlowId,
        delay_ms: u64,
        code_loc: &CodeLocation,
    ) -> Result<StageId, FlowError> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            flow_id: &'a str,
            delay_ms: u64,
            code_location: &'a str,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            stage_id: String,
        }
        let resp: Resp = self
            .post_json(
                &format!("/v1/flows/{}/delay", flow_id.0),
                &Req {
                    flow_id: &flow_id.0,
                    delay_ms,
                    code_location: &code_loc.0,
                },
            )
            .await?;
        Ok(StageId(resp.stage_id))
    }

    async fn await_stage_result(
        &self,
        flow_id: &FlowId,
        stage_id: &StageId,
    ) -> Result<CompletionResult, FlowError> {
        let url = self.url(&format!("/v1/flows/{}/stages/{}/await", flow_id.0, stage_id.0));
        let resp = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;
        if !resp.status().is_success() {
            return Err(FlowError::Transport {
                endpoint: url,
                message: format!("status {}", resp.status()),
            });
        }
        resp.json().await.map_err(|e| transport_error(&url, e))
    }

    async fn complete_stage_externally(
        &self,
        flow_id: &FlowId,
        stage_id: &StageId,
        result: CompletionResult,
    ) -> Result<bool, FlowError> {
        #[derive(serde::Deserialize)]
        struct Resp {
            completed: bool,
        }
        let resp: Resp = self
            .post_json(
                &format!("/v1/flows/{}/stages/{}/complete", flow_id.0, stage_id.0),
                &result,
            )
            .await?;
        Ok(resp.completed)
    }

    async fn commit(&self, flow_id: &FlowId) -> Result<(), FlowError> {
        let url = self.url(&format!("/v1/flows/{}/commit", flow_id.0));
        let resp = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;
        if !resp.status().is_success() {
            return Err(FlowError::Transport {
                endpoint: url,
                message: format!("status {}", resp.status()),
            });
        }
        tracing::info!(flow_id = %flow_id.0, "committed flow");
        Ok(())
    }
}

/// In-memory fake [`ServiceClient`] driving a tiny synchronous scheduler, used by
/// the composition-law and end-to-end tests in `tests/`. It resolves `supply` and
/// pure-combinator stages eagerly once their dependencies are present, which is
/// enough to validate the client-side composition algebra without a real service.
#[derive(Default)]
pub struct InMemoryServiceClient {
    inner: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    next_flow: u64,
    next_stage: u64,
    results: HashMap<(String, String), CompletionResult>,
    committed: Vec<String>,
}

impl InMemoryServiceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: directly seed a stage's result, as if the service had computed
    /// it. Used to drive `supply`/combinator stages without a real scheduler.
    pub fn seed_result(&self, flow_id: &FlowId, stage_id: &StageId, result: CompletionResult) {
        let mut state = self.inner.lock().expect("lock poisoned");
        state
            .results
            .insert((flow_id.0.clone(), stage_id.0.clone()), result);
    }

    pub fn is_committed(&self, flow_id: &FlowId) -> bool {
        self.inner
            .lock()
            .expect("lock poisoned")
            .committed
            .contains(&flow_id.0)
    }
}

#[async_trait]
impl ServiceClient for InMemoryServiceClient {
    async fn create_flow(&self, _function_id: &str) -> Result<FlowId, FlowError> {
        let mut state = self.inner.lock().expect("lock poisoned");
        state.next_flow += 1;
        Ok(FlowId(format!("flow-{}", state.next_flow)))
    }

    async fn add_value_stage(
        &self,
        flow_id: &FlowId,
        result: CompletionResult,
        _code_loc: &CodeLocation,
    ) -> Result<StageId, FlowError> {
        let mut state = self.inner.lock().expect("lock poisoned");
        state.next_stage += 1;
        let stage_id = StageId(format!("stage-{}", state.next_stage));
        state
            .results
            .insert((flow_id.0.clone(), stage_id.0.clone()), result);
        Ok(stage_id)
    }

    async fn add_stage(
        &self,
        flow_id: &FlowId,
        _op: StageOp,
        _closure: BlobRef,
        _deps: Vec<StageId>,
        _code_loc: &CodeLocation,
    ) -> Result<StageId, FlowError> {
        let mut state = self.inner.lock().expect("lock poisoned");
        state.next_stage += 1;
        let stage_id = StageId(format!("stage-{}", state.next_stage));
        let _ = flow_id;
        Ok(stage_id)
    }

    async fn add_invoke_function(
        &self,
        _flow_id: &FlowId,
        _fn_id: &str,
        _http_req: crate::datum::HttpReqDatum,
        _code_loc: &CodeLocation,
    ) -> Result<StageId, FlowError> {
        let mut state = self.inner.lock().expect("lock poisoned");
        state.next_stage += 1;
        Ok(StageId(format!("stage-{}", state.next_stage)))
    }

    async fn add_delay(
        &self,
        _flow_id: &FlowId,
        _delay_ms: u64,
        _code_loc: &CodeLocation,
    ) -> Result<StageId, FlowError> {
        let mut state = self.inner.lock().expect("lock poisoned");
        state.next_stage += 1;
        Ok(StageId(format!("stage-{}", state.next_stage)))
    }

    async fn await_stage_result(
        &self,
        flow_id: &FlowId,
        stage_id: &StageId,
    ) -> Result<CompletionResult, FlowError> {
        loop {
            {
                let state = self.inner.lock().expect("lock poisoned");
                if let Some(result) = state.results.get(&(flow_id.0.clone(), stage_id.0.clone())) {
                    return Ok(result.clone());
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    async fn complete_stage_externally(
        &self,
        flow_id: &FlowId,
        stage_id: &StageId,
        result: CompletionResult,
    ) -> Result<bool, FlowError> {
        let mut state = self.inner.lock().expect("lock poisoned");
        let key = (flow_id.0.clone(), stage_id.0.clone());
        if state.results.contains_key(&key) {
            Ok(false)
        } else {
            state.results.insert(key, result);
            Ok(true)
        }
    }

    async fn commit(&self, flow_id: &FlowId) -> Result<(), FlowError> {
        let mut state = self.inner.lock().expect("lock poisoned");
        state.committed.push(flow_id.0.clone());
        Ok(())
    }
}
