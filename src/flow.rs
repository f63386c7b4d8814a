//! Future Model & Composition Algebra.
//!
//! A [`Flow`] is a handle to one durable graph scoped to a single invocation of the
//! user's function. A [`FlowFuture<T>`] is a client-side handle to one stage in that
//! graph; its combinators (`then_apply`, `then_compose`, ...) each add a new stage to
//! the graph and return a new future over that stage, mirroring
//! `java.util.concurrent.CompletionStage` the way the source's `flow-lib-go` does.
//!
//! None of these methods run the action locally: they register the dependency graph
//! with the Flow service and return immediately. The action body only ever runs
//! inside a continuation invocation, dispatched through [`crate::action::ActionRegistry`]
//! by [`crate::continuation`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::action::{Action0, Action1, Action2};
use crate::blob::BlobClient;
use crate::codec::{DecodeDatum, EncodeDatum, ErrorMessage};
use crate::datum::{CompletionResult, Datum, JSON_MEDIA_TYPE};
use crate::error::FlowError;
use crate::service_client::{CodeLocation, FlowId, ServiceClient, StageOp};

/// Marker type for a [`FlowFuture`] whose result type hasn't been pinned down yet —
/// the state a raw `invoke_function` stage ref starts in until the caller commits to
/// a type with [`FlowFuture::get_type`].
#[derive(Debug, Clone, Copy)]
pub struct Unknown;

/// Handle to one durable graph, scoped to a single invocation of the user's function.
/// Cheap to clone: every field is reference-counted or a small id.
#[derive(Clone)]
pub struct Flow {
    service: Arc<dyn ServiceClient>,
    blobs: Arc<dyn BlobClient>,
    flow_id: FlowId,
}

impl Flow {
    pub fn new(service: Arc<dyn ServiceClient>, blobs: Arc<dyn BlobClient>, flow_id: FlowId) -> Self {
        Self {
            service,
            blobs,
            flow_id,
        }
    }

    pub fn id(&self) -> &FlowId {
        &self.flow_id
    }

    pub(crate) fn blobs(&self) -> &dyn BlobClient {
        self.blobs.as_ref()
    }

    pub(crate) fn service(&self) -> &dyn ServiceClient {
        self.service.as_ref()
    }

    /// Start a future already resolved to `value`, the entry point for a literal
    /// constant in a composition chain (source: `CompletedValue`).
    pub async fn completed_value<T: EncodeDatum>(&self, value: T) -> Result<FlowFuture<T>, FlowError> {
        let datum = value.encode(self.blobs.as_ref()).await?;
        let stage_id = self
            .service
            .add_value_stage(&self.flow_id, CompletionResult::success(datum), &CodeLocation::capture())
            .await?;
        Ok(FlowFuture::new(self.clone(), stage_id))
    }

    /// Start a future that runs `action` with no input, analogous to
    /// `CompletableFuture.supplyAsync`.
    pub async fn supply<Out, Err>(&self, action: &Action0<Out, Err>) -> Result<FlowFuture<Out>, FlowError> {
        let closure = action_closure_blob(self.blobs.as_ref(), &action.id).await?;
        let stage_id = self
            .service
            .add_stage(&self.flow_id, StageOp::Supply, closure, Vec::new(), &CodeLocation::capture())
            .await?;
        Ok(FlowFuture::new(self.clone(), stage_id))
    }

    /// Start a future that completes, with no value, after `duration` elapses.
    pub async fn delay(&self, duration: Duration) -> Result<FlowFuture<()>, FlowError> {
        let stage_id = self
            .service
            .add_delay(&self.flow_id, duration.as_millis() as u64, &CodeLocation::capture())
            .await?;
        Ok(FlowFuture::new(self.clone(), stage_id))
    }

    /// Start a future over the response of invoking another FaaS function.
    pub async fn invoke_function(
        &self,
        function_id: &str,
        request: crate::codec::HttpRequestValue,
    ) -> Result<FlowFuture<crate::codec::HttpResponseValue>, FlowError> {
        let datum = request.encode(self.blobs.as_ref()).await?;
        let http_req = match datum {
            Datum::HttpReq(req) => req,
            _ => unreachable!("HttpRequestValue::encode always produces Datum::HttpReq"),
        };
        let stage_id = self
            .service
            .add_invoke_function(&self.flow_id, function_id, http_req, &CodeLocation::capture())
            .await?;
        Ok(FlowFuture::new(self.clone(), stage_id))
    }

    /// Start an externally-completable future: nothing runs it, a caller outside the
    /// graph resolves it later via [`FlowFuture::complete`]/[`FlowFuture::fail`].
    pub async fn empty_future<T>(&self) -> Result<FlowFuture<T>, FlowError> {
        let stage_id = self
            .service
            .add_stage(
                &self.flow_id,
                StageOp::ExternalCompletion,
                external_completion_closure(),
                Vec::new(),
                &CodeLocation::capture(),
            )
            .await?;
        Ok(FlowFuture::new(self.clone(), stage_id))
    }

    /// Complete once every future in `futures` has completed successfully. The
    /// resulting future carries no value (SPEC_FULL.md's Open Question on `all_of`'s
    /// aggregate value is resolved in DESIGN.md: the source discards the individual
    /// values too, so this mirrors it rather than inventing a tuple/Vec payload).
    pub async fn all_of<T>(&self, futures: &[FlowFuture<T>]) -> Result<FlowFuture<()>, FlowError> {
        let deps = futures.iter().map(|f| f.stage_id.clone()).collect();
        let stage_id = self
            .service
            .add_stage(
                &self.flow_id,
                StageOp::AllOf,
                external_completion_closure(),
                deps,
                &CodeLocation::capture(),
            )
            .await?;
        Ok(FlowFuture::new(self.clone(), stage_id))
    }

    /// Complete as soon as the first of `futures` completes, successfully or not,
    /// forwarding that future's own datum untouched.
    pub async fn any_of<T>(&self, futures: &[FlowFuture<T>]) -> Result<FlowFuture<T>, FlowError> {
        let deps = futures.iter().map(|f| f.stage_id.clone()).collect();
        let stage_id = self
            .service
            .add_stage(
                &self.flow_id,
                StageOp::AnyOf,
                external_completion_closure(),
                deps,
                &CodeLocation::capture(),
            )
            .await?;
        Ok(FlowFuture::new(self.clone(), stage_id))
    }
}

#[derive(Serialize, Deserialize)]
struct ActionClosure {
    action_id: String,
}

async fn action_closure_blob(blobs: &dyn BlobClient, action_id: &str) -> Result<crate::datum::BlobRef, FlowError> {
    let bytes = serde_json::to_vec(&ActionClosure {
        action_id: action_id.to_string(),
    })
    .expect("ActionClosure always serializes");
    blobs.write("closures", JSON_MEDIA_TYPE, bytes).await
}

/// Stages with no closure to run (delays, external completions, the `all_of`/`any_of`
/// aggregates) still need a well-formed closure blob id placeholder on the wire; the
/// service never dereferences it for these operations.
fn external_completion_closure() -> crate::datum::BlobRef {
    crate::datum::BlobRef {
        prefix: "closures".to_string(),
        id: String::new(),
        content_type: JSON_MEDIA_TYPE.to_string(),
        length: 0,
    }
}

/// Client-side handle to a single stage of a [`Flow`]'s graph. `T` is the Rust type
/// the caller expects the stage to resolve to; nothing is decoded until [`Self::get`]
/// or [`Self::get_type`] is called.
pub struct FlowFuture<T = Unknown> {
    flow: Flow,
    stage_id: crate::datum::StageId,
    _marker: PhantomData<T>,
}

impl<T> Clone for FlowFuture<T> {
    fn clone(&self) -> Self {
        Self {
            flow: self.flow.clone(),
            stage_id: self.stage_id.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> FlowFuture<T> {
    pub(crate) fn new(flow: Flow, stage_id: crate::datum::StageId) -> Self {
        Self {
            flow,
            stage_id,
            _marker: PhantomData,
        }
    }

    pub fn stage_id(&self) -> &crate::datum::StageId {
        &self.stage_id
    }

    async fn add_stage(&self, op: StageOp, closure: crate::datum::BlobRef, mut deps: Vec<crate::datum::StageId>) -> Result<crate::datum::StageId, FlowError> {
        let mut all_deps = vec![self.stage_id.clone()];
        all_deps.append(&mut deps);
        self.flow
            .service
            .add_stage(self.flow.id(), op, closure, all_deps, &CodeLocation::capture())
            .await
    }

    /// Block until the stage completes and decode its result as `T`.
    pub async fn get(&self) -> Result<T, FlowError>
    where
        T: DecodeDatum,
    {
        let result = self.flow.service.await_stage_result(self.flow.id(), &self.stage_id).await?;
        T::decode(&result, self.flow.blobs(), &self.flow).await
    }

    /// Block until the stage completes and decode its result as `U`, for a future
    /// whose type was never pinned down at construction time (`FlowFuture<Unknown>`).
    pub async fn get_type<U: DecodeDatum>(&self) -> Result<U, FlowError> {
        let result = self.flow.service.await_stage_result(self.flow.id(), &self.stage_id).await?;
        U::decode(&result, self.flow.blobs(), &self.flow).await
    }

    /// Resolve this future from outside the graph. Returns `false` if it had already
    /// completed (the service's completion is first-writer-wins).
    pub async fn complete(&self, value: T) -> Result<bool, FlowError>
    where
        T: EncodeDatum,
    {
        let datum = value.encode(self.flow.blobs()).await?;
        self.flow
            .service
            .complete_stage_externally(self.flow.id(), &self.stage_id, CompletionResult::success(datum))
            .await
    }

    /// Fail this future from outside the graph with a user error message.
    pub async fn fail(&self, message: impl Into<String>) -> Result<bool, FlowError> {
        let datum = crate::codec::encode_user_error(self.flow.blobs(), message).await?;
        self.flow
            .service
            .complete_stage_externally(self.flow.id(), &self.stage_id, CompletionResult::failure(datum))
            .await
    }

    /// Chain `action` to run on this stage's value, producing a new value.
    pub async fn then_apply<U, Err>(&self, action: &Action1<T, U, Err>) -> Result<FlowFuture<U>, FlowError> {
        let closure = action_closure_blob(self.flow.blobs(), &action.id).await?;
        let stage_id = self.add_stage(StageOp::ThenApply, closure, Vec::new()).await?;
        Ok(FlowFuture::new(self.flow.clone(), stage_id))
    }

    /// Chain `action` for its side effect only; the new future carries no value.
    pub async fn then_accept<Err>(&self, action: &Action1<T, (), Err>) -> Result<FlowFuture<()>, FlowError> {
        let closure = action_closure_blob(self.flow.blobs(), &action.id).await?;
        let stage_id = self.add_stage(StageOp::ThenAccept, closure, Vec::new()).await?;
        Ok(FlowFuture::new(self.flow.clone(), stage_id))
    }

    /// Chain `action` for its side effect only, ignoring this stage's value entirely.
    pub async fn then_run<Err>(&self, action: &Action0<(), Err>) -> Result<FlowFuture<()>, FlowError> {
        let closure = action_closure_blob(self.flow.blobs(), &action.id).await?;
        let stage_id = self.add_stage(StageOp::ThenRun, closure, Vec::new()).await?;
        Ok(FlowFuture::new(self.flow.clone(), stage_id))
    }

    /// Chain `action`, which itself returns a [`FlowFuture`], and flatten the result
    /// rather than nesting futures (`FlowFuture<FlowFuture<U>>` never appears).
    pub async fn then_compose<U, Err>(
        &self,
        action: &Action1<T, FlowFuture<U>, Err>,
    ) -> Result<FlowFuture<U>, FlowError> {
        let closure = action_closure_blob(self.flow.blobs(), &action.id).await?;
        let stage_id = self.add_stage(StageOp::ThenCompose, closure, Vec::new()).await?;
        Ok(FlowFuture::new(self.flow.clone(), stage_id))
    }

    /// Combine this stage's value with `other`'s once both complete, via `action`.
    pub async fn then_combine<U, V, Err>(
        &self,
        other: &FlowFuture<U>,
        action: &Action2<T, U, V, Err>,
    ) -> Result<FlowFuture<V>, FlowError> {
        let closure = action_closure_blob(self.flow.blobs(), &action.id).await?;
        let stage_id = self
            .add_stage(StageOp::ThenCombine, closure, vec![other.stage_id.clone()])
            .await?;
        Ok(FlowFuture::new(self.flow.clone(), stage_id))
    }

    /// Run `action` for its side effect once both this stage and `other` complete.
    pub async fn then_accept_both<U, Err>(
        &self,
        other: &FlowFuture<U>,
        action: &Action2<T, U, (), Err>,
    ) -> Result<FlowFuture<()>, FlowError> {
        let closure = action_closure_blob(self.flow.blobs(), &action.id).await?;
        let stage_id = self
            .add_stage(StageOp::ThenAcceptBoth, closure, vec![other.stage_id.clone()])
            .await?;
        Ok(FlowFuture::new(self.flow.clone(), stage_id))
    }

    /// Run `action` for its side effect with whichever of this stage and `other`
    /// completes first.
    pub async fn accept_either<Err>(
        &self,
        other: &FlowFuture<T>,
        action: &Action1<T, (), Err>,
    ) -> Result<FlowFuture<()>, FlowError> {
        let closure = action_closure_blob(self.flow.blobs(), &action.id).await?;
        let stage_id = self
            .add_stage(StageOp::AcceptEither, closure, vec![other.stage_id.clone()])
            .await?;
        Ok(FlowFuture::new(self.flow.clone(), stage_id))
    }

    /// Apply `action` to whichever of this stage and `other` completes first.
    pub async fn apply_to_either<U, Err>(
        &self,
        other: &FlowFuture<T>,
        action: &Action1<T, U, Err>,
    ) -> Result<FlowFuture<U>, FlowError> {
        let closure = action_closure_blob(self.flow.blobs(), &action.id).await?;
        let stage_id = self
            .add_stage(StageOp::ApplyToEither, closure, vec![other.stage_id.clone()])
            .await?;
        Ok(FlowFuture::new(self.flow.clone(), stage_id))
    }

    /// Observe this stage's (value, error) pair without altering it: the returned
    /// future carries the same success/failure and datum this one does.
    pub async fn when_complete<Err>(
        &self,
        action: &Action1<Result<T, ErrorMessage>, (), Err>,
    ) -> Result<FlowFuture<T>, FlowError> {
        let closure = action_closure_blob(self.flow.blobs(), &action.id).await?;
        let stage_id = self.add_stage(StageOp::WhenComplete, closure, Vec::new()).await?;
        Ok(FlowFuture::new(self.flow.clone(), stage_id))
    }

    /// Map this stage's (value, error) pair to a new value regardless of which arm
    /// completed, recovering from failure the way a `catch` block would.
    pub async fn handle<U, Err>(
        &self,
        action: &Action1<Result<T, ErrorMessage>, U, Err>,
    ) -> Result<FlowFuture<U>, FlowError> {
        let closure = action_closure_blob(self.flow.blobs(), &action.id).await?;
        let stage_id = self.add_stage(StageOp::Handle, closure, Vec::new()).await?;
        Ok(FlowFuture::new(self.flow.clone(), stage_id))
    }

    /// Recover from this stage's failure with a value of the same type; has no
    /// effect if this stage succeeds.
    pub async fn exceptionally<Err>(&self, action: &Action1<ErrorMessage, T, Err>) -> Result<FlowFuture<T>, FlowError> {
        let closure = action_closure_blob(self.flow.blobs(), &action.id).await?;
        let stage_id = self.add_stage(StageOp::Exceptionally, closure, Vec::new()).await?;
        Ok(FlowFuture::new(self.flow.clone(), stage_id))
    }

    /// Recover from this stage's failure by chaining into another future, flattened
    /// the same way [`Self::then_compose`] flattens a successful chain.
    pub async fn exceptionally_compose<Err>(
        &self,
        action: &Action1<ErrorMessage, FlowFuture<T>, Err>,
    ) -> Result<FlowFuture<T>, FlowError> {
        let closure = action_closure_blob(self.flow.blobs(), &action.id).await?;
        let stage_id = self
            .add_stage(StageOp::ExceptionallyCompose, closure, Vec::new())
            .await?;
        Ok(FlowFuture::new(self.flow.clone(), stage_id))
    }
}

#[async_trait]
impl<T: Send> EncodeDatum for FlowFuture<T> {
    async fn encode(self, _blobs: &dyn BlobClient) -> Result<Datum, FlowError> {
        Ok(Datum::StageRef {
            stage_id: self.stage_id,
        })
    }
}

#[async_trait]
impl<T: Send> DecodeDatum for FlowFuture<T> {
    async fn decode(result: &CompletionResult, _blobs: &dyn BlobClient, flow: &Flow) -> Result<Self, FlowError> {
        match &result.datum {
            Datum::StageRef { stage_id } => Ok(FlowFuture::new(flow.clone(), stage_id.clone())),
            other => Err(FlowError::Codec(crate::codec::CodecError::VariantMismatch {
                found: match other {
                    Datum::Empty => "Empty",
                    Datum::Blob(_) => "Blob",
                    Datum::StageRef { .. } => "StageRef",
                    Datum::HttpReq(_) => "HttpReq",
                    Datum::HttpResp(_) => "HttpResp",
                    Datum::Error { .. } => "Error",
                    Datum::Status { .. } => "Status",
                },
            })),
        }
    }
}

/// Test-only helpers for building a [`Flow`] backed entirely by in-memory fakes,
/// used throughout this crate's unit tests so the codec and composition algebra can
/// be exercised without a real Flow service.
pub mod test_support {
    use super::Flow;
    use crate::blob::InMemoryBlobClient;
    use crate::service_client::{FlowId, InMemoryServiceClient};
    use std::sync::Arc;

    /// A `Flow` over a fresh, empty `InMemoryServiceClient` and `InMemoryBlobClient`.
    pub fn fake_flow() -> Flow {
        Flow::new(
            Arc::new(InMemoryServiceClient::new()),
            Arc::new(InMemoryBlobClient::new()),
            FlowId("test-flow".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionRegistry;
    use crate::codec::Gob;
    use crate::service_client::{FlowId, InMemoryServiceClient};
    use std::sync::Arc;

    fn test_flow() -> (Flow, Arc<InMemoryServiceClient>) {
        let service = Arc::new(InMemoryServiceClient::new());
        let blobs = Arc::new(crate::blob::InMemoryBlobClient::new());
        let flow = Flow::new(service.clone(), blobs, FlowId("flow-1".to_string()));
        (flow, service)
    }

    #[tokio::test]
    async fn completed_value_round_trips() {
        let (flow, _service) = test_flow();
        let future = flow.completed_value(Gob(41i64)).await.unwrap();
        let Gob(value) = future.get().await.unwrap();
        assert_eq!(value, 41);
    }

    #[tokio::test]
    async fn then_apply_chains_a_registered_action() {
        let (flow, service) = test_flow();
        let registry = ActionRegistry::global();
        let action = registry
            .register1("flow_tests::increment", |Gob(n): Gob<i64>| async move {
                Ok::<_, std::convert::Infallible>(Gob(n + 1))
            })
            .unwrap();

        let start = flow.completed_value(Gob(1i64)).await.unwrap();
        let next = start.then_apply(&action).await.unwrap();

        // The in-memory service client does not actually run continuations, so the
        // test plays the role of the remote scheduler: it seeds the stage's result
        // directly to simulate the service having dispatched and completed it.
        let blobs = crate::blob::InMemoryBlobClient::new();
        let datum = Gob(2i64).encode(&blobs).await.unwrap();
        service.seed_result(flow.id(), next.stage_id(), CompletionResult::success(datum));

        let Gob(value) = next.get().await.unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn complete_stage_externally_resolves_empty_future() {
        let (flow, _service) = test_flow();
        let future: FlowFuture<Gob<i64>> = flow.empty_future().await.unwrap();
        let did_complete = future.complete(Gob(7)).await.unwrap();
        assert!(did_complete);
        let Gob(value) = future.get().await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn double_complete_of_empty_future_returns_false() {
        let (flow, _service) = test_flow();
        let future: FlowFuture<Gob<i64>> = flow.empty_future().await.unwrap();
        assert!(future.complete(Gob(1)).await.unwrap());
        assert!(!future.complete(Gob(2)).await.unwrap());
    }

    #[tokio::test]
    async fn flow_future_encodes_as_a_stage_ref() {
        let (flow, _service) = test_flow();
        let future = flow.completed_value(Gob(1i64)).await.unwrap();
        let blobs = crate::blob::InMemoryBlobClient::new();
        let datum = future.clone().encode(&blobs).await.unwrap();
        assert!(matches!(datum, Datum::StageRef { .. }));
    }
}
