//! Action Registry: maps a symbolic action id to the Rust closure that runs it.
//!
//! A continuation invocation only carries an action id and its argument data on the
//! wire (SPEC_FULL.md section 4.5) — it cannot carry a closure. Every closure passed
//! to a composition operator (`then_apply`, `then_compose`, ...) is therefore
//! registered once, at process startup, under a stable id, and the composition
//! operator only ever ships that id. This mirrors the teacher's `Action` trait /
//! `NodeRegistry`-style indirection (`src/action.rs`, `src/core/action.rs` in
//! echozyr2001-PocketFlow-rs), generalized here to be arity-typed instead of
//! shared-store-typed.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use crate::blob::BlobClient;
use crate::codec::{DecodeDatum, EncodeDatum, encode_user_error};
use crate::datum::{CompletionResult, Datum};
use crate::error::FlowError;
use crate::flow::Flow;

/// Type-erased, arity-erased action, as stored in the registry. Typed [`Action0`],
/// [`Action1`] and [`Action2`] handles are thin wrappers over an id that, at
/// invocation time, look the concrete action back up and call through this trait.
#[async_trait]
trait ErasedAction: Send + Sync {
    fn arity(&self) -> usize;
    async fn invoke(
        &self,
        args: Vec<CompletionResult>,
        blobs: &dyn BlobClient,
        flow: &Flow,
    ) -> Result<Datum, FlowError>;
}

async fn encode_action_result<Out, Err>(
    result: Result<Out, Err>,
    blobs: &dyn BlobClient,
) -> Result<Datum, FlowError>
where
    Out: EncodeDatum,
    Err: std::fmt::Display,
{
    match result {
        Ok(out) => out.encode(blobs).await,
        Err(err) => encode_user_error(blobs, err.to_string()).await,
    }
}

struct ErasedAction0<F, Fut, Out, Err> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
    _out: PhantomData<(Out, Err)>,
}

#[async_trait]
impl<F, Fut, Out, Err> ErasedAction for ErasedAction0<F, Fut, Out, Err>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, Err>> + Send,
    Out: EncodeDatum + Send + 'static,
    Err: std::fmt::Display + Send + 'static,
{
    fn arity(&self) -> usize {
        0
    }

    async fn invoke(
        &self,
        _args: Vec<CompletionResult>,
        blobs: &dyn BlobClient,
        _flow: &Flow,
    ) -> Result<Datum, FlowError> {
        encode_action_result((self.f)().await, blobs).await
    }
}

struct ErasedAction1<F, Fut, Arg, Out, Err> {
    f: F,
    _marker: PhantomData<fn(Arg) -> Fut>,
    _out: PhantomData<(Out, Err)>,
}

#[async_trait]
impl<F, Fut, Arg, Out, Err> ErasedAction for ErasedAction1<F, Fut, Arg, Out, Err>
where
    F: Fn(Arg) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, Err>> + Send,
    Arg: DecodeDatum + Send + 'static,
    Out: EncodeDatum + Send + 'static,
    Err: std::fmt::Display + Send + 'static,
{
    fn arity(&self) -> usize {
        1
    }

    async fn invoke(
        &self,
        args: Vec<CompletionResult>,
        blobs: &dyn BlobClient,
        flow: &Flow,
    ) -> Result<Datum, FlowError> {
        let arg = Arg::decode(&args[0], blobs, flow).await?;
        encode_action_result((self.f)(arg).await, blobs).await
    }
}

struct ErasedAction2<F, Fut, Arg0, Arg1, Out, Err> {
    f: F,
    _marker: PhantomData<fn(Arg0, Arg1) -> Fut>,
    _out: PhantomData<(Out, Err)>,
}

#[async_trait]
impl<F, Fut, Arg0, Arg1, Out, Err> ErasedAction for ErasedAction2<F, Fut, Arg0, Arg1, Out, Err>
where
    F: Fn(Arg0, Arg1) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, Err>> + Send,
    Arg0: DecodeDatum + Send + 'static,
    Arg1: DecodeDatum + Send + 'static,
    Out: EncodeDatum + Send + 'static,
    Err: std::fmt::Display + Send + 'static,
{
    fn arity(&self) -> usize {
        2
    }

    async fn invoke(
        &self,
        args: Vec<CompletionResult>,
        blobs: &dyn BlobClient,
        flow: &Flow,
    ) -> Result<Datum, FlowError> {
        let arg0 = Arg0::decode(&args[0], blobs, flow).await?;
        let arg1 = Arg1::decode(&args[1], blobs, flow).await?;
        encode_action_result((self.f)(arg0, arg1).await, blobs).await
    }
}

/// Typed handle to a zero-argument registered action. Carries no function pointer,
/// only the id the Flow service will echo back on the continuation invocation.
pub struct Action0<Out, Err> {
    pub(crate) id: String,
    _marker: PhantomData<fn() -> Result<Out, Err>>,
}

impl<Out, Err> Clone for Action0<Out, Err> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

/// Typed handle to a one-argument registered action.
pub struct Action1<Arg, Out, Err> {
    pub(crate) id: String,
    _marker: PhantomData<fn(Arg) -> Result<Out, Err>>,
}

impl<Arg, Out, Err> Clone for Action1<Arg, Out, Err> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

/// Typed handle to a two-argument registered action.
pub struct Action2<Arg0, Arg1, Out, Err> {
    pub(crate) id: String,
    _marker: PhantomData<fn(Arg0, Arg1) -> Result<Out, Err>>,
}

impl<Arg0, Arg1, Out, Err> Clone for Action2<Arg0, Arg1, Out, Err> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

/// Process-wide table of registered actions, keyed by the id passed to `register*`.
/// Registration is idempotent: re-registering the same id is only accepted if the
/// declared arity matches, which lets a continuation invocation re-run the same
/// `with_flow` entry point and land on the same registry contents it built on the
/// first (flow-creating) invocation.
pub struct ActionRegistry {
    actions: Mutex<HashMap<String, Arc<dyn ErasedAction>>>,
}

impl ActionRegistry {
    fn new() -> Self {
        Self {
            actions: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry, shared by every `Flow` in this process.
    pub fn global() -> &'static ActionRegistry {
        static REGISTRY: Lazy<ActionRegistry> = Lazy::new(ActionRegistry::new);
        &REGISTRY
    }

    fn insert(&self, id: &str, arity: usize, action: Arc<dyn ErasedAction>) -> Result<(), FlowError> {
        let mut actions = self.actions.lock().expect("lock poisoned");
        if let Some(existing) = actions.get(id) {
            if existing.arity() != arity {
                return Err(FlowError::ArityMismatch {
                    action: id.to_string(),
                    expected: existing.arity(),
                    actual: arity,
                });
            }
            return Ok(());
        }
        actions.insert(id.to_string(), action);
        Ok(())
    }

    pub fn register0<F, Fut, Out, Err>(&self, id: &str, f: F) -> Result<Action0<Out, Err>, FlowError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, Err>> + Send + 'static,
        Out: EncodeDatum + Send + 'static,
        Err: std::fmt::Display + Send + 'static,
    {
        let erased = Arc::new(ErasedAction0 {
            f,
            _marker: PhantomData,
            _out: PhantomData,
        });
        self.insert(id, 0, erased)?;
        Ok(Action0 {
            id: id.to_string(),
            _marker: PhantomData,
        })
    }

    pub fn register1<F, Fut, Arg, Out, Err>(
        &self,
        id: &str,
        f: F,
    ) -> Result<Action1<Arg, Out, Err>, FlowError>
    where
        F: Fn(Arg) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, Err>> + Send + 'static,
        Arg: DecodeDatum + Send + 'static,
        Out: EncodeDatum + Send + 'static,
        Err: std::fmt::Display + Send + 'static,
    {
        let erased = Arc::new(ErasedAction1 {
            f,
            _marker: PhantomData,
            _out: PhantomData,
        });
        self.insert(id, 1, erased)?;
        Ok(Action1 {
            id: id.to_string(),
            _marker: PhantomData,
        })
    }

    pub fn register2<F, Fut, Arg0, Arg1, Out, Err>(
        &self,
        id: &str,
        f: F,
    ) -> Result<Action2<Arg0, Arg1, Out, Err>, FlowError>
    where
        F: Fn(Arg0, Arg1) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, Err>> + Send + 'static,
        Arg0: DecodeDatum + Send + 'static,
        Arg1: DecodeDatum + Send + 'static,
        Out: EncodeDatum + Send + 'static,
        Err: std::fmt::Display + Send + 'static,
    {
        let erased = Arc::new(ErasedAction2 {
            f,
            _marker: PhantomData,
            _out: PhantomData,
        });
        self.insert(id, 2, erased)?;
        Ok(Action2 {
            id: id.to_string(),
            _marker: PhantomData,
        })
    }

    /// Look up `id` and run it against `args`, used by the continuation executor.
    pub async fn invoke(
        &self,
        id: &str,
        args: Vec<CompletionResult>,
        blobs: &dyn BlobClient,
        flow: &Flow,
    ) -> Result<Datum, FlowError> {
        let action = {
            let actions = self.actions.lock().expect("lock poisoned");
            actions
                .get(id)
                .cloned()
                .ok_or_else(|| FlowError::UnregisteredAction(id.to_string()))?
        };
        // A 0-arity action ignores whatever upstream completion datums arrive with
        // the continuation (matching `continuations.go`'s handling of a zero-arg
        // reflected function); only arity > 0 needs an exact count match.
        if action.arity() > 0 && action.arity() != args.len() {
            return Err(FlowError::ArityMismatch {
                action: id.to_string(),
                expected: action.arity(),
                actual: args.len(),
            });
        }
        action.invoke(args, blobs, flow).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobClient;
    use crate::codec::Gob;
    use crate::flow::test_support::fake_flow;

    #[tokio::test]
    async fn register_and_invoke_a_one_arg_action() {
        let registry = ActionRegistry::new();
        let handle: Action1<Gob<i64>, Gob<i64>, std::convert::Infallible> = registry
            .register1("double", |Gob(n): Gob<i64>| async move { Ok(Gob(n * 2)) })
            .unwrap();

        let blobs = InMemoryBlobClient::new();
        let flow = fake_flow();
        let arg_datum = Gob(21i64).encode(&blobs).await.unwrap();
        let datum = registry
            .invoke(
                &handle.id,
                vec![CompletionResult::success(arg_datum)],
                &blobs,
                &flow,
            )
            .await
            .unwrap();
        let result = CompletionResult::success(datum);
        let Gob(out) = Gob::<i64>::decode(&result, &blobs, &flow).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn reregistering_with_mismatched_arity_errors() {
        let registry = ActionRegistry::new();
        let _: Action0<Gob<i64>, std::convert::Infallible> = registry
            .register0("id", || async { Ok(Gob(1i64)) })
            .unwrap();
        let err = registry
            .register1::<_, _, Gob<i64>, Gob<i64>, std::convert::Infallible>("id", |Gob(n)| async move {
                Ok(Gob(n))
            })
            .unwrap_err();
        assert!(matches!(err, FlowError::ArityMismatch { .. }));
    }

    #[tokio::test]
    async fn invoking_unknown_action_is_an_error() {
        let registry = ActionRegistry::new();
        let blobs = InMemoryBlobClient::new();
        let flow = fake_flow();
        let err = registry.invoke("missing", vec![], &blobs, &flow).await.unwrap_err();
        assert!(matches!(err, FlowError::UnregisteredAction(_)));
    }
}
