//! End-to-end composition tests driven entirely against in-memory fakes: a real
//! Flow service would run continuations out-of-process, so these tests play the
//! scheduler's role themselves by seeding stage results directly on the
//! `InMemoryServiceClient`, then assert on what `FlowFuture::get` observes.

use std::sync::Arc;

use flow_sdk::blob::InMemoryBlobClient;
use flow_sdk::codec::{EncodeDatum, ErrorMessage, Gob, HttpRequestValue, HttpResponseValue};
use flow_sdk::datum::{CompletionResult, HttpMethod};
use flow_sdk::error::FlowError;
use flow_sdk::flow::Flow;
use flow_sdk::service_client::{FlowId, InMemoryServiceClient};

fn test_flow() -> (Flow, Arc<InMemoryServiceClient>, Arc<InMemoryBlobClient>) {
    let service = Arc::new(InMemoryServiceClient::new());
    let blobs = Arc::new(InMemoryBlobClient::new());
    let flow = Flow::new(service.clone(), blobs.clone(), FlowId("flow-1".to_string()));
    (flow, service, blobs)
}

#[tokio::test]
async fn string_pipeline_chains_two_actions() {
    let (flow, service, blobs) = test_flow();
    let registry = flow_sdk::action::ActionRegistry::global();
    let upper = registry
        .register1(
            "flow_composition_tests::upper",
            |Gob(s): Gob<String>| async move { Ok::<_, std::convert::Infallible>(Gob(s.to_uppercase())) },
        )
        .unwrap();
    let exclaim = registry
        .register1(
            "flow_composition_tests::exclaim",
            |Gob(s): Gob<String>| async move { Ok::<_, std::convert::Infallible>(Gob(format!("{s}!"))) },
        )
        .unwrap();

    let start = flow.completed_value(Gob("hello".to_string())).await.unwrap();
    let uppered = start.then_apply(&upper).await.unwrap();
    let exclaimed = uppered.then_apply(&exclaim).await.unwrap();

    // Simulate the service running each continuation, innermost first.
    let upper_datum = Gob("HELLO".to_string()).encode(blobs.as_ref()).await.unwrap();
    service.seed_result(flow.id(), uppered.stage_id(), CompletionResult::success(upper_datum));
    let exclaim_datum = Gob("HELLO!".to_string()).encode(blobs.as_ref()).await.unwrap();
    service.seed_result(flow.id(), exclaimed.stage_id(), CompletionResult::success(exclaim_datum));

    let Gob(result) = exclaimed.get().await.unwrap();
    assert_eq!(result, "HELLO!");
}

#[tokio::test]
async fn failure_propagates_and_handle_recovers() {
    let (flow, service, blobs) = test_flow();
    let registry = flow_sdk::action::ActionRegistry::global();
    let recover = registry
        .register1(
            "flow_composition_tests::recover",
            |outcome: Result<Gob<i64>, ErrorMessage>| async move {
                let value = match outcome {
                    Ok(Gob(n)) => n,
                    Err(ErrorMessage(_)) => -1,
                };
                Ok::<_, std::convert::Infallible>(Gob(value))
            },
        )
        .unwrap();

    let failing = flow.completed_value(Gob(0i64)).await.unwrap();
    let handled = failing.handle(&recover).await.unwrap();

    let err_datum = flow_sdk::codec::encode_user_error(blobs.as_ref(), "boom").await.unwrap();
    service.seed_result(flow.id(), failing.stage_id(), CompletionResult::failure(err_datum.clone()));
    // The handled stage is a distinct stage; its completion is what the (fake)
    // service would compute by running `recover` against the failure above.
    let recovered_datum = Gob(-1i64).encode(blobs.as_ref()).await.unwrap();
    service.seed_result(flow.id(), handled.stage_id(), CompletionResult::success(recovered_datum));

    let Gob(value) = handled.get().await.unwrap();
    assert_eq!(value, -1);

    // And the original stage, fetched directly, still reports failure.
    let original = failing.get().await;
    assert!(original.is_err());
}

#[tokio::test]
async fn delay_then_run_chain_completes_with_no_value() {
    let (flow, service, _blobs) = test_flow();
    let registry = flow_sdk::action::ActionRegistry::global();
    let mark_done = registry
        .register0("flow_composition_tests::mark_done", || async {
            Ok::<_, std::convert::Infallible>(())
        })
        .unwrap();

    let delayed = flow.delay(std::time::Duration::from_millis(1)).await.unwrap();
    let done = delayed.then_run(&mark_done).await.unwrap();

    service.seed_result(flow.id(), delayed.stage_id(), CompletionResult::success(flow_sdk::datum::Datum::Empty));
    service.seed_result(flow.id(), done.stage_id(), CompletionResult::success(flow_sdk::datum::Datum::Empty));

    done.get().await.unwrap();
}

#[tokio::test]
async fn any_of_completes_with_the_first_finisher() {
    let (flow, service, blobs) = test_flow();
    let slow = flow.completed_value(Gob(1i64)).await.unwrap();
    let fast = flow.completed_value(Gob(2i64)).await.unwrap();
    let first = flow.any_of(&[slow.clone(), fast.clone()]).await.unwrap();

    let datum = Gob(2i64).encode(blobs.as_ref()).await.unwrap();
    service.seed_result(flow.id(), first.stage_id(), CompletionResult::success(datum));

    let Gob(value) = first.get_type::<Gob<i64>>().await.unwrap();
    assert_eq!(value, 2);
}

#[tokio::test]
async fn external_completion_resolves_exactly_once() {
    let (flow, _service, _blobs) = test_flow();
    let future: flow_sdk::flow::FlowFuture<Gob<String>> = flow.empty_future().await.unwrap();

    let first = future.complete(Gob("done".to_string())).await.unwrap();
    let second = future.complete(Gob("again".to_string())).await.unwrap();
    assert!(first);
    assert!(!second);

    let Gob(value) = future.get().await.unwrap();
    assert_eq!(value, "done");
}

#[tokio::test]
async fn invoke_function_resolves_to_an_http_response() {
    let (flow, service, blobs) = test_flow();
    let request = HttpRequestValue {
        method: HttpMethod::Post,
        headers: vec![("content-type".to_string(), "text/plain".to_string())],
        body: b"ping".to_vec(),
    };
    let future = flow.invoke_function("app/other-fn", request).await.unwrap();

    let response = HttpResponseValue {
        status_code: 200,
        headers: vec![],
        body: b"pong".to_vec(),
    };
    let datum = response.encode(blobs.as_ref()).await.unwrap();
    service.seed_result(flow.id(), future.stage_id(), CompletionResult::success(datum));

    let resolved = future.get().await.unwrap();
    assert_eq!(resolved.status_code, 200);
    assert_eq!(resolved.body, b"pong");
}

#[tokio::test]
async fn no_active_flow_outside_with_flow_is_an_error() {
    assert!(matches!(flow_sdk::dispatch::current_flow(), Err(FlowError::NoActiveFlow)));
}
