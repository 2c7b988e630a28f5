mod common;

use common::{feed_flow, init_tracing, registry, tag, Calls, Feed};
use flowcore::{
    ExecutionEvent, ExecutionStatus, Flow, FlowError, JsonObject, Step, StepType,
};
use flowruntime::{FlowRuntime, RuntimeConfig};
use serde_json::json;
use std::time::Duration;

fn runtime() -> (FlowRuntime, Feed, Calls) {
    init_tracing();
    let feed = Feed::default();
    let calls = Calls::default();
    let runtime = FlowRuntime::with_config(registry(&feed, &calls), RuntimeConfig::default());
    (runtime, feed, calls)
}

fn webhook_flow() -> Flow {
    let mut flow = Flow::new("on push", "user-1").with_trigger("test", "hook", JsonObject::new());
    flow.add_step(
        Step::new(StepType::Action, "test", "record")
            .with_parameter("tag", "{{ trigger.ref }}"),
    );
    flow
}

#[tokio::test]
async fn test_invalid_flows_are_rejected() {
    let (runtime, _, _) = runtime();
    let flow = Flow::new("no trigger", "user-1").with_action("test", "record", JsonObject::new());
    assert!(matches!(
        runtime.register_flow(flow).await,
        Err(FlowError::Definition(_))
    ));

    let flow = Flow::new("unknown", "user-1").with_trigger("nope", "feed", JsonObject::new());
    assert!(runtime.register_flow(flow).await.is_err());
}

#[tokio::test]
async fn test_run_updates_step_outputs_and_is_queryable() {
    let (runtime, feed, _) = runtime();
    let flow_id = runtime
        .register_flow(feed_flow(&[("record", tag("done"))]))
        .await
        .unwrap();
    feed.set(&[1]);

    let report = runtime.run_flow(flow_id).await.unwrap();
    assert!(report.succeeded());

    let flow = runtime.get_flow(flow_id).await.unwrap();
    let action = flow.actions()[0];
    assert_eq!(action.output.as_ref().unwrap()["tag"], "done");
    assert_eq!(flow.trigger().unwrap().output.as_ref().unwrap()["id"], 1);

    let executions = runtime.executions(flow_id).await.unwrap();
    assert_eq!(executions.len(), 1);
    let (execution, steps) = runtime.execution(executions[0].id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(steps.len(), 2);
}

#[tokio::test]
async fn test_webhook_runs_only_for_active_flows() {
    let (runtime, _, calls) = runtime();
    let flow_id = runtime.register_flow(webhook_flow()).await.unwrap();

    let err = runtime
        .handle_webhook(flow_id, json!({ "ref": "main" }))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Inactive(_)));

    runtime.activate(flow_id).await.unwrap();
    assert!(!runtime.is_polling(flow_id));

    let report = runtime
        .handle_webhook(flow_id, json!({ "ref": "main" }))
        .await
        .unwrap();
    assert!(report.succeeded());
    assert_eq!(calls.all(), vec!["main"]);

    // Each receipt is a new event
    runtime
        .handle_webhook(flow_id, json!({ "ref": "dev" }))
        .await
        .unwrap();
    assert_eq!(calls.all(), vec!["main", "dev"]);
}

#[tokio::test]
async fn test_test_run_reports_without_activation() {
    let (runtime, feed, calls) = runtime();
    let flow_id = runtime
        .register_flow(feed_flow(&[("record", tag("t"))]))
        .await
        .unwrap();
    feed.set(&[1, 2]);

    let report = runtime.test_run(flow_id, None).await.unwrap();

    assert!(report.test_run);
    assert_eq!(report.executions.len(), 1);
    assert_eq!(calls.all(), vec!["t"]);
}

#[tokio::test]
async fn test_active_flow_polls_until_deactivated() {
    let (runtime, feed, _) = runtime();
    let flow_id = runtime
        .register_flow(feed_flow(&[("record", tag("p"))]))
        .await
        .unwrap();
    runtime.activate(flow_id).await.unwrap();
    assert!(runtime.is_polling(flow_id));

    tokio::time::sleep(Duration::from_millis(200)).await;
    runtime.deactivate(flow_id).await.unwrap();
    assert!(!runtime.is_polling(flow_id));

    let polls = feed.polls();
    assert!(polls >= 2, "expected repeated polls, got {}", polls);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(feed.polls() <= polls + 1);
}

#[tokio::test]
async fn test_lifecycle_events_are_broadcast() {
    let (runtime, feed, _) = runtime();
    let mut events = runtime.subscribe_events();
    let flow_id = runtime
        .register_flow(feed_flow(&[("record", tag("e"))]))
        .await
        .unwrap();
    feed.set(&[1]);

    runtime.run_flow(flow_id).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(ExecutionEvent::CycleStarted { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, ExecutionEvent::StepCompleted { .. })));
    assert!(seen.iter().any(|e| matches!(
        e,
        ExecutionEvent::ExecutionCompleted { status: ExecutionStatus::Succeeded, .. }
    )));
    assert!(matches!(
        seen.last(),
        Some(ExecutionEvent::CycleCompleted { processed: 1, .. })
    ));
}
