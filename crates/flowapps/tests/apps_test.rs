use flowapps::{register_all, DelayFor, ParseJson, StringifyJson};
use flowcore::{
    json_object, Action, ActionSink, AppDescriptor, AuthHandle, ExecutionStatus,
    ExecutionStepStatus, Flow, JsonObject, RunContext, Step, StepScope, StepType,
};
use flowruntime::{AppRegistry, FlowRuntime};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

fn runtime() -> FlowRuntime {
    let mut registry = AppRegistry::new();
    register_all(&mut registry);
    FlowRuntime::new(registry)
}

fn context(app: &str, key: &str, parameters: serde_json::Value) -> RunContext {
    RunContext::new(
        Arc::new(AppDescriptor::new(app, app)),
        AuthHandle::detached(JsonObject::new()),
    )
    .with_step(StepScope {
        id: Uuid::new_v4(),
        app_key: app.to_string(),
        key: key.to_string(),
        parameters: json_object(parameters),
    })
}

#[test]
fn test_all_apps_registered() {
    let mut registry = AppRegistry::new();
    register_all(&mut registry);

    for app in ["scheduler", "webhook", "http", "debug", "formatter", "delay"] {
        assert!(registry.app(app).is_ok(), "missing app {}", app);
    }
    assert!(registry.trigger("scheduler", "every_interval").is_ok());
    assert!(registry.trigger("webhook", "catch_raw_webhook").is_ok());
    assert!(registry.action("http", "send_request").is_ok());
    assert!(registry.action("delay", "delay_until").is_ok());
}

#[tokio::test]
async fn test_webhook_flow_end_to_end() {
    let runtime = runtime();
    let mut flow = Flow::new("echo", "user-1").with_trigger("webhook", "catch_raw_webhook", JsonObject::new());
    flow.add_step(
        Step::new(StepType::Action, "formatter", "stringify_json")
            .with_parameter("value", json!({ "repo": "{{ trigger.repository }}" })),
    );
    flow.add_step(
        Step::new(StepType::Action, "debug", "log")
            .with_parameter("message", "{{ previous.json }}"),
    );
    let flow_id = runtime.register_flow(flow.activate()).await.unwrap();

    let report = runtime
        .handle_webhook(flow_id, json!({ "repository": "engine" }))
        .await
        .unwrap();

    assert!(report.succeeded());
    let (execution, steps) = runtime.execution(report.executions[0].id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[0].data_out["repository"], "engine");
    assert_eq!(steps[1].data_out["json"], r#"{"repo":"engine"}"#);
    assert_eq!(steps[2].data_out["message"], r#"{"repo":"engine"}"#);
}

#[tokio::test]
async fn test_scheduler_fires_once_per_bucket() {
    let runtime = runtime();
    let mut params = JsonObject::new();
    params.insert("interval".to_string(), json!("every_day"));
    let mut flow = Flow::new("daily", "user-1").with_trigger("scheduler", "every_interval", params);
    flow.add_step(Step::new(StepType::Action, "debug", "log").with_parameter("message", "tick"));
    let flow_id = runtime.register_flow(flow).await.unwrap();

    let first = runtime.run_flow(flow_id).await.unwrap();
    assert_eq!(first.processed(), 1);

    let second = runtime.run_flow(flow_id).await.unwrap();
    assert_eq!(second.processed(), 0);
    assert!(second.succeeded());
}

#[tokio::test]
async fn test_failed_parse_is_recorded_on_the_step() {
    let runtime = runtime();
    let mut flow = Flow::new("parse", "user-1").with_trigger("webhook", "catch_raw_webhook", JsonObject::new());
    flow.add_step(
        Step::new(StepType::Action, "formatter", "parse_json")
            .with_parameter("input", "{{ trigger.payload }}"),
    );
    flow.add_step(Step::new(StepType::Action, "debug", "log"));
    let flow_id = runtime.register_flow(flow.activate()).await.unwrap();

    let report = runtime
        .handle_webhook(flow_id, json!({ "payload": "{not json" }))
        .await
        .unwrap();

    let (execution, steps) = runtime.execution(report.executions[0].id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[1].status, ExecutionStepStatus::Failure);
    assert!(steps[1].error_details.contains_key("error"));
}

#[tokio::test]
async fn test_parse_and_stringify() {
    let ctx = context("formatter", "parse_json", json!({ "input": "[1, 2]" }));
    let (sink, mut rx) = ActionSink::channel();
    ParseJson.run(&ctx, &sink).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().raw["value"], json!([1, 2]));

    let ctx = context("formatter", "stringify_json", json!({ "value": { "a": 1 }, "pretty": "true" }));
    let (sink, mut rx) = ActionSink::channel();
    StringifyJson.run(&ctx, &sink).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().raw["json"], "{\n  \"a\": 1\n}");
}

#[tokio::test]
async fn test_delay_stops_on_cancellation() {
    let ctx = context("delay", "delay_for", json!({ "amount": 30, "unit": "seconds" }));
    let (sink, _rx) = ActionSink::channel();

    let token = ctx.cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let started = Instant::now();
    let err = DelayFor.run(&ctx, &sink).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(err.to_string().contains("cancelled"));
}

#[tokio::test]
async fn test_short_delay_completes() {
    let ctx = context("delay", "delay_for", json!({ "amount": "5", "unit": "ms" }));
    let (sink, mut rx) = ActionSink::channel();
    DelayFor.run(&ctx, &sink).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().raw["delayed_ms"], 5);
}
