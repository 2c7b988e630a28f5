#![allow(dead_code)]

use async_trait::async_trait;
use flowcore::{
    json_object, Action, ActionItem, ActionSink, App, AppDescriptor, Authentication, EventBus,
    Flow, IntegrationError, JsonObject, JsonObjectExt, RunContext, Step, StepType, Trigger,
    TriggerItem, TriggerKind, TriggerSink,
};
use flowruntime::{
    AppRegistry, AuthenticationManager, DedupStore, ExecutionCoordinator, ExecutionStore,
    MemoryStore, RuntimeConfig,
};
use serde_json::json;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Items the feed trigger will push on its next poll
#[derive(Clone, Default)]
pub struct Feed {
    ids: Arc<Mutex<Vec<u64>>>,
    fail: Arc<AtomicBool>,
    polls: Arc<AtomicUsize>,
}

impl Feed {
    pub fn set(&self, ids: &[u64]) {
        *self.ids.lock().unwrap() = ids.to_vec();
    }

    /// Fail every poll after pushing the configured items
    pub fn fail_after_push(&self, fail: bool) {
        self.fail.store(fail, AtomicOrdering::SeqCst);
    }

    pub fn polls(&self) -> usize {
        self.polls.load(AtomicOrdering::SeqCst)
    }
}

pub struct FeedTrigger(pub Feed);

#[async_trait]
impl Trigger for FeedTrigger {
    fn key(&self) -> &str {
        "feed"
    }

    fn name(&self) -> &str {
        "Feed"
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(Duration::from_millis(25))
    }

    async fn run(&self, _ctx: &RunContext, items: &TriggerSink) -> Result<(), IntegrationError> {
        self.0.polls.fetch_add(1, AtomicOrdering::SeqCst);
        let ids = self.0.ids.lock().unwrap().clone();
        for id in ids {
            let raw = json_object(json!({ "id": id, "title": format!("item {}", id) }));
            items.push(TriggerItem::new(id, raw)).await?;
        }
        if self.0.fail.load(AtomicOrdering::SeqCst) {
            return Err(IntegrationError::new("feed unavailable").with_detail("status", 503));
        }
        Ok(())
    }

    fn sort(&self, item: &TriggerItem, next_item: &TriggerItem) -> Ordering {
        item.internal_id().cmp(next_item.internal_id())
    }
}

/// Pushes the webhook payload as its only item
pub struct HookTrigger;

#[async_trait]
impl Trigger for HookTrigger {
    fn key(&self) -> &str {
        "hook"
    }

    fn name(&self) -> &str {
        "Hook"
    }

    fn kind(&self) -> TriggerKind {
        TriggerKind::Webhook
    }

    async fn run(&self, ctx: &RunContext, items: &TriggerSink) -> Result<(), IntegrationError> {
        let raw = json_object(ctx.request.clone().unwrap_or_default());
        items
            .push(TriggerItem::new(uuid::Uuid::new_v4().to_string(), raw))
            .await
    }
}

/// Tags seen by the record action, in call order
#[derive(Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    pub fn push(&self, tag: String) {
        self.0.lock().unwrap().push(tag);
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Echoes its parameters and records the `tag` parameter
pub struct Record(pub Calls);

#[async_trait]
impl Action for Record {
    fn key(&self) -> &str {
        "record"
    }

    fn name(&self) -> &str {
        "Record"
    }

    async fn run(&self, ctx: &RunContext, output: &ActionSink) -> Result<(), IntegrationError> {
        let tag = ctx.parameters().get_str("tag").unwrap_or_default().to_string();
        self.0.push(tag);
        output.set(ActionItem::new(ctx.parameters().clone()))
    }
}

pub struct Fail;

#[async_trait]
impl Action for Fail {
    fn key(&self) -> &str {
        "fail"
    }

    fn name(&self) -> &str {
        "Fail"
    }

    async fn run(&self, _ctx: &RunContext, _output: &ActionSink) -> Result<(), IntegrationError> {
        Err(IntegrationError::new("remote rejected").with_detail("code", "E42"))
    }
}

pub struct Silent;

#[async_trait]
impl Action for Silent {
    fn key(&self) -> &str {
        "silent"
    }

    fn name(&self) -> &str {
        "Silent"
    }

    async fn run(&self, _ctx: &RunContext, _output: &ActionSink) -> Result<(), IntegrationError> {
        Ok(())
    }
}

pub struct Slow;

#[async_trait]
impl Action for Slow {
    fn key(&self) -> &str {
        "slow"
    }

    fn name(&self) -> &str {
        "Slow"
    }

    async fn run(&self, _ctx: &RunContext, output: &ActionSink) -> Result<(), IntegrationError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        output.set(ActionItem::default())
    }
}

/// Sleeps for its `ms` parameter, then echoes its parameters
pub struct Pause(pub Calls);

#[async_trait]
impl Action for Pause {
    fn key(&self) -> &str {
        "pause"
    }

    fn name(&self) -> &str {
        "Pause"
    }

    async fn run(&self, ctx: &RunContext, output: &ActionSink) -> Result<(), IntegrationError> {
        let ms = ctx.parameters().get_u64("ms").unwrap_or_default();
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.0.push(format!("paused {}", ms));
        output.set(ActionItem::new(ctx.parameters().clone()))
    }
}

/// Cancels the run it belongs to, then succeeds
pub struct CancelRun;

#[async_trait]
impl Action for CancelRun {
    fn key(&self) -> &str {
        "cancel"
    }

    fn name(&self) -> &str {
        "Cancel"
    }

    async fn run(&self, ctx: &RunContext, output: &ActionSink) -> Result<(), IntegrationError> {
        ctx.cancellation.cancel();
        output.set(ActionItem::default())
    }
}

/// Verified while the stored token equals "valid"
pub struct TokenAuth;

#[async_trait]
impl Authentication for TokenAuth {
    async fn verify_credentials(&self, ctx: &RunContext) -> Result<JsonObject, IntegrationError> {
        match ctx.auth.get("token").await {
            Some(token) if token == "valid" => Ok(JsonObject::new()),
            _ => Err(IntegrationError::new("invalid token")),
        }
    }

    async fn is_still_verified(&self, ctx: &RunContext) -> Result<bool, IntegrationError> {
        Ok(matches!(ctx.auth.get("token").await, Some(token) if token == "valid"))
    }
}

pub fn registry(feed: &Feed, calls: &Calls) -> AppRegistry {
    let mut registry = AppRegistry::new();
    registry.register(
        App::new(AppDescriptor::new("test", "Test"))
            .with_trigger(FeedTrigger(feed.clone()))
            .with_trigger(HookTrigger)
            .with_action(Record(calls.clone()))
            .with_action(Fail)
            .with_action(Silent)
            .with_action(Slow)
            .with_action(Pause(calls.clone()))
            .with_action(CancelRun),
    );
    registry.register(
        App::new(AppDescriptor::new("secure", "Secure"))
            .with_auth(TokenAuth)
            .with_action(Record(calls.clone())),
    );
    registry
}

/// A feed-triggered flow followed by `actions` as (key, parameters)
pub fn feed_flow(actions: &[(&str, JsonObject)]) -> Flow {
    let mut flow = Flow::new("test flow", "user-1").with_trigger("test", "feed", JsonObject::new());
    for (key, parameters) in actions {
        flow.add_step(Step::new(StepType::Action, "test", *key).with_parameters(parameters.clone()));
    }
    flow
}

pub fn tag(tag: &str) -> JsonObject {
    json_object(json!({ "tag": tag }))
}

/// Coordinator over a memory store, optionally with a wrapped dedup store
pub struct Harness {
    pub coordinator: ExecutionCoordinator,
    pub store: Arc<MemoryStore>,
    pub feed: Feed,
    pub calls: Calls,
}

impl Harness {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_dedup(config, |store| store as Arc<dyn DedupStore>)
    }

    pub fn with_dedup(
        config: RuntimeConfig,
        wrap: impl FnOnce(Arc<MemoryStore>) -> Arc<dyn DedupStore>,
    ) -> Self {
        init_tracing();
        let feed = Feed::default();
        let calls = Calls::default();
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(registry(&feed, &calls));
        let auth = Arc::new(AuthenticationManager::new(registry.clone(), store.clone()));
        let coordinator = ExecutionCoordinator::new(
            registry,
            store.clone(),
            wrap(store.clone()),
            auth,
            Arc::new(EventBus::new(256)),
            config,
        );
        Self {
            coordinator,
            store,
            feed,
            calls,
        }
    }

    pub async fn steps(&self, execution_id: uuid::Uuid) -> Vec<flowcore::ExecutionStep> {
        self.store.list_execution_steps(execution_id).await.unwrap()
    }

    pub async fn cursor(&self, flow_id: uuid::Uuid) -> Option<String> {
        self.store
            .dedup_state(flow_id)
            .await
            .unwrap()
            .last_internal_id
            .map(|id| id.to_string())
    }
}
