use crate::{
    ActionSink, BeforeRequest, IntegrationError, Interval, JsonObject, RunContext, TriggerItem,
    TriggerSink,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Static descriptor of an installed integration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppDescriptor {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub icon_url: String,
    #[serde(default)]
    pub doc_url: Option<String>,
    #[serde(default)]
    pub auth_doc_url: Option<String>,
    #[serde(default)]
    pub primary_color: String,
    #[serde(default)]
    pub supports_connections: bool,
    /// Base URL of the service's API, used by the HTTP client
    #[serde(default)]
    pub api_base_url: String,
    /// Base URL of the service's website
    #[serde(default)]
    pub base_url: String,
}

impl AppDescriptor {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Invoked on a schedule by the poll scheduler
    Polling,
    /// Invoked once per webhook receipt with the payload as `request`
    Webhook,
}

/// First step of a flow: discovers external events
#[async_trait]
pub trait Trigger: Send + Sync {
    fn key(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn kind(&self) -> TriggerKind {
        TriggerKind::Polling
    }

    /// Static minimum spacing between polls
    fn poll_interval(&self) -> Option<Duration> {
        None
    }

    /// Interval derived from the step's parameters; defaults to `poll_interval`
    fn interval(&self, _parameters: &JsonObject) -> Option<Interval> {
        self.poll_interval().map(Interval::from_duration)
    }

    /// Discover events, pushing one item per event into `items`
    async fn run(&self, ctx: &RunContext, items: &TriggerSink) -> Result<(), IntegrationError>;

    /// Ordering of collected items, oldest first. The default keeps the
    /// order in which items were pushed.
    fn sort(&self, _item: &TriggerItem, _next_item: &TriggerItem) -> Ordering {
        Ordering::Equal
    }
}

/// Non-first step of a flow: performs a side effect
#[async_trait]
pub trait Action: Send + Sync {
    fn key(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Perform the side effect and report exactly one item through `output`
    async fn run(&self, ctx: &RunContext, output: &ActionSink) -> Result<(), IntegrationError>;
}

/// Credential lifecycle entry points of an app
#[async_trait]
pub trait Authentication: Send + Sync {
    /// Live check against the external service; returns normalized
    /// credential fields to store
    async fn verify_credentials(&self, ctx: &RunContext) -> Result<JsonObject, IntegrationError>;

    /// Cheap validity check. `Ok(false)` means "not verified"; errors are
    /// reserved for transport failures.
    async fn is_still_verified(&self, ctx: &RunContext) -> Result<bool, IntegrationError>;

    /// Fetch derived data after the initial connect, persisting it with
    /// `ctx.auth.set`
    async fn create_auth_data(&self, _ctx: &RunContext) -> Result<(), IntegrationError> {
        Ok(())
    }

    /// UI-driven steps to create a connection
    fn authentication_steps(&self) -> Vec<AuthenticationStep> {
        Vec::new()
    }

    /// UI-driven steps to refresh an existing connection
    fn reconnection_steps(&self) -> Vec<AuthenticationStep> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationStep {
    #[serde(rename = "type")]
    pub kind: AuthenticationStepKind,
    pub name: String,
    pub arguments: Vec<AuthenticationStepField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthenticationStepKind {
    Mutation,
    OpenWithPopup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationStepField {
    pub name: String,
    pub value: Option<String>,
    #[serde(default)]
    pub properties: Vec<AuthenticationStepField>,
}

/// An installed integration: descriptor plus its capabilities
pub struct App {
    pub descriptor: Arc<AppDescriptor>,
    pub auth: Option<Arc<dyn Authentication>>,
    pub before_request: Vec<Arc<dyn BeforeRequest>>,
    pub triggers: BTreeMap<String, Arc<dyn Trigger>>,
    pub actions: BTreeMap<String, Arc<dyn Action>>,
}

impl App {
    pub fn new(descriptor: AppDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            auth: None,
            before_request: Vec::new(),
            triggers: BTreeMap::new(),
            actions: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    pub fn with_auth(mut self, auth: impl Authentication + 'static) -> Self {
        self.auth = Some(Arc::new(auth));
        self
    }

    pub fn with_before_request(mut self, hook: impl BeforeRequest + 'static) -> Self {
        self.before_request.push(Arc::new(hook));
        self
    }

    pub fn with_trigger(mut self, trigger: impl Trigger + 'static) -> Self {
        self.triggers
            .insert(trigger.key().to_string(), Arc::new(trigger));
        self
    }

    pub fn with_action(mut self, action: impl Action + 'static) -> Self {
        self.actions.insert(action.key().to_string(), Arc::new(action));
        self
    }
}
