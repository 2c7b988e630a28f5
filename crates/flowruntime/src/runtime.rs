use crate::auth::AuthenticationManager;
use crate::coordinator::{CycleReport, ExecutionCoordinator, RunOptions};
use crate::registry::AppRegistry;
use crate::scheduler::PollScheduler;
use crate::store::{ConnectionStore, DedupStore, ExecutionStore, MemoryStore};
use chrono::Utc;
use flowcore::{
    EventBus, Execution, ExecutionEvent, ExecutionId, ExecutionStep, Flow, FlowError, FlowId,
    Interval, StepId, TriggerKind,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

/// Registered flows, shared with the poll loops
pub(crate) type FlowTable = Arc<RwLock<HashMap<FlowId, Flow>>>;

/// Main runtime: owns the registry, stores, coordinator and poll loops
#[derive(Clone)]
pub struct FlowRuntime {
    registry: Arc<AppRegistry>,
    executions: Arc<dyn ExecutionStore>,
    auth: Arc<AuthenticationManager>,
    coordinator: Arc<ExecutionCoordinator>,
    scheduler: Arc<PollScheduler>,
    event_bus: Arc<EventBus>,
    flows: FlowTable,
    config: RuntimeConfig,
}

impl FlowRuntime {
    /// Create a runtime backed by an in-memory store with default settings
    pub fn new(registry: AppRegistry) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    pub fn with_config(registry: AppRegistry, config: RuntimeConfig) -> Self {
        Self::with_store(registry, Arc::new(MemoryStore::new()), config)
    }

    /// Create a runtime over a store implementing every persistence trait
    pub fn with_store<S>(registry: AppRegistry, store: Arc<S>, config: RuntimeConfig) -> Self
    where
        S: ExecutionStore + DedupStore + ConnectionStore + 'static,
    {
        let registry = Arc::new(registry);
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let auth = Arc::new(AuthenticationManager::new(registry.clone(), store.clone()));
        let coordinator = Arc::new(ExecutionCoordinator::new(
            registry.clone(),
            store.clone(),
            store.clone(),
            auth.clone(),
            event_bus.clone(),
            config.clone(),
        ));
        let flows: FlowTable = Arc::new(RwLock::new(HashMap::new()));
        let scheduler = Arc::new(PollScheduler::new(coordinator.clone(), flows.clone()));

        Self {
            registry,
            executions: store,
            auth,
            coordinator,
            scheduler,
            event_bus,
            flows,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<AppRegistry> {
        &self.registry
    }

    pub fn auth(&self) -> &Arc<AuthenticationManager> {
        &self.auth
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Validate and store a flow. Active flows with a polling trigger start
    /// polling right away.
    pub async fn register_flow(&self, flow: Flow) -> Result<FlowId, FlowError> {
        self.registry.validate_flow(&flow)?;
        let flow_id = flow.id;
        let active = flow.active;
        tracing::info!(flow_id = %flow_id, name = %flow.name, steps = flow.steps.len(), "registering flow");

        self.scheduler.stop(flow_id);
        self.flows.write().await.insert(flow_id, flow);
        if active {
            self.schedule(flow_id).await?;
        }
        Ok(flow_id)
    }

    pub async fn remove_flow(&self, flow_id: FlowId) -> Result<Flow, FlowError> {
        self.scheduler.stop(flow_id);
        self.flows
            .write()
            .await
            .remove(&flow_id)
            .ok_or_else(|| FlowError::NotFound(format!("flow {}", flow_id)))
    }

    pub async fn get_flow(&self, flow_id: FlowId) -> Result<Flow, FlowError> {
        self.flows
            .read()
            .await
            .get(&flow_id)
            .cloned()
            .ok_or_else(|| FlowError::NotFound(format!("flow {}", flow_id)))
    }

    pub async fn list_flows(&self) -> Vec<Flow> {
        let mut flows: Vec<Flow> = self.flows.read().await.values().cloned().collect();
        flows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        flows
    }

    pub async fn activate(&self, flow_id: FlowId) -> Result<(), FlowError> {
        self.set_active(flow_id, true).await?;
        self.schedule(flow_id).await
    }

    /// Stop polling; a cycle already running is cancelled between steps
    pub async fn deactivate(&self, flow_id: FlowId) -> Result<(), FlowError> {
        self.set_active(flow_id, false).await?;
        self.scheduler.stop(flow_id);
        Ok(())
    }

    async fn set_active(&self, flow_id: FlowId, active: bool) -> Result<(), FlowError> {
        let mut flows = self.flows.write().await;
        let flow = flows
            .get_mut(&flow_id)
            .ok_or_else(|| FlowError::NotFound(format!("flow {}", flow_id)))?;
        flow.active = active;
        flow.updated_at = Utc::now();
        tracing::info!(flow_id = %flow_id, active, "flow state changed");
        Ok(())
    }

    async fn schedule(&self, flow_id: FlowId) -> Result<(), FlowError> {
        let flow = self.get_flow(flow_id).await?;
        let trigger_step = flow.trigger()?;
        let trigger = self.registry.trigger(&trigger_step.app_key, &trigger_step.key)?;
        if trigger.kind() == TriggerKind::Webhook {
            return Ok(());
        }
        let interval = trigger
            .interval(&trigger_step.parameters)
            .unwrap_or(Interval::EVERY_MINUTE);
        self.scheduler.start(flow_id, interval);
        Ok(())
    }

    pub fn is_polling(&self, flow_id: FlowId) -> bool {
        self.scheduler.is_scheduled(flow_id)
    }

    /// Run one live cycle of a registered flow now
    pub async fn run_flow(&self, flow_id: FlowId) -> Result<CycleReport, FlowError> {
        self.run_with(flow_id, RunOptions::live()).await
    }

    /// Run the flow as a test: newest item only, no dedup bookkeeping
    pub async fn test_run(
        &self,
        flow_id: FlowId,
        until_step: Option<StepId>,
    ) -> Result<CycleReport, FlowError> {
        let mut options = RunOptions::test();
        options.until_step = until_step;
        self.run_with(flow_id, options).await
    }

    /// Start a live run of an active webhook flow with `payload` as request
    pub async fn handle_webhook(
        &self,
        flow_id: FlowId,
        payload: JsonValue,
    ) -> Result<CycleReport, FlowError> {
        let flow = self.get_flow(flow_id).await?;
        if !flow.active {
            return Err(FlowError::Inactive(flow_id.to_string()));
        }
        let trigger_step = flow.trigger()?;
        let trigger = self.registry.trigger(&trigger_step.app_key, &trigger_step.key)?;
        if trigger.kind() != TriggerKind::Webhook {
            return Err(FlowError::NotFound(format!("webhook trigger for flow {}", flow_id)));
        }
        self.run_with(flow_id, RunOptions::live().with_request(payload)).await
    }

    pub async fn run_with(
        &self,
        flow_id: FlowId,
        options: RunOptions,
    ) -> Result<CycleReport, FlowError> {
        let flow = self.get_flow(flow_id).await?;
        let report = self.coordinator.run_cycle(&flow, options).await?;
        record_outputs(&self.flows, &report).await;
        Ok(report)
    }

    /// Executions of a flow, newest first
    pub async fn executions(&self, flow_id: FlowId) -> Result<Vec<Execution>, FlowError> {
        Ok(self.executions.list_executions(flow_id).await?)
    }

    /// An execution with its steps ordered by position
    pub async fn execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<(Execution, Vec<ExecutionStep>), FlowError> {
        let execution = self.executions.get_execution(execution_id).await?;
        let steps = self.executions.list_execution_steps(execution_id).await?;
        Ok((execution, steps))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Stop every poll loop
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

/// Copy each step's latest data_out into `Step::output`
pub(crate) async fn record_outputs(flows: &FlowTable, report: &CycleReport) {
    if report.step_outputs.is_empty() {
        return;
    }
    let mut flows = flows.write().await;
    if let Some(flow) = flows.get_mut(&report.flow_id) {
        for (step_id, output) in &report.step_outputs {
            if let Some(step) = flow.find_step_mut(*step_id) {
                step.output = Some(output.clone());
            }
        }
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on action chains running at once within one cycle
    pub max_parallel_chains: usize,
    pub event_buffer_size: usize,
    /// Used when neither the step nor the flow sets a timeout
    pub default_step_timeout: Option<Duration>,
    pub max_stale_retries: u32,
    /// Capacity of the channel between a trigger and its runner
    pub trigger_buffer: usize,
    /// Ask the app whether a connection is still valid before each step
    pub verify_connections: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_chains: 10,
            event_buffer_size: 1000,
            default_step_timeout: None,
            max_stale_retries: 3,
            trigger_buffer: 1024,
            verify_connections: false,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `FLOW_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_parallel_chains: parse_var(&lookup, "FLOW_MAX_PARALLEL_CHAINS")
                .unwrap_or(defaults.max_parallel_chains),
            event_buffer_size: parse_var(&lookup, "FLOW_EVENT_BUFFER")
                .unwrap_or(defaults.event_buffer_size),
            default_step_timeout: parse_var(&lookup, "FLOW_STEP_TIMEOUT_MS")
                .map(Duration::from_millis)
                .or(defaults.default_step_timeout),
            max_stale_retries: parse_var(&lookup, "FLOW_MAX_STALE_RETRIES")
                .unwrap_or(defaults.max_stale_retries),
            trigger_buffer: parse_var(&lookup, "FLOW_TRIGGER_BUFFER")
                .unwrap_or(defaults.trigger_buffer),
            verify_connections: parse_var(&lookup, "FLOW_VERIFY_CONNECTIONS")
                .unwrap_or(defaults.verify_connections),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment variable");
            None
        }
    }
}
