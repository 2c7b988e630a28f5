use crate::action_runner::ActionRunner;
use crate::auth::AuthenticationManager;
use crate::dedup::{DedupLedger, DedupSnapshot};
use crate::registry::AppRegistry;
use crate::runtime::RuntimeConfig;
use crate::store::{DedupStore, ExecutionStore};
use crate::template::{resolve_parameters, TemplateScope};
use crate::trigger_runner::{TriggerRun, TriggerRunner};
use chrono::Utc;
use flowcore::{
    AuthError, DefinitionError, ErrorHandling, EventBus, Execution, ExecutionEvent,
    ExecutionScope, ExecutionStatus, ExecutionStep, Flow, FlowError, FlowId, FlowScope,
    InternalId, JsonObject, RunContext, Step, StepError, StepId, StepScope, StoreError, Trigger,
    TriggerItem, TriggerKind,
};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a single cycle should run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub test_run: bool,
    /// Last step to attempt; later steps are skipped
    pub until_step: Option<StepId>,
    /// Webhook payload, exposed to the trigger as `ctx.request`
    pub request: Option<JsonValue>,
    pub cancellation: CancellationToken,
}

impl RunOptions {
    pub fn live() -> Self {
        Self::default()
    }

    pub fn test() -> Self {
        Self {
            test_run: true,
            ..Self::default()
        }
    }

    pub fn until_step(mut self, step_id: StepId) -> Self {
        self.until_step = Some(step_id);
        self
    }

    pub fn with_request(mut self, request: JsonValue) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub flow_id: FlowId,
    pub test_run: bool,
    /// Executions in item order, oldest item first
    pub executions: Vec<Execution>,
    /// Items the trigger pushed in the last attempt
    pub emitted: usize,
    /// Items dropped by the dedup filter in the last attempt
    pub skipped: usize,
    pub trigger_error: Option<JsonObject>,
    pub advanced_to: Option<InternalId>,
    pub cancelled: bool,
    /// Attempts repeated because the dedup cursor moved underneath
    pub retries: u32,
    /// Latest data_out per step
    pub step_outputs: HashMap<StepId, JsonObject>,
}

impl CycleReport {
    fn new(flow_id: FlowId, test_run: bool) -> Self {
        Self {
            flow_id,
            test_run,
            executions: Vec::new(),
            emitted: 0,
            skipped: 0,
            trigger_error: None,
            advanced_to: None,
            cancelled: false,
            retries: 0,
            step_outputs: HashMap::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.executions
            .iter()
            .all(|e| e.status == ExecutionStatus::Succeeded)
    }

    /// Executions that ran an action chain for a trigger item
    pub fn processed(&self) -> usize {
        self.executions
            .iter()
            .filter(|e| e.internal_id.is_some())
            .count()
    }
}

/// Per-attempt values shared by every chain of a cycle
struct CycleEnv<'a> {
    flow: &'a Flow,
    trigger_step: &'a Step,
    actions: &'a [&'a Step],
    trigger_data_in: JsonObject,
    flow_scope: FlowScope,
    options: &'a RunOptions,
    /// Live polls read and write the dedup ledger; test runs and webhook
    /// deliveries leave it alone
    dedup: bool,
}

/// One surviving item waiting for its action chain
struct Chain {
    index: usize,
    /// The execution opened at cycle start, handed to the first item
    opened: Option<(Execution, ExecutionStep)>,
    item: TriggerItem,
    trigger_error: Option<JsonObject>,
}

struct ChainOutcome {
    index: usize,
    execution: Execution,
    cancelled: bool,
    outputs: HashMap<StepId, JsonObject>,
}

/// Runs flows end to end: trigger, dedup, action chains, ledger update.
pub struct ExecutionCoordinator {
    registry: Arc<AppRegistry>,
    executions: Arc<dyn ExecutionStore>,
    ledger: DedupLedger,
    auth: Arc<AuthenticationManager>,
    events: Arc<EventBus>,
    trigger_runner: TriggerRunner,
    action_runner: ActionRunner,
    config: RuntimeConfig,
    in_flight: Mutex<HashSet<FlowId>>,
}

impl ExecutionCoordinator {
    pub fn new(
        registry: Arc<AppRegistry>,
        executions: Arc<dyn ExecutionStore>,
        dedup: Arc<dyn DedupStore>,
        auth: Arc<AuthenticationManager>,
        events: Arc<EventBus>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            registry,
            executions,
            ledger: DedupLedger::new(dedup),
            auth,
            events,
            trigger_runner: TriggerRunner::new(config.trigger_buffer),
            action_runner: ActionRunner::new(),
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run one cycle of `flow`.
    ///
    /// Step failures are recorded on their executions and reported in the
    /// returned [`CycleReport`]; only definition, store and concurrency
    /// problems surface as errors.
    pub async fn run_cycle(
        &self,
        flow: &Flow,
        options: RunOptions,
    ) -> Result<CycleReport, FlowError> {
        self.registry.validate_flow(flow)?;
        if let (Some(until), false) = (options.until_step, options.test_run) {
            return Err(DefinitionError::UntilStepOnLiveRun(until.to_string()).into());
        }
        let trigger_step = flow.trigger()?;
        let trigger = self
            .registry
            .trigger(&trigger_step.app_key, &trigger_step.key)?;
        let actions = chain_steps(flow, options.until_step)?;

        // Webhook receipts are independent events, only polls are serialized
        let _guard = if !options.test_run && trigger.kind() == TriggerKind::Polling {
            Some(self.begin_cycle(flow.id)?)
        } else {
            None
        };

        tracing::info!(flow_id = %flow.id, test_run = options.test_run, "starting cycle");

        let mut report = CycleReport::new(flow.id, options.test_run);
        loop {
            let attempt = self
                .attempt(flow, trigger_step, trigger.as_ref(), &actions, &options, &mut report)
                .await;
            match attempt {
                Ok(()) => break,
                Err(FlowError::Store(StoreError::StaleDedupState { .. }))
                    if report.retries < self.config.max_stale_retries =>
                {
                    report.retries += 1;
                    tracing::warn!(
                        flow_id = %flow.id,
                        retry = report.retries,
                        "dedup cursor moved during cycle, retrying from a fresh snapshot"
                    );
                }
                Err(e) => {
                    tracing::error!(flow_id = %flow.id, error = %e, "cycle aborted");
                    return Err(e);
                }
            }
        }

        self.events.emit(ExecutionEvent::CycleCompleted {
            flow_id: flow.id,
            emitted: report.emitted,
            processed: report.processed(),
            skipped: report.skipped,
            timestamp: Utc::now(),
        });
        tracing::info!(
            flow_id = %flow.id,
            emitted = report.emitted,
            processed = report.processed(),
            skipped = report.skipped,
            "cycle completed"
        );

        Ok(report)
    }

    /// Whether a live poll cycle of this flow is currently running
    pub fn is_in_flight(&self, flow_id: FlowId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&flow_id)
    }

    fn begin_cycle(&self, flow_id: FlowId) -> Result<CycleGuard<'_>, FlowError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(flow_id) {
            return Err(FlowError::CycleInFlight(flow_id.to_string()));
        }
        Ok(CycleGuard {
            in_flight: &self.in_flight,
            flow_id,
        })
    }

    async fn attempt(
        &self,
        flow: &Flow,
        trigger_step: &Step,
        trigger: &dyn Trigger,
        actions: &[&Step],
        options: &RunOptions,
        report: &mut CycleReport,
    ) -> Result<(), FlowError> {
        let dedup = !options.test_run && trigger.kind() == TriggerKind::Polling;
        let snapshot = if dedup {
            self.ledger.snapshot(flow.id).await?
        } else {
            DedupSnapshot::empty(flow.id)
        };

        self.events.emit(ExecutionEvent::CycleStarted {
            flow_id: flow.id,
            test_run: options.test_run,
            timestamp: Utc::now(),
        });

        let mut execution = self.open_execution(flow.id, options.test_run).await?;
        let mut trigger_record =
            ExecutionStep::new(execution.id, trigger_step.id, trigger_step.position);
        self.executions.create_execution_step(&trigger_record).await?;

        if options.cancellation.is_cancelled() {
            report.cancelled = true;
            self.fail_step(&mut trigger_record, &StepError::Cancelled).await?;
            self.finish_execution(&mut execution, ExecutionStatus::Failed).await?;
            report.executions.push(execution);
            return Ok(());
        }

        let data_in = match resolve_parameters(&trigger_step.parameters, &TemplateScope::new()) {
            Ok(data_in) => data_in,
            Err(e) => {
                self.fail_step(&mut trigger_record, &e).await?;
                report.trigger_error = Some(e.error_details());
                self.finish_execution(&mut execution, ExecutionStatus::Failed).await?;
                report.executions.push(execution);
                return Ok(());
            }
        };
        trigger_record.start(data_in.clone());
        self.executions.update_execution_step(&trigger_record).await?;
        self.step_started(&execution, trigger_step);

        let env = CycleEnv {
            flow,
            trigger_step,
            actions,
            trigger_data_in: data_in,
            flow_scope: snapshot.scope(),
            options,
            dedup,
        };

        let TriggerRun {
            mut items, result, ..
        } = self.invoke_trigger(&env, &execution, trigger).await;
        report.emitted = items.len();
        report.skipped = 0;
        report.trigger_error = None;

        let continue_on_error = flow.settings.on_error == ErrorHandling::ContinueOnTriggerError;
        let trigger_error = result.err();
        if let Some(err) = &trigger_error {
            report.trigger_error = Some(err.error_details());
            if !continue_on_error || items.is_empty() {
                self.fail_step(&mut trigger_record, err).await?;
                self.finish_execution(&mut execution, ExecutionStatus::Failed).await?;
                report.executions.push(execution);
                return Ok(());
            }
        }

        let (items, newest) = if options.test_run {
            // Test runs exercise the chain with the newest item only
            (items.pop().into_iter().collect::<Vec<_>>(), None)
        } else if dedup {
            let filtered = self.ledger.filter(&snapshot, items);
            report.skipped = filtered.skipped;
            (filtered.fresh, filtered.newest)
        } else {
            (items, None)
        };

        if items.is_empty() {
            match &trigger_error {
                Some(err) => {
                    self.fail_step(&mut trigger_record, err).await?;
                    self.finish_execution(&mut execution, ExecutionStatus::Failed).await?;
                }
                None => {
                    trigger_record.succeed(JsonObject::new());
                    self.executions.update_execution_step(&trigger_record).await?;
                    self.step_completed(&trigger_record);
                    self.finish_execution(&mut execution, ExecutionStatus::Succeeded)
                        .await?;
                }
            }
            report.executions.push(execution);
            // Items above the cursor may all be processed already by an
            // interrupted cycle; move the cursor past them
            if trigger_error.is_none() {
                self.advance_ledger(&snapshot, newest, report).await?;
            }
            return Ok(());
        }

        let trigger_error_details = trigger_error.as_ref().map(StepError::error_details);

        let mut opened = Some((execution, trigger_record));
        let chains = items.into_iter().enumerate().map(|(index, item)| Chain {
            index,
            opened: opened.take(),
            item,
            trigger_error: trigger_error_details.clone(),
        });

        // Chains run to completion even after a sibling's store error
        let limit = self.config.max_parallel_chains.max(1);
        let mut running = FuturesUnordered::new();
        let mut outcomes = Vec::new();
        let mut store_error = None;
        for chain in chains {
            if running.len() >= limit {
                if let Some(outcome) = running.next().await {
                    collect_outcome(outcome, &mut outcomes, &mut store_error);
                }
            }
            running.push(self.run_chain(&env, chain));
        }
        while let Some(outcome) = running.next().await {
            collect_outcome(outcome, &mut outcomes, &mut store_error);
        }
        if let Some(e) = store_error {
            return Err(e);
        }
        outcomes.sort_by_key(|o| o.index);

        let cancelled = outcomes.iter().any(|o| o.cancelled);
        for outcome in outcomes {
            report.step_outputs.extend(outcome.outputs);
            report.executions.push(outcome.execution);
        }
        report.cancelled |= cancelled;

        if !dedup || cancelled || trigger_error.is_some() {
            return Ok(());
        }
        self.advance_ledger(&snapshot, newest, report).await
    }

    async fn advance_ledger(
        &self,
        snapshot: &DedupSnapshot,
        newest: Option<InternalId>,
        report: &mut CycleReport,
    ) -> Result<(), FlowError> {
        if let Some(newest) = newest {
            if self.ledger.advance(snapshot, &newest).await? {
                report.advanced_to = Some(newest);
            }
        }
        Ok(())
    }

    async fn invoke_trigger(
        &self,
        env: &CycleEnv<'_>,
        execution: &Execution,
        trigger: &dyn Trigger,
    ) -> TriggerRun {
        let step = env.trigger_step;
        let next = env.actions.first().copied();
        let ctx = match self.prepare(env, execution, step, next, env.trigger_data_in.clone(), None).await {
            Ok(ctx) => ctx,
            Err(e) => {
                return TriggerRun {
                    items: Vec::new(),
                    result: Err(e),
                    duration_ms: 0,
                }
            }
        };
        self.trigger_runner
            .run(trigger, &ctx, self.step_timeout(env.flow, step))
            .await
    }

    async fn run_chain(&self, env: &CycleEnv<'_>, chain: Chain) -> Result<ChainOutcome, FlowError> {
        let trigger_step = env.trigger_step;
        let (mut execution, mut trigger_record) = match chain.opened {
            Some(opened) => opened,
            None => {
                let execution = self.open_execution(env.flow.id, env.options.test_run).await?;
                let mut record =
                    ExecutionStep::new(execution.id, trigger_step.id, trigger_step.position);
                record.start(env.trigger_data_in.clone());
                self.executions.create_execution_step(&record).await?;
                (execution, record)
            }
        };

        let internal_id = chain.item.internal_id().clone();
        let raw = chain.item.raw;
        execution.internal_id = Some(internal_id.clone());
        self.executions.update_execution(&execution).await?;

        match &chain.trigger_error {
            None => {
                trigger_record.succeed(raw.clone());
                self.executions.update_execution_step(&trigger_record).await?;
                self.step_completed(&trigger_record);
            }
            Some(details) => {
                trigger_record.data_out = raw.clone();
                trigger_record.fail(details.clone());
                self.executions.update_execution_step(&trigger_record).await?;
            }
        }

        let mut scope = TemplateScope::new();
        scope.record(trigger_step.id, &raw);
        let mut outputs = HashMap::new();
        outputs.insert(trigger_step.id, raw);

        let mut failed = chain.trigger_error.is_some();
        let mut cancelled = false;
        for (i, step) in env.actions.iter().enumerate() {
            if env.options.cancellation.is_cancelled() {
                tracing::info!(execution_id = %execution.id, step_id = %step.id, "chain cancelled");
                cancelled = true;
                break;
            }
            let next = env.actions.get(i + 1).copied();
            match self.run_action_step(env, &execution, step, next, &scope).await? {
                Ok(data_out) => {
                    scope.record(step.id, &data_out);
                    outputs.insert(step.id, data_out);
                }
                Err(_) => {
                    failed = true;
                    break;
                }
            }
        }

        let status = if failed || cancelled {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Succeeded
        };
        self.finish_execution(&mut execution, status).await?;

        if env.dedup && !cancelled {
            self.ledger.record_processed(env.flow.id, &internal_id).await?;
        }

        Ok(ChainOutcome {
            index: chain.index,
            execution,
            cancelled,
            outputs,
        })
    }

    /// Record and run one action step. The outer error is a store failure,
    /// the inner one the step's own failure.
    async fn run_action_step(
        &self,
        env: &CycleEnv<'_>,
        execution: &Execution,
        step: &Step,
        next: Option<&Step>,
        scope: &TemplateScope,
    ) -> Result<Result<JsonObject, StepError>, FlowError> {
        let mut record = ExecutionStep::new(execution.id, step.id, step.position);
        self.executions.create_execution_step(&record).await?;

        let data_in = match resolve_parameters(&step.parameters, scope) {
            Ok(data_in) => data_in,
            Err(e) => {
                self.fail_step(&mut record, &e).await?;
                return Ok(Err(e));
            }
        };
        record.start(data_in.clone());
        self.executions.update_execution_step(&record).await?;
        self.step_started(execution, step);

        let outcome = async {
            let action = self
                .registry
                .action(&step.app_key, &step.key)
                .map_err(|e| StepError::Binding(e.to_string()))?;
            let ctx = self
                .prepare(env, execution, step, next, data_in, scope.previous().cloned())
                .await?;
            self.action_runner
                .run(action.as_ref(), &ctx, self.step_timeout(env.flow, step))
                .await
        }
        .await;

        match outcome {
            Ok(item) => {
                record.succeed(item.raw.clone());
                self.executions.update_execution_step(&record).await?;
                self.step_completed(&record);
                Ok(Ok(item.raw))
            }
            Err(e) => {
                self.fail_step(&mut record, &e).await?;
                Ok(Err(e))
            }
        }
    }

    /// Pre-run connection check, then the context for one step
    async fn prepare(
        &self,
        env: &CycleEnv<'_>,
        execution: &Execution,
        step: &Step,
        next: Option<&Step>,
        parameters: JsonObject,
        previous_output: Option<JsonObject>,
    ) -> Result<RunContext, StepError> {
        if self.config.verify_connections {
            if let Some(connection_id) = step.connection_id {
                if !self.auth.check_still_verified(connection_id).await? {
                    return Err(StepError::Auth(AuthError::Authentication(format!(
                        "connection {} is no longer verified",
                        connection_id
                    ))));
                }
            }
        }

        let app = self
            .registry
            .app(&step.app_key)
            .map_err(|e| StepError::Binding(e.to_string()))?;
        let auth = self.auth.auth_handle(step.connection_id).await?;
        let http = self.auth.http_client(&app, auth.clone());

        Ok(RunContext::new(app.descriptor.clone(), auth)
            .with_http(http)
            .with_flow(env.flow_scope.clone())
            .with_step(step_scope(step, parameters))
            .with_next_step(next.map(|n| step_scope(n, n.parameters.clone())))
            .with_execution(ExecutionScope {
                id: execution.id,
                test_run: execution.test_run,
            })
            .with_previous_output(previous_output)
            .with_request(env.options.request.clone())
            .with_events(self.events.create_emitter(execution.id, step.id))
            .with_cancellation(env.options.cancellation.clone()))
    }

    fn step_timeout(&self, flow: &Flow, step: &Step) -> Option<Duration> {
        step.timeout_ms
            .or(flow.settings.step_timeout_ms)
            .map(Duration::from_millis)
            .or(self.config.default_step_timeout)
    }

    async fn open_execution(&self, flow_id: FlowId, test_run: bool) -> Result<Execution, FlowError> {
        let mut execution = Execution::new(flow_id, test_run);
        self.executions.create_execution(&execution).await?;
        execution.start();
        self.executions.update_execution(&execution).await?;

        self.events.emit(ExecutionEvent::ExecutionStarted {
            execution_id: execution.id,
            flow_id,
            test_run,
            timestamp: Utc::now(),
        });
        tracing::debug!(execution_id = %execution.id, flow_id = %flow_id, "execution started");
        Ok(execution)
    }

    async fn finish_execution(
        &self,
        execution: &mut Execution,
        status: ExecutionStatus,
    ) -> Result<(), FlowError> {
        execution.finish(status);
        self.executions.update_execution(execution).await?;

        let duration_ms = (Utc::now() - execution.created_at).num_milliseconds().max(0) as u64;
        self.events.emit(ExecutionEvent::ExecutionCompleted {
            execution_id: execution.id,
            flow_id: execution.flow_id,
            status,
            duration_ms,
            timestamp: Utc::now(),
        });
        tracing::info!(
            execution_id = %execution.id,
            flow_id = %execution.flow_id,
            status = ?status,
            duration_ms,
            "execution finished"
        );
        Ok(())
    }

    async fn fail_step(&self, record: &mut ExecutionStep, err: &StepError) -> Result<(), FlowError> {
        record.fail(err.error_details());
        self.executions.update_execution_step(record).await?;

        self.events.emit(ExecutionEvent::StepFailed {
            execution_id: record.execution_id,
            step_id: record.step_id,
            error: err.to_string(),
            timestamp: Utc::now(),
        });
        tracing::warn!(
            execution_id = %record.execution_id,
            step_id = %record.step_id,
            position = record.position,
            error = %err,
            "step failed"
        );
        Ok(())
    }

    fn step_started(&self, execution: &Execution, step: &Step) {
        self.events.emit(ExecutionEvent::StepStarted {
            execution_id: execution.id,
            step_id: step.id,
            app_key: step.app_key.clone(),
            key: step.key.clone(),
            position: step.position,
            timestamp: Utc::now(),
        });
    }

    fn step_completed(&self, record: &ExecutionStep) {
        let duration_ms = (record.updated_at - record.created_at)
            .num_milliseconds()
            .max(0) as u64;
        self.events.emit(ExecutionEvent::StepCompleted {
            execution_id: record.execution_id,
            step_id: record.step_id,
            duration_ms,
            timestamp: Utc::now(),
        });
    }
}

/// Releases a flow's in-flight slot when the cycle ends
struct CycleGuard<'a> {
    in_flight: &'a Mutex<HashSet<FlowId>>,
    flow_id: FlowId,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.flow_id);
    }
}

/// Keep a chain's outcome, or its store error if it is the first one
fn collect_outcome(
    outcome: Result<ChainOutcome, FlowError>,
    outcomes: &mut Vec<ChainOutcome>,
    store_error: &mut Option<FlowError>,
) {
    match outcome {
        Ok(outcome) => outcomes.push(outcome),
        Err(e) => {
            tracing::error!(error = %e, "chain stopped on a store error");
            store_error.get_or_insert(e);
        }
    }
}

fn step_scope(step: &Step, parameters: JsonObject) -> StepScope {
    StepScope {
        id: step.id,
        app_key: step.app_key.clone(),
        key: step.key.clone(),
        parameters,
    }
}

/// Action steps to run, cut after `until_step` when given
fn chain_steps(flow: &Flow, until_step: Option<StepId>) -> Result<Vec<&Step>, DefinitionError> {
    let actions = flow.actions();
    let Some(until) = until_step else {
        return Ok(actions);
    };
    if flow.trigger()?.id == until {
        return Ok(Vec::new());
    }
    let last = actions
        .iter()
        .position(|s| s.id == until)
        .ok_or_else(|| DefinitionError::StepNotFound(until.to_string()))?;
    Ok(actions[..=last].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use flowcore::json_object;
    use serde_json::json;

    fn flow() -> Flow {
        Flow::new("chain", "user-1")
            .with_trigger("t", "poll", JsonObject::new())
            .with_action("a", "one", JsonObject::new())
            .with_action("a", "two", json_object(json!({ "n": 2 })))
    }

    fn coordinator() -> ExecutionCoordinator {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(AppRegistry::new());
        ExecutionCoordinator::new(
            registry.clone(),
            store.clone(),
            store.clone(),
            Arc::new(AuthenticationManager::new(registry, store)),
            Arc::new(EventBus::new(16)),
            RuntimeConfig::default(),
        )
    }

    #[test]
    fn test_chain_steps_cut_at_until_step() {
        let flow = flow();
        let actions = flow.actions();
        let first = actions[0].id;

        assert_eq!(chain_steps(&flow, None).unwrap().len(), 2);
        assert_eq!(chain_steps(&flow, Some(first)).unwrap().len(), 1);
        assert!(chain_steps(&flow, Some(flow.trigger().unwrap().id)).unwrap().is_empty());
        assert!(matches!(
            chain_steps(&flow, Some(uuid::Uuid::new_v4())),
            Err(DefinitionError::StepNotFound(_))
        ));
    }

    #[test]
    fn test_one_cycle_in_flight_per_flow() {
        let coordinator = coordinator();
        let flow_id = uuid::Uuid::new_v4();

        let guard = coordinator.begin_cycle(flow_id).unwrap();
        assert!(coordinator.is_in_flight(flow_id));
        assert!(matches!(
            coordinator.begin_cycle(flow_id),
            Err(FlowError::CycleInFlight(_))
        ));
        assert!(coordinator.begin_cycle(uuid::Uuid::new_v4()).is_ok());

        drop(guard);
        assert!(!coordinator.is_in_flight(flow_id));
    }

    #[test]
    fn test_step_timeout_precedence() {
        let coordinator = coordinator();
        let mut flow = flow();
        let step = flow.actions()[0].clone();
        assert_eq!(coordinator.step_timeout(&flow, &step), None);

        flow.settings.step_timeout_ms = Some(500);
        assert_eq!(coordinator.step_timeout(&flow, &step), Some(Duration::from_millis(500)));

        let step = step.with_timeout_ms(50);
        assert_eq!(coordinator.step_timeout(&flow, &step), Some(Duration::from_millis(50)));
    }
}
