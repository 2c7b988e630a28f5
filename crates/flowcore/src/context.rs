use crate::{
    ActionItem, AppDescriptor, AuthError, ConnectionId, EventEmitter, ExecutionId, FlowId,
    HttpClient, IntegrationError, InternalId, JsonObject, StepId, StoreError, TriggerItem,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Persistence target for refreshed credential fields
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Merge `fields` into the connection's stored credentials and return the
    /// merged set once it is durably stored.
    async fn merge_credentials(
        &self,
        connection_id: ConnectionId,
        fields: JsonObject,
    ) -> Result<JsonObject, StoreError>;
}

/// Credential access for integration code
#[derive(Clone)]
pub struct AuthHandle {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    connection_id: Option<ConnectionId>,
    data: RwLock<JsonObject>,
    store: Option<Arc<dyn CredentialStore>>,
}

impl AuthHandle {
    pub fn new(
        connection_id: ConnectionId,
        data: JsonObject,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                connection_id: Some(connection_id),
                data: RwLock::new(data),
                store: Some(store),
            }),
        }
    }

    /// Credentials not backed by a stored connection; `set` fails
    pub fn detached(data: JsonObject) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                connection_id: None,
                data: RwLock::new(data),
                store: None,
            }),
        }
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.inner.connection_id
    }

    /// Snapshot of the current decrypted credential fields
    pub async fn data(&self) -> JsonObject {
        self.inner.data.read().await.clone()
    }

    pub async fn get(&self, key: &str) -> Option<JsonValue> {
        self.inner.data.read().await.get(key).cloned()
    }

    /// Persist updated credential fields, e.g. a refreshed access token
    pub async fn set(&self, fields: JsonObject) -> Result<(), AuthError> {
        let (connection_id, store) = match (&self.inner.connection_id, &self.inner.store) {
            (Some(id), Some(store)) => (*id, store.clone()),
            _ => {
                return Err(AuthError::CredentialPersist(
                    "no connection bound to this context".to_string(),
                ))
            }
        };

        let merged = store
            .merge_credentials(connection_id, fields)
            .await
            .map_err(|e| AuthError::CredentialPersist(e.to_string()))?;

        *self.inner.data.write().await = merged;
        Ok(())
    }
}

/// Flow-level view: dedup snapshot taken at run start
#[derive(Debug, Clone)]
pub struct FlowScope {
    pub id: FlowId,
    pub last_internal_id: Option<InternalId>,
    processed: Arc<HashSet<InternalId>>,
}

impl FlowScope {
    pub fn new(
        id: FlowId,
        last_internal_id: Option<InternalId>,
        processed: Arc<HashSet<InternalId>>,
    ) -> Self {
        Self {
            id,
            last_internal_id,
            processed,
        }
    }

    /// Whether an item with this id is at or below the cursor or was
    /// recorded as processed
    pub fn is_already_processed(&self, internal_id: &str) -> bool {
        let id = InternalId::from(internal_id);
        self.last_internal_id.as_ref().is_some_and(|last| &id <= last)
            || self.processed.contains(&id)
    }
}

#[derive(Debug, Clone)]
pub struct StepScope {
    pub id: StepId,
    pub app_key: String,
    pub key: String,
    pub parameters: JsonObject,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutionScope {
    pub id: ExecutionId,
    pub test_run: bool,
}

/// Everything trigger and action code can see during one invocation.
///
/// Built by the coordinator before each step and never mutated afterwards.
/// Outputs travel through [`TriggerSink`] and [`ActionSink`], not through
/// the context.
#[derive(Clone)]
pub struct RunContext {
    pub auth: AuthHandle,
    pub app: Arc<AppDescriptor>,
    pub http: Option<HttpClient>,
    pub flow: Option<FlowScope>,
    pub step: Option<StepScope>,
    pub next_step: Option<StepScope>,
    pub execution: Option<ExecutionScope>,
    /// data_out of the previous step in the chain
    pub previous_output: Option<JsonObject>,
    /// Webhook payload when the run was started by a webhook receipt
    pub request: Option<JsonValue>,
    pub events: EventEmitter,
    pub cancellation: CancellationToken,
}

impl RunContext {
    pub fn new(app: Arc<AppDescriptor>, auth: AuthHandle) -> Self {
        Self {
            auth,
            app,
            http: None,
            flow: None,
            step: None,
            next_step: None,
            execution: None,
            previous_output: None,
            request: None,
            events: EventEmitter::detached(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_http(mut self, http: HttpClient) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_flow(mut self, flow: FlowScope) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn with_step(mut self, step: StepScope) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_next_step(mut self, next_step: Option<StepScope>) -> Self {
        self.next_step = next_step;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionScope) -> Self {
        self.execution = Some(execution);
        self
    }

    pub fn with_previous_output(mut self, output: Option<JsonObject>) -> Self {
        self.previous_output = output;
        self
    }

    pub fn with_request(mut self, request: Option<JsonValue>) -> Self {
        self.request = request;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Resolved parameters of the current step
    pub fn parameters(&self) -> &JsonObject {
        static EMPTY: std::sync::OnceLock<JsonObject> = std::sync::OnceLock::new();
        match &self.step {
            Some(step) => &step.parameters,
            None => EMPTY.get_or_init(JsonObject::new),
        }
    }

    pub fn is_test_run(&self) -> bool {
        self.execution.map(|e| e.test_run).unwrap_or(false)
    }

    pub fn http(&self) -> Result<&HttpClient, IntegrationError> {
        self.http
            .as_ref()
            .ok_or_else(|| IntegrationError::new("no HTTP client configured for this app"))
    }
}

/// Output channel for trigger items
pub struct TriggerSink {
    tx: mpsc::Sender<TriggerItem>,
}

impl TriggerSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TriggerItem>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Report one discovered event
    pub async fn push(&self, item: TriggerItem) -> Result<(), IntegrationError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| IntegrationError::new("trigger item channel closed"))
    }
}

/// Output slot for the single action item
pub struct ActionSink {
    tx: mpsc::Sender<ActionItem>,
}

impl ActionSink {
    pub fn channel() -> (Self, mpsc::Receiver<ActionItem>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Report the action's output. Only the first call is accepted.
    pub fn set(&self, item: ActionItem) -> Result<(), IntegrationError> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => IntegrationError::new("action output already set"),
            mpsc::error::TrySendError::Closed(_) => {
                IntegrationError::new("action output channel closed")
            }
        })
    }
}
