use super::{ConnectionStore, DedupState, DedupStore, ExecutionStore};
use async_trait::async_trait;
use flowcore::{
    Connection, ConnectionId, Execution, ExecutionId, ExecutionStep, ExecutionStepStatus, FlowId,
    InternalId, JsonObject, StoreError,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// In-process store backed by hash maps
#[derive(Default)]
pub struct MemoryStore {
    executions: RwLock<HashMap<ExecutionId, Execution>>,
    steps: RwLock<HashMap<ExecutionId, Vec<ExecutionStep>>>,
    dedup: RwLock<HashMap<FlowId, DedupState>>,
    processed: RwLock<HashMap<FlowId, HashSet<InternalId>>>,
    connections: RwLock<HashMap<ConnectionId, StoredConnection>>,
}

struct StoredConnection {
    connection: Connection,
    credentials: JsonObject,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection together with its decrypted credentials
    pub async fn insert_connection(&self, connection: Connection, credentials: JsonObject) {
        self.connections.write().await.insert(
            connection.id,
            StoredConnection {
                connection,
                credentials,
            },
        );
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(StoreError::Backend(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        let stored = executions
            .get_mut(&execution.id)
            .ok_or_else(|| StoreError::NotFound(format!("execution {}", execution.id)))?;
        if stored.is_terminal() {
            return Err(StoreError::Backend(format!(
                "execution {} is already finished",
                execution.id
            )));
        }
        *stored = execution.clone();
        Ok(())
    }

    async fn get_execution(&self, execution_id: ExecutionId) -> Result<Execution, StoreError> {
        self.executions
            .read()
            .await
            .get(&execution_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("execution {}", execution_id)))
    }

    async fn list_executions(&self, flow_id: FlowId) -> Result<Vec<Execution>, StoreError> {
        let mut executions: Vec<Execution> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.flow_id == flow_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(executions)
    }

    async fn create_execution_step(&self, step: &ExecutionStep) -> Result<(), StoreError> {
        if !self.executions.read().await.contains_key(&step.execution_id) {
            return Err(StoreError::NotFound(format!(
                "execution {}",
                step.execution_id
            )));
        }
        let mut steps = self.steps.write().await;
        let entry = steps.entry(step.execution_id).or_default();
        if entry.iter().any(|s| s.step_id == step.step_id) {
            return Err(StoreError::Backend(format!(
                "step {} already recorded for execution {}",
                step.step_id, step.execution_id
            )));
        }
        entry.push(step.clone());
        entry.sort_by_key(|s| s.position);
        Ok(())
    }

    async fn update_execution_step(&self, step: &ExecutionStep) -> Result<(), StoreError> {
        let mut steps = self.steps.write().await;
        let stored = steps
            .get_mut(&step.execution_id)
            .and_then(|all| all.iter_mut().find(|s| s.id == step.id))
            .ok_or_else(|| StoreError::NotFound(format!("execution step {}", step.id)))?;
        if matches!(
            stored.status,
            ExecutionStepStatus::Success | ExecutionStepStatus::Failure
        ) {
            return Err(StoreError::Backend(format!(
                "execution step {} is already finished",
                step.id
            )));
        }
        *stored = step.clone();
        Ok(())
    }

    async fn list_execution_steps(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionStep>, StoreError> {
        Ok(self
            .steps
            .read()
            .await
            .get(&execution_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn dedup_state(&self, flow_id: FlowId) -> Result<DedupState, StoreError> {
        Ok(self
            .dedup
            .read()
            .await
            .get(&flow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn compare_and_set_last_internal_id(
        &self,
        flow_id: FlowId,
        expected_version: u64,
        internal_id: InternalId,
    ) -> Result<DedupState, StoreError> {
        let mut dedup = self.dedup.write().await;
        let state = dedup.entry(flow_id).or_default();
        if state.version != expected_version {
            return Err(StoreError::StaleDedupState {
                flow_id: flow_id.to_string(),
                expected: expected_version,
                actual: state.version,
            });
        }
        state.last_internal_id = Some(internal_id);
        state.version += 1;
        Ok(state.clone())
    }

    async fn record_processed(
        &self,
        flow_id: FlowId,
        internal_id: &InternalId,
    ) -> Result<(), StoreError> {
        self.processed
            .write()
            .await
            .entry(flow_id)
            .or_default()
            .insert(internal_id.clone());
        Ok(())
    }

    async fn processed_ids(&self, flow_id: FlowId) -> Result<HashSet<InternalId>, StoreError> {
        Ok(self
            .processed
            .read()
            .await
            .get(&flow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn prune_processed(
        &self,
        flow_id: FlowId,
        upto: &InternalId,
    ) -> Result<(), StoreError> {
        if let Some(ids) = self.processed.write().await.get_mut(&flow_id) {
            ids.retain(|id| id > upto);
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn get_connection(&self, connection_id: ConnectionId) -> Result<Connection, StoreError> {
        self.connections
            .read()
            .await
            .get(&connection_id)
            .map(|c| c.connection.clone())
            .ok_or_else(|| StoreError::NotFound(format!("connection {}", connection_id)))
    }

    async fn credentials(&self, connection_id: ConnectionId) -> Result<JsonObject, StoreError> {
        self.connections
            .read()
            .await
            .get(&connection_id)
            .map(|c| c.credentials.clone())
            .ok_or_else(|| StoreError::NotFound(format!("connection {}", connection_id)))
    }

    async fn merge_credentials(
        &self,
        connection_id: ConnectionId,
        fields: JsonObject,
    ) -> Result<JsonObject, StoreError> {
        let mut connections = self.connections.write().await;
        let stored = connections
            .get_mut(&connection_id)
            .ok_or_else(|| StoreError::NotFound(format!("connection {}", connection_id)))?;
        stored.credentials.extend(fields);
        Ok(stored.credentials.clone())
    }

    async fn set_verified(
        &self,
        connection_id: ConnectionId,
        verified: bool,
    ) -> Result<(), StoreError> {
        let mut connections = self.connections.write().await;
        let stored = connections
            .get_mut(&connection_id)
            .ok_or_else(|| StoreError::NotFound(format!("connection {}", connection_id)))?;
        stored.connection.verified = verified;
        Ok(())
    }
}
