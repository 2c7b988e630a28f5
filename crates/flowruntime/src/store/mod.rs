//! Persistence boundary of the engine.
//!
//! Three traits split the storage concerns:
//! - [`ExecutionStore`] appends and updates execution and step records
//! - [`DedupStore`] holds each flow's versioned `last_internal_id` and the
//!   set of processed item ids
//! - [`ConnectionStore`] reads and updates connection credentials
//!
//! [`MemoryStore`] implements all three for tests and single-process use.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use flowcore::{
    Connection, ConnectionId, CredentialStore, Execution, ExecutionId, ExecutionStep, FlowId,
    InternalId, JsonObject, StoreError,
};
use std::collections::HashSet;
use std::sync::Arc;

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Fails once the stored execution has reached a terminal status
    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn get_execution(&self, execution_id: ExecutionId) -> Result<Execution, StoreError>;

    /// Executions of a flow, newest first
    async fn list_executions(&self, flow_id: FlowId) -> Result<Vec<Execution>, StoreError>;

    async fn create_execution_step(&self, step: &ExecutionStep) -> Result<(), StoreError>;

    /// Fails once the stored step has reached a terminal status
    async fn update_execution_step(&self, step: &ExecutionStep) -> Result<(), StoreError>;

    /// Steps of an execution ordered by position
    async fn list_execution_steps(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionStep>, StoreError>;
}

/// Versioned dedup cursor of one flow
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupState {
    pub last_internal_id: Option<InternalId>,
    pub version: u64,
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn dedup_state(&self, flow_id: FlowId) -> Result<DedupState, StoreError>;

    /// Atomically set `last_internal_id` if the stored version still equals
    /// `expected_version`; otherwise fail with `StaleDedupState`.
    async fn compare_and_set_last_internal_id(
        &self,
        flow_id: FlowId,
        expected_version: u64,
        internal_id: InternalId,
    ) -> Result<DedupState, StoreError>;

    async fn record_processed(
        &self,
        flow_id: FlowId,
        internal_id: &InternalId,
    ) -> Result<(), StoreError>;

    async fn processed_ids(&self, flow_id: FlowId) -> Result<HashSet<InternalId>, StoreError>;

    /// Forget processed ids at or below `upto`; the cursor already drops them
    async fn prune_processed(
        &self,
        flow_id: FlowId,
        upto: &InternalId,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn get_connection(&self, connection_id: ConnectionId) -> Result<Connection, StoreError>;

    /// Decrypted credential fields
    async fn credentials(&self, connection_id: ConnectionId) -> Result<JsonObject, StoreError>;

    /// Merge fields into the stored credentials, returning the merged set
    async fn merge_credentials(
        &self,
        connection_id: ConnectionId,
        fields: JsonObject,
    ) -> Result<JsonObject, StoreError>;

    async fn set_verified(
        &self,
        connection_id: ConnectionId,
        verified: bool,
    ) -> Result<(), StoreError>;
}

/// Adapts a [`ConnectionStore`] to the credential writer the context uses
pub(crate) struct ConnectionCredentials(pub Arc<dyn ConnectionStore>);

#[async_trait]
impl CredentialStore for ConnectionCredentials {
    async fn merge_credentials(
        &self,
        connection_id: ConnectionId,
        fields: JsonObject,
    ) -> Result<JsonObject, StoreError> {
        self.0.merge_credentials(connection_id, fields).await
    }
}
