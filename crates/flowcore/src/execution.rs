use crate::{FlowId, InternalId, JsonObject, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ExecutionId = Uuid;
pub type ExecutionStepId = Uuid;

/// One run of a flow for a single trigger item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub flow_id: FlowId,
    pub test_run: bool,
    pub status: ExecutionStatus,
    /// Internal id of the trigger item this execution processed
    pub internal_id: Option<InternalId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(flow_id: FlowId, test_run: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            flow_id,
            test_run,
            status: ExecutionStatus::Pending,
            internal_id: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.updated_at = Utc::now();
    }

    pub fn finish(&mut self, status: ExecutionStatus) {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        self.finished_at = Some(now);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Succeeded | ExecutionStatus::Failed)
    }
}

/// Durable record of one step's input, output and status within an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: ExecutionStepId,
    pub execution_id: ExecutionId,
    pub step_id: StepId,
    pub position: u32,
    pub data_in: JsonObject,
    pub data_out: JsonObject,
    pub error_details: JsonObject,
    pub status: ExecutionStepStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionStep {
    pub fn new(execution_id: ExecutionId, step_id: StepId, position: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_id,
            position,
            data_in: JsonObject::new(),
            data_out: JsonObject::new(),
            error_details: JsonObject::new(),
            status: ExecutionStepStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn start(&mut self, data_in: JsonObject) {
        self.data_in = data_in;
        self.status = ExecutionStepStatus::Running;
        self.updated_at = Utc::now();
    }

    pub fn succeed(&mut self, data_out: JsonObject) {
        self.data_out = data_out;
        self.status = ExecutionStepStatus::Success;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error_details: JsonObject) {
        self.error_details = error_details;
        self.status = ExecutionStepStatus::Failure;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStepStatus {
    Pending,
    Running,
    Success,
    Failure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_lifecycle() {
        let mut execution = Execution::new(Uuid::new_v4(), false);
        assert_eq!(execution.status, ExecutionStatus::Pending);
        execution.start();
        assert!(!execution.is_terminal());
        execution.finish(ExecutionStatus::Failed);
        assert!(execution.is_terminal());
        assert!(execution.finished_at.is_some());
    }

    #[test]
    fn test_step_failure_keeps_input() {
        let mut step = ExecutionStep::new(Uuid::new_v4(), Uuid::new_v4(), 2);
        let mut data_in = JsonObject::new();
        data_in.insert("url".into(), "https://example.com".into());
        step.start(data_in.clone());
        let mut details = JsonObject::new();
        details.insert("error".into(), "ActionExecutionError".into());
        step.fail(details);
        assert_eq!(step.status, ExecutionStepStatus::Failure);
        assert_eq!(step.data_in, data_in);
        assert!(step.data_out.is_empty());
    }
}
