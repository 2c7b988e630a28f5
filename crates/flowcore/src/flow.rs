use crate::{DefinitionError, JsonObject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

pub type FlowId = Uuid;
pub type StepId = Uuid;
pub type ConnectionId = Uuid;

/// User-defined ordered sequence of one trigger followed by actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub active: bool,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub settings: FlowSettings,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            owner: owner.into(),
            active: false,
            steps: Vec::new(),
            settings: FlowSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a step at the next free position
    pub fn add_step(&mut self, mut step: Step) -> StepId {
        step.flow_id = self.id;
        step.position = self.steps.iter().map(|s| s.position).max().map_or(1, |p| p + 1);
        let id = step.id;
        self.steps.push(step);
        id
    }

    pub fn with_trigger(
        mut self,
        app_key: impl Into<String>,
        key: impl Into<String>,
        parameters: JsonObject,
    ) -> Self {
        self.add_step(Step::new(StepType::Trigger, app_key, key).with_parameters(parameters));
        self
    }

    pub fn with_action(
        mut self,
        app_key: impl Into<String>,
        key: impl Into<String>,
        parameters: JsonObject,
    ) -> Self {
        self.add_step(Step::new(StepType::Action, app_key, key).with_parameters(parameters));
        self
    }

    pub fn activate(mut self) -> Self {
        self.active = true;
        self
    }

    /// Steps sorted by position
    pub fn ordered_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.position);
        steps
    }

    pub fn trigger(&self) -> Result<&Step, DefinitionError> {
        self.ordered_steps()
            .into_iter()
            .next()
            .filter(|s| s.step_type == StepType::Trigger)
            .ok_or(DefinitionError::MissingTrigger)
    }

    /// Action steps in execution order
    pub fn actions(&self) -> Vec<&Step> {
        self.ordered_steps()
            .into_iter()
            .filter(|s| s.step_type == StepType::Action)
            .collect()
    }

    pub fn find_step(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn find_step_mut(&mut self, id: StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Check the structural invariants: exactly one trigger, first by
    /// position, with unique positions.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::Empty);
        }

        let mut positions = HashSet::new();
        for step in &self.steps {
            if step.flow_id != self.id {
                return Err(DefinitionError::ForeignStep {
                    step_id: step.id.to_string(),
                    expected: self.id.to_string(),
                    actual: step.flow_id.to_string(),
                });
            }
            if !positions.insert(step.position) {
                return Err(DefinitionError::DuplicatePosition(step.position));
            }
        }

        let triggers = self
            .steps
            .iter()
            .filter(|s| s.step_type == StepType::Trigger)
            .count();
        match triggers {
            0 => return Err(DefinitionError::MissingTrigger),
            1 => {}
            n => return Err(DefinitionError::MultipleTriggers(n)),
        }

        match self.ordered_steps().first() {
            Some(first) if first.step_type == StepType::Trigger => Ok(()),
            _ => Err(DefinitionError::TriggerNotFirst),
        }
    }
}

/// A single trigger or action bound to an app definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    #[serde(default = "Uuid::nil")]
    pub flow_id: FlowId,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub app_key: String,
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: JsonObject,
    #[serde(default)]
    pub connection_id: Option<ConnectionId>,
    pub position: u32,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Last materialized result, kept for inspection only
    #[serde(default)]
    pub output: Option<JsonObject>,
}

impl Step {
    pub fn new(step_type: StepType, app_key: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_id: Uuid::nil(),
            step_type,
            app_key: app_key.into(),
            key: key.into(),
            name: None,
            parameters: JsonObject::new(),
            connection_id: None,
            position: 0,
            timeout_ms: None,
            output: None,
        }
    }

    pub fn with_parameters(mut self, parameters: JsonObject) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_connection(mut self, connection_id: ConnectionId) -> Self {
        self.connection_id = Some(connection_id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn is_trigger(&self) -> bool {
        self.step_type == StepType::Trigger
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Trigger,
    Action,
}

/// Stored credentials for an app, owned by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    /// App key the credentials belong to
    pub key: String,
    pub owner: String,
    /// Opaque encrypted credential payload
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub formatted_data: Option<JsonObject>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(key: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            owner: owner.into(),
            data: String::new(),
            formatted_data: None,
            verified: false,
            created_at: Utc::now(),
        }
    }
}

/// Per-flow execution settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowSettings {
    /// Timeout applied to steps without their own override
    #[serde(default)]
    pub step_timeout_ms: Option<u64>,
    #[serde(default)]
    pub on_error: ErrorHandling,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    /// A failed trigger stops the cycle
    #[default]
    StopExecution,
    /// Items pushed before a trigger failure still run their action chains
    ContinueOnTriggerError,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Flow {
        Flow::new("sample", "user-1")
            .with_trigger("scheduler", "every_interval", JsonObject::new())
            .with_action("debug", "log", JsonObject::new())
    }

    #[test]
    fn test_positions_assigned_in_order() {
        let flow = sample();
        let positions: Vec<u32> = flow.ordered_steps().iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![1, 2]);
        assert!(flow.validate().is_ok());
        assert_eq!(flow.actions().len(), 1);
    }

    #[test]
    fn test_trigger_must_come_first() {
        let mut flow = sample();
        flow.steps[0].position = 3;
        assert_eq!(flow.validate(), Err(DefinitionError::TriggerNotFirst));
    }

    #[test]
    fn test_missing_trigger() {
        let flow = Flow::new("no trigger", "user-1").with_action("debug", "log", JsonObject::new());
        assert_eq!(flow.validate(), Err(DefinitionError::MissingTrigger));
    }

    #[test]
    fn test_duplicate_positions_rejected() {
        let mut flow = sample();
        flow.steps[1].position = 1;
        assert_eq!(flow.validate(), Err(DefinitionError::DuplicatePosition(1)));
    }

    #[test]
    fn test_flow_round_trips_through_json_with_type_tag() {
        let flow = sample();
        let json = serde_json::to_value(&flow).unwrap();
        assert_eq!(json["steps"][0]["type"], "trigger");
        let back: Flow = serde_json::from_value(json).unwrap();
        assert_eq!(back.steps.len(), 2);
    }
}
