use crate::JsonObject;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Flow definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Flow {0} is not active")]
    Inactive(String),

    #[error("A poll cycle is already in flight for flow {0}")]
    CycleInFlight(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Credential lifecycle failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authentication transport failure: {0}")]
    Transport(String),

    #[error("Failed to persist credentials: {0}")]
    CredentialPersist(String),

    #[error("App '{0}' does not support connections")]
    NotSupported(String),
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Authentication(_) => "AuthenticationError",
            AuthError::Transport(_) => "AuthTransportError",
            AuthError::CredentialPersist(_) => "CredentialPersistError",
            AuthError::NotSupported(_) => "AuthenticationError",
        }
    }
}

/// Step-level failures. Always recorded on the ExecutionStep.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("Trigger execution failed: {message}")]
    TriggerExecution { message: String, details: JsonObject },

    #[error("Action execution failed: {message}")]
    ActionExecution { message: String, details: JsonObject },

    #[error("Action resolved without setting an output item")]
    MissingActionOutput,

    #[error("Step timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("{0}")]
    Auth(AuthError),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Step binding failed: {0}")]
    Binding(String),

    #[error("Run was cancelled before the step started")]
    Cancelled,
}

impl StepError {
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::TriggerExecution { .. } => "TriggerExecutionError",
            StepError::ActionExecution { .. } => "ActionExecutionError",
            StepError::MissingActionOutput => "MissingActionOutputError",
            StepError::Timeout { .. } => "StepTimeoutError",
            StepError::Auth(e) => e.kind(),
            StepError::InvalidParameters(_) => "InvalidParametersError",
            StepError::Binding(_) => "StepBindingError",
            StepError::Cancelled => "CancelledError",
        }
    }

    pub fn trigger(err: IntegrationError) -> Self {
        StepError::TriggerExecution {
            message: err.message,
            details: err.details,
        }
    }

    pub fn action(err: IntegrationError) -> Self {
        StepError::ActionExecution {
            message: err.message,
            details: err.details,
        }
    }

    /// Structured payload written to `ExecutionStep::error_details`
    pub fn error_details(&self) -> JsonObject {
        let mut out = JsonObject::new();
        out.insert("error".to_string(), JsonValue::from(self.kind()));
        out.insert("message".to_string(), JsonValue::from(self.to_string()));
        match self {
            StepError::TriggerExecution { details, .. }
            | StepError::ActionExecution { details, .. }
                if !details.is_empty() =>
            {
                out.insert("details".to_string(), JsonValue::Object(details.clone()));
            }
            StepError::Timeout { millis } => {
                out.insert("timeout_ms".to_string(), json!(millis));
            }
            _ => {}
        }
        out
    }
}

impl From<AuthError> for StepError {
    fn from(err: AuthError) -> Self {
        StepError::Auth(err)
    }
}

/// Error returned by trigger, action and authentication code.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct IntegrationError {
    pub message: String,
    pub details: JsonObject,
}

impl IntegrationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: JsonObject::new(),
        }
    }

    pub fn with_details(mut self, details: JsonObject) -> Self {
        self.details = details;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

impl From<AuthError> for IntegrationError {
    fn from(err: AuthError) -> Self {
        IntegrationError::new(err.to_string()).with_detail("error", err.kind())
    }
}

impl From<serde_json::Error> for IntegrationError {
    fn from(err: serde_json::Error) -> Self {
        IntegrationError::new(format!("JSON error: {}", err))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error(
        "Stale dedup state for flow {flow_id}: expected version {expected}, found {actual}"
    )]
    StaleDedupState {
        flow_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Store backend failure: {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("Flow has no steps")]
    Empty,

    #[error("Flow has no trigger step")]
    MissingTrigger,

    #[error("Flow has {0} trigger steps, expected exactly one")]
    MultipleTriggers(usize),

    #[error("Trigger step must be the first step")]
    TriggerNotFirst,

    #[error("Duplicate step position: {0}")]
    DuplicatePosition(u32),

    #[error("Step {step_id} belongs to flow {actual}, not {expected}")]
    ForeignStep {
        step_id: String,
        expected: String,
        actual: String,
    },

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Unknown app: {0}")]
    UnknownApp(String),

    #[error("Unknown trigger '{key}' for app '{app_key}'")]
    UnknownTrigger { app_key: String, key: String },

    #[error("Unknown action '{key}' for app '{app_key}'")]
    UnknownAction { app_key: String, key: String },

    #[error("Invalid interval '{0}'")]
    InvalidInterval(String),

    #[error("until_step {0} is only allowed on test runs")]
    UntilStepOnLiveRun(String),
}
