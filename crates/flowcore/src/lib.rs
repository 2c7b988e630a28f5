//! Core abstractions for the flow engine
//!
//! This crate provides the data model (flows, steps, connections,
//! executions), the contracts integrations implement (triggers, actions,
//! authentication) and the context handed to them. It does not run
//! anything on its own.

mod app;
mod context;
mod error;
pub mod events;
mod execution;
mod flow;
mod http;
mod interval;
mod item;
mod value;

pub use app::{
    Action, App, AppDescriptor, Authentication, AuthenticationStep, AuthenticationStepField,
    AuthenticationStepKind, Trigger, TriggerKind,
};
pub use context::{
    ActionSink, AuthHandle, CredentialStore, ExecutionScope, FlowScope, RunContext, StepScope,
    TriggerSink,
};
pub use error::{
    AuthError, DefinitionError, FlowError, IntegrationError, StepError, StoreError,
};
pub use events::*;
pub use execution::{
    Execution, ExecutionId, ExecutionStatus, ExecutionStep, ExecutionStepId, ExecutionStepStatus,
};
pub use flow::{
    Connection, ConnectionId, ErrorHandling, Flow, FlowId, FlowSettings, Step, StepId, StepType,
};
pub use http::{BeforeRequest, HttpClient, HttpError, HttpResponse, RequestConfig};
pub use interval::Interval;
pub use item::{ActionItem, InternalId, TriggerItem, TriggerItemMeta};
pub use value::{json_object, JsonObject, JsonObjectExt};

pub use reqwest::Method;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
