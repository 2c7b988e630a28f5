//! Flow execution runtime
//!
//! This crate runs flows: it binds steps to installed apps, polls triggers,
//! deduplicates their items, runs the action chains and records every step
//! in the execution store.

mod action_runner;
mod auth;
mod coordinator;
mod dedup;
mod loader;
mod registry;
mod runtime;
mod scheduler;
pub mod store;
mod template;
mod trigger_runner;

pub use action_runner::ActionRunner;
pub use auth::AuthenticationManager;
pub use coordinator::{CycleReport, ExecutionCoordinator, RunOptions};
pub use dedup::{DedupLedger, DedupSnapshot, Filtered};
pub use loader::{load_file, parse_flow, FlowLoader};
pub use registry::{AppMetadata, AppRegistry, CapabilityMetadata, StepBinding};
pub use runtime::{FlowRuntime, RuntimeConfig};
pub use scheduler::PollScheduler;
pub use store::{ConnectionStore, DedupState, DedupStore, ExecutionStore, MemoryStore};
pub use template::{resolve_parameters, TemplateScope};
pub use trigger_runner::{TriggerRun, TriggerRunner};
