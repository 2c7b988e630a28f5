//! Built-in apps
//!
//! Small integrations for common operations: schedules, webhooks, HTTP,
//! logging, JSON formatting and delays.

mod debug;
mod delay;
mod formatter;
mod http;
mod scheduler;
mod webhook;

pub use debug::LogAction;
pub use delay::{DelayFor, DelayUntil};
pub use formatter::{ParseJson, StringifyJson};
pub use http::{BearerToken, PollJson, SendRequest, TokenAuthentication};
pub use scheduler::EveryInterval;
pub use webhook::CatchRawWebhook;

use flowcore::{App, AppDescriptor};
use flowruntime::AppRegistry;

pub fn scheduler_app() -> App {
    App::new(AppDescriptor::new("scheduler", "Scheduler")).with_trigger(EveryInterval)
}

pub fn webhook_app() -> App {
    App::new(AppDescriptor::new("webhook", "Webhook")).with_trigger(CatchRawWebhook)
}

pub fn http_app() -> App {
    let mut descriptor = AppDescriptor::new("http", "HTTP Request");
    descriptor.supports_connections = true;
    App::new(descriptor)
        .with_auth(TokenAuthentication)
        .with_before_request(BearerToken)
        .with_trigger(PollJson)
        .with_action(SendRequest)
}

pub fn debug_app() -> App {
    App::new(AppDescriptor::new("debug", "Debug")).with_action(LogAction)
}

pub fn formatter_app() -> App {
    App::new(AppDescriptor::new("formatter", "Formatter"))
        .with_action(ParseJson)
        .with_action(StringifyJson)
}

pub fn delay_app() -> App {
    App::new(AppDescriptor::new("delay", "Delay"))
        .with_action(DelayFor)
        .with_action(DelayUntil)
}

/// Register all built-in apps with a registry
pub fn register_all(registry: &mut AppRegistry) {
    registry.register(scheduler_app());
    registry.register(webhook_app());
    registry.register(http_app());
    registry.register(debug_app());
    registry.register(formatter_app());
    registry.register(delay_app());
}
