use flowcore::{Action, App, DefinitionError, Flow, Step, StepType, Trigger};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A step resolved to the integration code it runs
#[derive(Clone)]
pub enum StepBinding {
    Trigger(Arc<dyn Trigger>),
    Action(Arc<dyn Action>),
}

/// Summary of an installed app for listings
#[derive(Debug, Clone, serde::Serialize)]
pub struct AppMetadata {
    pub key: String,
    pub name: String,
    pub supports_connections: bool,
    pub triggers: Vec<CapabilityMetadata>,
    pub actions: Vec<CapabilityMetadata>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CapabilityMetadata {
    pub key: String,
    pub name: String,
    pub description: String,
}

/// Registry of installed apps, keyed by app key
pub struct AppRegistry {
    apps: BTreeMap<String, Arc<App>>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self {
            apps: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, app: App) {
        let key = app.key().to_string();
        tracing::info!(
            app = %key,
            triggers = app.triggers.len(),
            actions = app.actions.len(),
            "registering app"
        );
        self.apps.insert(key, Arc::new(app));
    }

    pub fn app(&self, app_key: &str) -> Result<Arc<App>, DefinitionError> {
        self.apps
            .get(app_key)
            .cloned()
            .ok_or_else(|| DefinitionError::UnknownApp(app_key.to_string()))
    }

    pub fn trigger(&self, app_key: &str, key: &str) -> Result<Arc<dyn Trigger>, DefinitionError> {
        self.app(app_key)?
            .triggers
            .get(key)
            .cloned()
            .ok_or_else(|| DefinitionError::UnknownTrigger {
                app_key: app_key.to_string(),
                key: key.to_string(),
            })
    }

    pub fn action(&self, app_key: &str, key: &str) -> Result<Arc<dyn Action>, DefinitionError> {
        self.app(app_key)?
            .actions
            .get(key)
            .cloned()
            .ok_or_else(|| DefinitionError::UnknownAction {
                app_key: app_key.to_string(),
                key: key.to_string(),
            })
    }

    /// Resolve a step to its trigger or action
    pub fn bind(&self, step: &Step) -> Result<StepBinding, DefinitionError> {
        match step.step_type {
            StepType::Trigger => self.trigger(&step.app_key, &step.key).map(StepBinding::Trigger),
            StepType::Action => self.action(&step.app_key, &step.key).map(StepBinding::Action),
        }
    }

    /// Check a flow's shape and that every step binds to an installed app
    pub fn validate_flow(&self, flow: &Flow) -> Result<(), DefinitionError> {
        flow.validate()?;
        for step in &flow.steps {
            self.bind(step)?;
        }
        Ok(())
    }

    pub fn list_apps(&self) -> Vec<String> {
        self.apps.keys().cloned().collect()
    }

    pub fn get_metadata(&self, app_key: &str) -> Option<AppMetadata> {
        let app = self.apps.get(app_key)?;
        Some(AppMetadata {
            key: app.descriptor.key.clone(),
            name: app.descriptor.name.clone(),
            supports_connections: app.descriptor.supports_connections,
            triggers: app
                .triggers
                .values()
                .map(|t| CapabilityMetadata {
                    key: t.key().to_string(),
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                })
                .collect(),
            actions: app
                .actions
                .values()
                .map(|a| CapabilityMetadata {
                    key: a.key().to_string(),
                    name: a.name().to_string(),
                    description: a.description().to_string(),
                })
                .collect(),
        })
    }
}

impl Default for AppRegistry {
    fn default() -> Self {
        Self::new()
    }
}
