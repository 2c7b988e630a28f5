//! Parameter resolution using minijinja templates.
//!
//! String parameters may reference outputs of earlier steps in the same
//! execution. The render context is:
//!
//! ```json
//! {
//!   "step":     { "<step id>": { ...data_out... } },
//!   "trigger":  { ...data_out of the trigger... },
//!   "previous": { ...data_out of the step right before... }
//! }
//! ```
//!
//! so `"Issue {{ trigger.title }}"` or `{{ step["<uuid>"].id }}` both work.
//! Strings without template markers pass through untouched; nested objects
//! and arrays are walked recursively. Missing values render as empty strings.

use flowcore::{JsonObject, StepError, StepId};
use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value as JsonValue;

/// Outputs of the steps that already ran in one execution
#[derive(Debug, Clone, Default)]
pub struct TemplateScope {
    steps: JsonObject,
    trigger: Option<JsonObject>,
    previous: Option<JsonObject>,
}

impl TemplateScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step's output; the first recorded output is the trigger's
    pub fn record(&mut self, step_id: StepId, data_out: &JsonObject) {
        if self.trigger.is_none() {
            self.trigger = Some(data_out.clone());
        }
        self.steps
            .insert(step_id.to_string(), JsonValue::Object(data_out.clone()));
        self.previous = Some(data_out.clone());
    }

    pub fn previous(&self) -> Option<&JsonObject> {
        self.previous.as_ref()
    }

    fn context(&self) -> JsonValue {
        serde_json::json!({
            "step": self.steps,
            "trigger": self.trigger.clone().unwrap_or_default(),
            "previous": self.previous.clone().unwrap_or_default(),
        })
    }
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    env
}

/// Render every templated string in `parameters` against `scope`
pub fn resolve_parameters(
    parameters: &JsonObject,
    scope: &TemplateScope,
) -> Result<JsonObject, StepError> {
    let env = environment();
    let ctx = minijinja::Value::from_serialize(scope.context());

    parameters
        .iter()
        .map(|(key, value)| {
            resolve_value(&env, &ctx, key, value).map(|resolved| (key.clone(), resolved))
        })
        .collect()
}

fn resolve_value(
    env: &Environment<'_>,
    ctx: &minijinja::Value,
    key: &str,
    value: &JsonValue,
) -> Result<JsonValue, StepError> {
    match value {
        JsonValue::String(template) if is_template(template) => env
            .render_str(template, ctx.clone())
            .map(JsonValue::String)
            .map_err(|e| {
                StepError::InvalidParameters(format!("failed to resolve '{}': {}", key, e))
            }),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| resolve_value(env, ctx, key, item))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| resolve_value(env, ctx, k, v).map(|resolved| (k.clone(), resolved)))
            .collect::<Result<JsonObject, _>>()
            .map(JsonValue::Object),
        other => Ok(other.clone()),
    }
}

fn is_template(s: &str) -> bool {
    s.contains("{{") || s.contains("{%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::json_object;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_references_trigger_previous_and_step_by_id() {
        let trigger_id = Uuid::new_v4();
        let action_id = Uuid::new_v4();
        let mut scope = TemplateScope::new();
        scope.record(trigger_id, &json_object(json!({ "title": "Bug", "number": 12 })));
        scope.record(action_id, &json_object(json!({ "url": "https://x.test/12" })));

        let params = json_object(json!({
            "subject": "New issue: {{ trigger.title }}",
            "link": "{{ previous.url }}",
            "nested": { "n": format!("#{{{{ step[\"{}\"].number }}}}", trigger_id) },
            "list": ["{{ trigger.number }}", 3],
            "plain": "no templates here",
        }));

        let resolved = resolve_parameters(&params, &scope).unwrap();
        assert_eq!(resolved["subject"], "New issue: Bug");
        assert_eq!(resolved["link"], "https://x.test/12");
        assert_eq!(resolved["nested"]["n"], "#12");
        assert_eq!(resolved["list"], json!(["12", 3]));
        assert_eq!(resolved["plain"], "no templates here");
    }

    #[test]
    fn test_missing_values_render_empty() {
        let params = json_object(json!({ "x": "[{{ trigger.missing.deeper }}]" }));
        let resolved = resolve_parameters(&params, &TemplateScope::new()).unwrap();
        assert_eq!(resolved["x"], "[]");
    }

    #[test]
    fn test_syntax_errors_are_invalid_parameters() {
        let params = json_object(json!({ "x": "{{ trigger. }}" }));
        let err = resolve_parameters(&params, &TemplateScope::new()).unwrap_err();
        assert!(matches!(err, StepError::InvalidParameters(_)));
    }
}
