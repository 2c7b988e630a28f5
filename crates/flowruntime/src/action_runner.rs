use flowcore::{Action, ActionItem, ActionSink, RunContext, StepError};
use std::time::{Duration, Instant};

/// Invokes a single action and collects its one output item.
///
/// No retries happen here; a failed action is reported as-is.
#[derive(Default)]
pub struct ActionRunner;

impl ActionRunner {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(
        &self,
        action: &dyn Action,
        ctx: &RunContext,
        timeout: Option<Duration>,
    ) -> Result<ActionItem, StepError> {
        let start = Instant::now();
        let (sink, mut rx) = ActionSink::channel();

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, action.run(ctx, &sink)).await {
                Ok(result) => result.map_err(StepError::action),
                Err(_) => Err(StepError::Timeout {
                    millis: limit.as_millis() as u64,
                }),
            },
            None => action.run(ctx, &sink).await.map_err(StepError::action),
        };
        drop(sink);

        let outcome = result.and_then(|()| rx.try_recv().map_err(|_| StepError::MissingActionOutput));

        let duration_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => tracing::debug!(action = action.key(), duration_ms, "action run completed"),
            Err(e) => tracing::warn!(action = action.key(), duration_ms, error = %e, "action run failed"),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowcore::{json_object, AppDescriptor, AuthHandle, IntegrationError, JsonObject};
    use serde_json::json;
    use std::sync::Arc;

    enum Behavior {
        Output,
        Silent,
        Reject,
        Twice,
    }

    struct Scripted(Behavior);

    #[async_trait]
    impl Action for Scripted {
        fn key(&self) -> &str {
            "scripted"
        }

        fn name(&self) -> &str {
            "Scripted"
        }

        async fn run(&self, ctx: &RunContext, output: &ActionSink) -> Result<(), IntegrationError> {
            match self.0 {
                Behavior::Output => output.set(ActionItem::new(ctx.parameters().clone())),
                Behavior::Silent => Ok(()),
                Behavior::Reject => Err(IntegrationError::new("quota exceeded")
                    .with_details(json_object(json!({ "retry_after": 60 })))),
                Behavior::Twice => {
                    output.set(ActionItem::default())?;
                    output.set(ActionItem::default())
                }
            }
        }
    }

    fn ctx() -> RunContext {
        RunContext::new(
            Arc::new(AppDescriptor::new("test", "Test")),
            AuthHandle::detached(JsonObject::new()),
        )
        .with_step(flowcore::StepScope {
            id: uuid::Uuid::new_v4(),
            app_key: "test".into(),
            key: "scripted".into(),
            parameters: json_object(json!({ "text": "hi" })),
        })
    }

    #[tokio::test]
    async fn test_returns_the_single_output() {
        let item = ActionRunner::new().run(&Scripted(Behavior::Output), &ctx(), None).await.unwrap();
        assert_eq!(item.raw["text"], "hi");
    }

    #[tokio::test]
    async fn test_missing_output_fails_the_step() {
        let err = ActionRunner::new().run(&Scripted(Behavior::Silent), &ctx(), None).await.unwrap_err();
        assert_eq!(err, StepError::MissingActionOutput);
    }

    #[tokio::test]
    async fn test_rejection_payload_is_captured() {
        let err = ActionRunner::new().run(&Scripted(Behavior::Reject), &ctx(), None).await.unwrap_err();
        assert_eq!(err.error_details()["details"]["retry_after"], 60);
    }

    #[tokio::test]
    async fn test_second_output_is_rejected() {
        let err = ActionRunner::new().run(&Scripted(Behavior::Twice), &ctx(), None).await.unwrap_err();
        assert!(matches!(err, StepError::ActionExecution { .. }));
    }
}
