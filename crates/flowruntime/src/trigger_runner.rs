use flowcore::{RunContext, StepError, Trigger, TriggerItem, TriggerSink};
use std::time::{Duration, Instant};

/// Items collected from one trigger invocation
#[derive(Debug)]
pub struct TriggerRun {
    /// Sorted oldest first
    pub items: Vec<TriggerItem>,
    /// Outcome of `run`; items pushed before a failure are kept above
    pub result: Result<(), StepError>,
    pub duration_ms: u64,
}

/// Invokes a trigger and drains the items it pushes
pub struct TriggerRunner {
    channel_capacity: usize,
}

impl TriggerRunner {
    pub fn new(channel_capacity: usize) -> Self {
        Self { channel_capacity }
    }

    pub async fn run(
        &self,
        trigger: &dyn Trigger,
        ctx: &RunContext,
        timeout: Option<Duration>,
    ) -> TriggerRun {
        let start = Instant::now();
        let (sink, mut rx) = TriggerSink::channel(self.channel_capacity);

        // The sink is dropped as soon as `run` finishes, which ends the drain
        let invoke = async move {
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, trigger.run(ctx, &sink)).await {
                    Ok(result) => result.map_err(StepError::trigger),
                    Err(_) => Err(StepError::Timeout {
                        millis: limit.as_millis() as u64,
                    }),
                },
                None => trigger.run(ctx, &sink).await.map_err(StepError::trigger),
            };
            drop(sink);
            result
        };

        let collect = async {
            let mut items = Vec::new();
            while let Some(item) = rx.recv().await {
                items.push(item);
            }
            items
        };

        let (result, mut items) = tokio::join!(invoke, collect);

        // Stable sort: ties keep push order
        items.sort_by(|a, b| trigger.sort(a, b));

        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => tracing::debug!(
                trigger = trigger.key(),
                items = items.len(),
                duration_ms,
                "trigger run completed"
            ),
            Err(e) => tracing::warn!(
                trigger = trigger.key(),
                items = items.len(),
                error = %e,
                "trigger run failed"
            ),
        }

        TriggerRun {
            items,
            result,
            duration_ms,
        }
    }
}

impl Default for TriggerRunner {
    fn default() -> Self {
        Self::new(1024)
    }
}
