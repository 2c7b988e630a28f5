use crate::coordinator::{ExecutionCoordinator, RunOptions};
use crate::runtime::{record_outputs, FlowTable};
use flowcore::{FlowError, FlowId, Interval};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

struct PollLoop {
    cancellation: CancellationToken,
    handle: JoinHandle<()>,
}

/// One poll loop per active flow.
///
/// A loop ticks at the trigger's interval and runs a live cycle on every
/// tick. A cycle that overruns its interval delays the next tick instead of
/// queueing extra ones.
pub struct PollScheduler {
    coordinator: Arc<ExecutionCoordinator>,
    flows: FlowTable,
    loops: Mutex<HashMap<FlowId, PollLoop>>,
}

impl PollScheduler {
    pub fn new(coordinator: Arc<ExecutionCoordinator>, flows: FlowTable) -> Self {
        Self {
            coordinator,
            flows,
            loops: Mutex::new(HashMap::new()),
        }
    }

    /// Start polling `flow_id`, replacing any loop already running for it
    pub fn start(&self, flow_id: FlowId, interval: Interval) {
        let cancellation = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            self.coordinator.clone(),
            self.flows.clone(),
            flow_id,
            interval,
            cancellation.clone(),
        ));

        let previous = self
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(flow_id, PollLoop { cancellation, handle });
        if let Some(previous) = previous {
            previous.cancellation.cancel();
        }
        tracing::info!(flow_id = %flow_id, interval = %interval, "poll loop started");
    }

    /// Cancel the flow's loop. Returns false if none was running.
    pub fn stop(&self, flow_id: FlowId) -> bool {
        let removed = self
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&flow_id);
        match removed {
            Some(poll) => {
                poll.cancellation.cancel();
                tracing::info!(flow_id = %flow_id, "poll loop stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, flow_id: FlowId) -> bool {
        self.loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&flow_id)
            .map(|poll| !poll.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn shutdown(&self) {
        let loops: Vec<(FlowId, PollLoop)> = self
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, poll) in loops {
            poll.cancellation.cancel();
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn poll_loop(
    coordinator: Arc<ExecutionCoordinator>,
    flows: FlowTable,
    flow_id: FlowId,
    interval: Interval,
    cancellation: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.as_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let flow = match flows.read().await.get(&flow_id) {
            Some(flow) if flow.active => flow.clone(),
            _ => {
                tracing::debug!(flow_id = %flow_id, "flow gone or inactive, ending poll loop");
                break;
            }
        };

        let options = RunOptions::live().with_cancellation(cancellation.child_token());
        match coordinator.run_cycle(&flow, options).await {
            Ok(report) => record_outputs(&flows, &report).await,
            Err(FlowError::CycleInFlight(_)) => {
                tracing::debug!(flow_id = %flow_id, "previous cycle still running, skipping tick");
            }
            Err(e) => {
                tracing::error!(flow_id = %flow_id, error = %e, "poll cycle failed");
            }
        }
    }
}
