use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowcore::{
    json_object, Action, ActionItem, ActionSink, IntegrationError, JsonObjectExt, RunContext,
};
use serde_json::json;
use tokio::time::{sleep, Duration};

/// Pause the chain for `amount` `unit`s (milliseconds, seconds, minutes, hours)
pub struct DelayFor;

#[async_trait]
impl Action for DelayFor {
    fn key(&self) -> &str {
        "delay_for"
    }

    fn name(&self) -> &str {
        "Delay for"
    }

    fn description(&self) -> &str {
        "Delay the following steps for a fixed amount of time"
    }

    async fn run(&self, ctx: &RunContext, output: &ActionSink) -> Result<(), IntegrationError> {
        let params = ctx.parameters();
        let amount = params
            .get_u64("amount")
            .ok_or_else(|| IntegrationError::new("parameter 'amount' must be a number"))?;
        let unit = params.get_str("unit").unwrap_or("seconds");
        let delay = duration_of(amount, unit)?;

        ctx.events.info(format!("Delaying for {}ms", delay.as_millis()));
        wait(ctx, delay).await?;

        output.set(ActionItem::new(json_object(json!({
            "amount": amount,
            "unit": unit,
            "delayed_ms": delay.as_millis() as u64,
        }))))
    }
}

/// Pause the chain until the RFC 3339 timestamp in `until`
pub struct DelayUntil;

#[async_trait]
impl Action for DelayUntil {
    fn key(&self) -> &str {
        "delay_until"
    }

    fn name(&self) -> &str {
        "Delay until"
    }

    fn description(&self) -> &str {
        "Delay the following steps until a point in time"
    }

    async fn run(&self, ctx: &RunContext, output: &ActionSink) -> Result<(), IntegrationError> {
        let raw = ctx
            .parameters()
            .get_str("until")
            .ok_or_else(|| IntegrationError::new("parameter 'until' must be a timestamp"))?;
        let until: DateTime<Utc> = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| {
                IntegrationError::new(format!("invalid timestamp: {}", e)).with_detail("until", raw)
            })?
            .with_timezone(&Utc);

        // A timestamp in the past does not wait at all
        let delay = (until - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        wait(ctx, delay).await?;

        output.set(ActionItem::new(json_object(json!({
            "until": until.to_rfc3339(),
        }))))
    }
}

fn duration_of(amount: u64, unit: &str) -> Result<Duration, IntegrationError> {
    let millis = match unit {
        "milliseconds" | "ms" => amount,
        "seconds" | "s" => amount.saturating_mul(1_000),
        "minutes" | "m" => amount.saturating_mul(60_000),
        "hours" | "h" => amount.saturating_mul(3_600_000),
        other => {
            return Err(IntegrationError::new(format!("unsupported unit: {}", other)))
        }
    };
    Ok(Duration::from_millis(millis))
}

/// Sleep unless the run is cancelled first
async fn wait(ctx: &RunContext, delay: Duration) -> Result<(), IntegrationError> {
    tokio::select! {
        _ = sleep(delay) => Ok(()),
        _ = ctx.cancellation.cancelled() => Err(IntegrationError::new("delay cancelled")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(duration_of(250, "ms").unwrap(), Duration::from_millis(250));
        assert_eq!(duration_of(2, "minutes").unwrap(), Duration::from_secs(120));
        assert!(duration_of(1, "weeks").is_err());
    }
}
