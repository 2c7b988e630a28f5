use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use flowcore::{
    json_object, IntegrationError, Interval, JsonObject, JsonObjectExt, RunContext, Trigger,
    TriggerItem, TriggerSink,
};
use serde_json::json;

/// Fires once per interval bucket.
///
/// The item id is the bucket's start as a Unix timestamp, so polls that land
/// in the same bucket produce the same id and the dedup ledger drops the
/// repeats.
pub struct EveryInterval;

impl EveryInterval {
    fn configured(parameters: &JsonObject) -> Result<Interval, IntegrationError> {
        match parameters.get_str("interval") {
            Some(text) => text
                .parse()
                .map_err(|e: flowcore::DefinitionError| IntegrationError::new(e.to_string())),
            None => Ok(Interval::EVERY_MINUTE),
        }
    }
}

#[async_trait]
impl Trigger for EveryInterval {
    fn key(&self) -> &str {
        "every_interval"
    }

    fn name(&self) -> &str {
        "Every interval"
    }

    fn description(&self) -> &str {
        "Triggers once per interval, e.g. every 15m or every_day"
    }

    fn interval(&self, parameters: &JsonObject) -> Option<Interval> {
        Self::configured(parameters).ok()
    }

    async fn run(&self, ctx: &RunContext, items: &TriggerSink) -> Result<(), IntegrationError> {
        let interval = Self::configured(ctx.parameters())?;
        let now = Utc::now();
        let start = bucket_start(now, interval);
        let started_at = Utc
            .timestamp_opt(start, 0)
            .single()
            .unwrap_or(now);

        let raw = json_object(json!({
            "timestamp": started_at.to_rfc3339(),
            "epoch": start,
            "fired_at": now.to_rfc3339(),
            "interval_seconds": interval.as_duration().as_secs(),
        }));
        items.push(TriggerItem::new(start.to_string(), raw)).await
    }
}

/// Unix timestamp of the bucket containing `now`
pub(crate) fn bucket_start(now: DateTime<Utc>, interval: Interval) -> i64 {
    let seconds = interval.as_duration().as_secs().max(1) as i64;
    now.timestamp().div_euclid(seconds) * seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_bucket_same_id() {
        let interval: Interval = "15m".parse().unwrap();
        let a = Utc.with_ymd_and_hms(2024, 3, 1, 10, 1, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 3, 1, 10, 14, 59).unwrap();
        let c = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();

        assert_eq!(bucket_start(a, interval), bucket_start(b, interval));
        assert_eq!(bucket_start(c, interval) - bucket_start(a, interval), 900);
    }

    #[test]
    fn test_interval_comes_from_parameters() {
        let params = json_object(json!({ "interval": "every_hour" }));
        assert_eq!(EveryInterval.interval(&params), Some(Interval::EVERY_HOUR));

        let params = json_object(json!({ "interval": "soon" }));
        assert_eq!(EveryInterval.interval(&params), None);

        let params = json_object(json!({ "interval": "1000000000000000d" }));
        assert_eq!(EveryInterval.interval(&params), None);

        assert_eq!(
            EveryInterval.interval(&JsonObject::new()),
            Some(Interval::EVERY_MINUTE)
        );
    }
}
