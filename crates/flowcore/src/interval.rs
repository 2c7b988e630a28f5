use crate::DefinitionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Minimum spacing between two polls of the same flow.
///
/// Parsed from `"<n>s"`, `"<n>m"`, `"<n>h"`, `"<n>d"` or one of the presets
/// `every_minute`, `every_hour`, `every_day`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval(Duration);

impl Interval {
    pub const EVERY_MINUTE: Interval = Interval(Duration::from_secs(60));
    pub const EVERY_HOUR: Interval = Interval(Duration::from_secs(60 * 60));
    pub const EVERY_DAY: Interval = Interval(Duration::from_secs(24 * 60 * 60));
    /// Longest accepted interval, one leap year
    pub const MAX: Interval = Interval(Duration::from_secs(366 * 24 * 60 * 60));

    pub fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for Interval {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        match text {
            "every_minute" => return Ok(Self::EVERY_MINUTE),
            "every_hour" => return Ok(Self::EVERY_HOUR),
            "every_day" => return Ok(Self::EVERY_DAY),
            _ => {}
        }

        let invalid = || DefinitionError::InvalidInterval(s.to_string());
        let split = text.len().checked_sub(1).ok_or_else(invalid)?;
        if !text.is_char_boundary(split) {
            return Err(invalid());
        }
        let (amount, unit) = text.split_at(split);
        let amount: u64 = amount.trim().parse().map_err(|_| invalid())?;
        let multiplier: u64 = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            "d" => 24 * 60 * 60,
            _ => return Err(invalid()),
        };
        let seconds = amount.checked_mul(multiplier).ok_or_else(invalid)?;
        if seconds == 0 || seconds > Self::MAX.0.as_secs() {
            return Err(invalid());
        }
        Ok(Self(Duration::from_secs(seconds)))
    }
}

impl TryFrom<String> for Interval {
    type Error = DefinitionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.to_string()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        if secs % 86_400 == 0 {
            write!(f, "{}d", secs / 86_400)
        } else if secs % 3_600 == 0 {
            write!(f, "{}h", secs / 3_600)
        } else if secs % 60 == 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{}s", secs)
        }
    }
}
