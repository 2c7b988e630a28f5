use crate::JsonObject;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Stable per-event identifier used for ordering and deduplication.
///
/// Integer ids compare numerically, so `"10"` sorts after `"9"`, and all of
/// them sort before any non-integer id. Non-integer ids compare as plain
/// strings.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InternalId(String);

impl InternalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<i128> {
        self.0.trim().parse().ok()
    }
}

impl PartialEq for InternalId {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Hash for InternalId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.numeric() {
            Some(n) => n.hash(state),
            None => self.0.hash(state),
        }
    }
}

impl Ord for InternalId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for InternalId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InternalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for InternalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for InternalId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// One event discovered by a trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerItem {
    pub raw: JsonObject,
    pub meta: TriggerItemMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerItemMeta {
    pub internal_id: InternalId,
}

impl TriggerItem {
    pub fn new(internal_id: impl Into<InternalId>, raw: JsonObject) -> Self {
        Self {
            raw,
            meta: TriggerItemMeta {
                internal_id: internal_id.into(),
            },
        }
    }

    pub fn internal_id(&self) -> &InternalId {
        &self.meta.internal_id
    }
}

/// The single output reported by an action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub raw: JsonObject,
}

impl ActionItem {
    pub fn new(raw: JsonObject) -> Self {
        Self { raw }
    }
}
