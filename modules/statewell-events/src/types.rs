//! Core types for inbound events. Domain-agnostic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Internal event type strings. Anything outside this set belongs to the host.
pub mod event_types {
    pub const PROBE: &str = "@@statewell/PROBE";
    pub const UPDATE: &str = "@@statewell/UPDATE";
    pub const MOUNT: &str = "@@statewell/MOUNT";
    pub const RESET: &str = "@@statewell/RESET";
    pub const REHYDRATE: &str = "@@statewell/REHYDRATE";
    pub const REHYDRATE_COMPLETE: &str = "@@statewell/REHYDRATE_COMPLETE";
    pub const REFRESH_PROXIES: &str = "@@statewell/REFRESH_PROXIES";

    /// Suffix of the host persistence layer's own rehydrate event.
    pub const PERSISTENCE_REHYDRATE: &str = "REHYDRATE";
}

/// An event as dispatched through the host store.
///
/// Serializes as `{"type": ..., "targetId": ..., ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "targetId", default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            target: None,
            payload: Map::new(),
        }
    }

    /// The `{}` event: no type, no target, no payload. Reducers fed this
    /// event must return their default.
    pub fn empty() -> Self {
        Self::new("")
    }

    pub fn targeted(event_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(event_type).with_target(target)
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn mount(target: impl Into<String>) -> Self {
        Self::targeted(event_types::MOUNT, target)
    }

    pub fn reset(target: impl Into<String>) -> Self {
        Self::targeted(event_types::RESET, target)
    }

    /// Registry rehydration. `state` maps identifier to restored fields
    /// (optionally carrying `updatedAt`).
    pub fn rehydrate(state: Map<String, Value>) -> Self {
        Self::new(event_types::REHYDRATE).with_payload("state", Value::Object(state))
    }

    pub fn refresh_proxies() -> Self {
        Self::new(event_types::REFRESH_PROXIES)
    }

    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }

    pub fn is_targeted_at(&self, id: &str) -> bool {
        self.target.as_deref() == Some(id)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Restored fields for `id` carried by a rehydrate event.
    pub fn rehydrated(&self, id: &str) -> Option<&Map<String, Value>> {
        if !self.is(event_types::REHYDRATE) {
            return None;
        }
        self.payload.get("state")?.get(id)?.as_object()
    }

    /// True for events owned by the host's persistence protocol.
    pub fn is_persistence(&self, persistence_prefix: &str) -> bool {
        !persistence_prefix.is_empty() && self.event_type.starts_with(persistence_prefix)
    }
}

/// Why a component snapshot was replaced. Passed to update hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateReason {
    Updated,
    Rehydrate,
    Reset,
}

impl UpdateReason {
    pub fn for_event(event: &Event, persistence_prefix: &str) -> Self {
        let persisted_rehydrate = event.is_persistence(persistence_prefix)
            && event.event_type.strip_prefix(persistence_prefix)
                == Some(event_types::PERSISTENCE_REHYDRATE);
        if event.is(event_types::REHYDRATE) || persisted_rehydrate {
            UpdateReason::Rehydrate
        } else if event.is(event_types::RESET) {
            UpdateReason::Reset
        } else {
            UpdateReason::Updated
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_flat() {
        let event = Event::targeted("TICK", "Counter").with_payload("by", json!(2));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"type": "TICK", "targetId": "Counter", "by": 2}));

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_untargeted_event_omits_target() {
        let value = serde_json::to_value(Event::new("TICK")).unwrap();
        assert_eq!(value, json!({"type": "TICK"}));
    }

    #[test]
    fn test_rehydrated_reads_only_rehydrate_events() {
        let mut state = Map::new();
        state.insert("A".into(), json!({"data": 5}));
        let event = Event::rehydrate(state.clone());
        assert_eq!(event.rehydrated("A").unwrap()["data"], json!(5));
        assert!(event.rehydrated("B").is_none());

        let other = Event::new("TICK").with_payload("state", Value::Object(state));
        assert!(other.rehydrated("A").is_none());
    }

    #[test]
    fn test_update_reason_mapping() {
        assert_eq!(
            UpdateReason::for_event(&Event::reset("A"), "persist/"),
            UpdateReason::Reset
        );
        assert_eq!(
            UpdateReason::for_event(&Event::rehydrate(Map::new()), "persist/"),
            UpdateReason::Rehydrate
        );
        assert_eq!(
            UpdateReason::for_event(&Event::new("persist/REHYDRATE"), "persist/"),
            UpdateReason::Rehydrate
        );
        assert_eq!(
            UpdateReason::for_event(&Event::new("persist/FLUSH"), "persist/"),
            UpdateReason::Updated
        );
        assert_eq!(
            UpdateReason::for_event(&Event::new("TICK"), "persist/"),
            UpdateReason::Updated
        );
    }

    #[test]
    fn test_empty_prefix_never_matches_persistence() {
        assert!(!Event::new("persist/REHYDRATE").is_persistence(""));
        assert!(Event::new("persist/REHYDRATE").is_persistence("persist/"));
    }
}
