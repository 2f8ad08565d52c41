//! Host-side mirror of the registry's externally visible data.
//!
//! The reflector keeps `id → {field: value, updatedAt}` for the components its
//! filter selects, refreshed on every event the host sees. It is also the
//! piece that answers the rehydrate-complete handshake: whatever state the
//! persistence layer loaded into it is handed back to the registry.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use serde_json::{Map, Value};
use statewell_common::RegistryResult;
use statewell_events::{event_types, Event};
use tracing::debug;

use crate::registry::EntityMap;
use crate::store::{HostEvent, StoreMethods};

pub type Reflection = Map<String, Value>;

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Which components a reflection covers. Exclusion wins over inclusion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflectionFilter {
    include: Option<Vec<String>>,
    exclude: Vec<String>,
}

impl ReflectionFilter {
    /// Reflect only these ids, in this order.
    pub fn include<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn selects(&self, id: &str) -> bool {
        if self.exclude.iter().any(|excluded| excluded == id) {
            return false;
        }
        self.include
            .as_ref()
            .map_or(true, |include| include.iter().any(|included| included == id))
    }

    /// Reflect `entities`. Included ids that are not registered are skipped.
    pub fn reflect(&self, entities: &EntityMap) -> Reflection {
        let ids: Vec<&str> = match &self.include {
            Some(include) => include.iter().map(String::as_str).collect(),
            None => entities.keys().map(String::as_str).collect(),
        };

        ids.into_iter()
            .filter(|id| self.selects(id))
            .filter_map(|id| {
                let component = entities.get(id)?;
                Some((id.to_string(), Value::Object(component.reflect())))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Reflector
// ---------------------------------------------------------------------------

pub struct Reflector {
    persistence_prefix: String,
    filter: ReflectionFilter,
    methods: OnceLock<StoreMethods>,
    state: Mutex<Reflection>,
}

impl Reflector {
    pub fn new(persistence_prefix: impl Into<String>) -> Self {
        Self {
            persistence_prefix: persistence_prefix.into(),
            filter: ReflectionFilter::default(),
            methods: OnceLock::new(),
            state: Mutex::new(Reflection::new()),
        }
    }

    pub fn with_filter(mut self, filter: ReflectionFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn filter(&self) -> &ReflectionFilter {
        &self.filter
    }

    /// Latest reflected (or loaded) state.
    pub fn state(&self) -> Reflection {
        self.lock_state().clone()
    }

    /// Replace the mirrored state, as a persistence layer does when it reads
    /// back what it stored.
    pub fn load(&self, state: Reflection) {
        debug!(components = state.len(), "Loaded persisted reflection");
        *self.lock_state() = state;
    }

    /// Observe one host event.
    ///
    /// No lock is held while the registry is called back, so hooks that
    /// dispatch during a restore reach the host again safely.
    pub fn reduce(&self, event: &HostEvent<'_>) -> RegistryResult<()> {
        match event {
            HostEvent::Probe(methods) => {
                if self.methods.set((*methods).clone()).is_err() {
                    debug!("Reflector already bound to a store");
                }
                self.refresh();
            }
            HostEvent::RehydrateComplete(rehydrator) => {
                rehydrator.restore(self.state())?;
            }
            HostEvent::Action(event) if event.is_persistence(&self.persistence_prefix) => {
                if let Some(Value::Object(restored)) = self.persisted_payload(event) {
                    self.load(restored.clone());
                }
            }
            HostEvent::Action(_) => self.refresh(),
        }
        Ok(())
    }

    /// Payload of the persistence layer's own rehydrate event, if `event` is one.
    fn persisted_payload<'e>(&self, event: &'e Event) -> Option<&'e Value> {
        let local = event.event_type.strip_prefix(&self.persistence_prefix)?;
        if local != event_types::PERSISTENCE_REHYDRATE {
            return None;
        }
        event.get("payload")
    }

    fn refresh(&self) {
        let Some(methods) = self.methods.get() else {
            return;
        };
        let reflection = methods.reflection(&self.filter);
        *self.lock_state() = reflection;
    }

    fn lock_state(&self) -> MutexGuard<'_, Reflection> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
