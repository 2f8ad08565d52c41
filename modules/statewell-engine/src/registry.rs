//! The registry reducer.
//!
//! Register → compose every per-component reducer over an event → reconcile
//! stale references until settled. State is replaced, never edited: each
//! action yields a new [`RegistryState`] whose unchanged components share
//! their `Arc` with the previous state.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use statewell_common::RegistryResult;
use statewell_events::Event;
use tracing::{debug, warn};

use crate::component::Component;
use crate::reference::Reference;
use crate::template::{ClassOptions, Template};

/// Canonical snapshot per identifier, in registration order.
pub type EntityMap = IndexMap<String, Arc<Component>>;

// ---------------------------------------------------------------------------
// Per-component reducer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct EntityReducer {
    template: Arc<Template>,
    options: ClassOptions,
}

impl EntityReducer {
    pub fn new(template: Arc<Template>, options: ClassOptions) -> Self {
        Self { template, options }
    }

    pub fn template(&self) -> &Arc<Template> {
        &self.template
    }

    pub fn options(&self) -> &ClassOptions {
        &self.options
    }

    /// `reduce(previous or none, event)`. A missing previous snapshot is
    /// synthesized from the template defaults first.
    pub fn reduce(
        &self,
        previous: Option<&Arc<Component>>,
        event: &Event,
        entities: &EntityMap,
    ) -> RegistryResult<Arc<Component>> {
        match previous {
            Some(previous) => previous.reduce(event, entities),
            None => Component::initial(&self.template, &self.options, entities).reduce(event, entities),
        }
    }
}

// ---------------------------------------------------------------------------
// Actions and state
// ---------------------------------------------------------------------------

pub enum RegistryAction {
    Register {
        id: String,
        template: Arc<Template>,
        options: ClassOptions,
    },
    /// Install an externally built snapshot as canonical, bypassing its reducer.
    Update {
        id: String,
        component: Arc<Component>,
    },
    DeferMount {
        ids: Vec<String>,
    },
    /// Empty the deferred-mount set once deferred components are mounted.
    ReleaseDeferred,
    Event(Event),
}

impl RegistryAction {
    pub fn event(&self) -> Option<&Event> {
        match self {
            RegistryAction::Event(event) => Some(event),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
pub struct RegistryState {
    reducers: IndexMap<String, EntityReducer>,
    entities: EntityMap,
    deferred: BTreeSet<String>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// At least one component registered.
    pub fn is_active(&self) -> bool {
        !self.reducers.is_empty()
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.reducers.contains_key(id)
    }

    pub fn entities(&self) -> &EntityMap {
        &self.entities
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Component>> {
        self.entities.get(id)
    }

    /// Current canonical snapshot for whatever `reference` targets. This may
    /// be a newer snapshot than the one the handle wraps.
    pub fn resolve(&self, reference: &Reference) -> Option<&Arc<Component>> {
        self.entities.get(reference.target_id())
    }

    pub fn reducer(&self, id: &str) -> Option<&EntityReducer> {
        self.reducers.get(id)
    }

    pub fn deferred(&self) -> &BTreeSet<String> {
        &self.deferred
    }

    pub fn is_deferred(&self, id: &str) -> bool {
        self.deferred.contains(id)
    }

    pub fn reduce(&self, action: &RegistryAction) -> RegistryResult<RegistryState> {
        match action {
            RegistryAction::Register {
                id,
                template,
                options,
            } => {
                if self.is_registered(id) {
                    return Ok(self.clone());
                }

                let reducer = EntityReducer::new(template.clone(), identified(template, options, id));
                let initial = reducer.reduce(None, &Event::empty(), &self.entities)?;

                let mut next = self.clone();
                next.reducers.insert(id.clone(), reducer);
                next.entities.insert(id.clone(), initial);
                next.settle(&self.entities);
                debug!(id = %id, template = %template.name(), "Registered component");
                Ok(next)
            }
            RegistryAction::Update { id, component } => {
                if !self.is_registered(id) {
                    warn!(id = %id, "Ignoring update for unregistered component");
                    return Ok(self.clone());
                }

                let mut next = self.clone();
                next.entities.insert(id.clone(), component.clone());
                next.settle(&self.entities);
                Ok(next)
            }
            RegistryAction::DeferMount { ids } => {
                let mut next = self.clone();
                next.deferred.extend(ids.iter().cloned());
                Ok(next)
            }
            RegistryAction::ReleaseDeferred => {
                let mut next = self.clone();
                next.deferred.clear();
                Ok(next)
            }
            RegistryAction::Event(event) => {
                if !self.is_active() {
                    return Ok(self.clone());
                }

                let mut next = self.clone();
                next.entities = self.compose(event)?;
                next.settle(&self.entities);
                Ok(next)
            }
        }
    }

    /// Run every registered reducer over `event`, in registration order.
    /// Each reducer sees the snapshots already produced earlier in the pass.
    fn compose(&self, event: &Event) -> RegistryResult<EntityMap> {
        let mut entities = self.entities.clone();
        for (id, reducer) in &self.reducers {
            let reduced = reducer.reduce(entities.get(id), event, &entities)?;
            entities.insert(id.clone(), reduced);
        }
        Ok(entities)
    }

    fn settle(&mut self, before: &EntityMap) {
        let passes = reconcile(before, &mut self.entities);
        debug!(passes, "Reconciled references");
    }
}

/// Make the registered id the component's identifier when the options would
/// resolve to something else.
fn identified(template: &Template, options: &ClassOptions, id: &str) -> ClassOptions {
    let mut options = options.clone();
    if template.identifier_for(&options) != id {
        options.insert("id".to_string(), Value::String(id.to_string()));
    }
    options
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Repair stale cross-component references in `after` until a fixed point.
///
/// Components replaced since `before` start out "changed". Each pass visits
/// every component: unchanged ones are regenerated when a reference is stale
/// (and join the changed set), changed ones are patched in place. Each id is
/// regenerated at most once per call, so cycles settle. Returns the number of
/// passes run.
pub fn reconcile(before: &EntityMap, after: &mut EntityMap) -> usize {
    let mut changed: HashSet<String> = after
        .iter()
        .filter(|(id, component)| {
            before
                .get(id.as_str())
                .map_or(true, |previous| !Arc::ptr_eq(previous, component))
        })
        .map(|(id, _)| id.clone())
        .collect();

    let mut passes = 0;
    loop {
        passes += 1;
        let mut progressed = false;
        let ids: Vec<String> = after.keys().cloned().collect();
        for id in ids {
            let Some(component) = after.get(&id).cloned() else {
                continue;
            };
            let regenerate = !changed.contains(&id);
            if component.sync_references(after, regenerate) {
                changed.insert(id);
                progressed = true;
            }
        }
        if !progressed {
            return passes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use serde_json::Map;

    use crate::template::Field;
    use crate::value::FieldValue;

    fn plain(name: &str) -> Arc<Template> {
        Template::builder(name)
            .field("data", Field::with_default(json!(0), |previous, _, _| Ok(previous)))
            .field("peer", Field::new(|_| FieldValue::null(), |previous, _, _| Ok(previous)))
            .build()
    }

    fn register(state: &RegistryState, id: &str, template: Arc<Template>) -> RegistryState {
        state
            .reduce(&RegistryAction::Register {
                id: id.to_string(),
                template,
                options: ClassOptions::new(),
            })
            .unwrap()
    }

    fn with_data(component: &Arc<Component>, data: Value) -> Arc<Component> {
        let mut state = Map::new();
        state.insert(component.identifier().to_string(), json!({ "data": data }));
        component.reduce(&Event::rehydrate(state), &EntityMap::new()).unwrap()
    }

    #[test]
    fn test_uninitialized_ignores_events() {
        let state = RegistryState::new();
        let next = state.reduce(&RegistryAction::Event(Event::new("TICK"))).unwrap();
        assert!(!next.is_active());
        assert!(next.entities().is_empty());
    }

    #[test]
    fn test_register_is_idempotent() {
        let state = register(&RegistryState::new(), "A", plain("A"));
        let first = state.get("A").unwrap().clone();
        let again = register(&state, "A", plain("Other"));
        assert!(Arc::ptr_eq(&first, again.get("A").unwrap()));
        assert_eq!(again.get("A").unwrap().template().name(), "A");
    }

    #[test]
    fn test_register_uses_registered_id() {
        let state = register(&RegistryState::new(), "left", plain("Counter"));
        assert_eq!(state.get("left").unwrap().identifier(), "left");
    }

    #[test]
    fn test_unchanged_event_keeps_every_snapshot() {
        let state = register(&RegistryState::new(), "A", plain("A"));
        let state = register(&state, "B", plain("B"));
        let next = state.reduce(&RegistryAction::Event(Event::new("NOISE"))).unwrap();
        for (id, component) in state.entities() {
            assert!(Arc::ptr_eq(component, next.get(id).unwrap()));
        }
    }

    #[test]
    fn test_defer_mount_is_a_union() {
        let state = RegistryState::new()
            .reduce(&RegistryAction::DeferMount {
                ids: vec!["A".into(), "B".into()],
            })
            .unwrap()
            .reduce(&RegistryAction::DeferMount {
                ids: vec!["B".into(), "C".into()],
            })
            .unwrap();
        assert_eq!(state.deferred().len(), 3);
        assert!(state.is_deferred("C"));

        let released = state.reduce(&RegistryAction::ReleaseDeferred).unwrap();
        assert!(released.deferred().is_empty());
    }

    #[test]
    fn test_update_for_unregistered_is_ignored() {
        let state = register(&RegistryState::new(), "A", plain("A"));
        let stray = state.get("A").unwrap().clone();
        let next = state
            .reduce(&RegistryAction::Update {
                id: "Z".into(),
                component: stray,
            })
            .unwrap();
        assert!(next.get("Z").is_none());
    }

    #[test]
    fn test_cycle_converges_and_patches_in_place() {
        let state = register(&RegistryState::new(), "A", plain("A"));
        let state = register(&state, "B", plain("B"));

        // A.peer -> B, B.peer -> A
        let a = state.get("A").unwrap().clone();
        let b = state.get("B").unwrap().clone();
        a.set_field("peer", b.reference(false).into());
        b.set_field("peer", a.reference(false).into());

        // Replace A directly; the new snapshot carries A's reference to B.
        let replaced = with_data(&a, json!(42));
        assert!(replaced.get("peer").unwrap().as_reference().unwrap().points_to(&b));
        let a_updated_at = replaced.updated_at();

        let mut entities = state.entities().clone();
        entities.insert("A".into(), replaced.clone());
        let passes = reconcile(state.entities(), &mut entities);
        assert!(passes <= 2, "took {passes} passes");

        let new_a = entities.get("A").unwrap();
        let new_b = entities.get("B").unwrap();
        assert!(Arc::ptr_eq(new_a, &replaced), "A was already changed; patched in place");
        assert!(!Arc::ptr_eq(new_b, &b), "B held a stale reference; regenerated");

        let b_peer = new_b.get("peer").unwrap();
        assert!(b_peer.as_reference().unwrap().points_to(new_a));
        let a_peer = new_a.get("peer").unwrap();
        assert!(a_peer.as_reference().unwrap().points_to(new_b));

        assert_eq!(new_a.updated_at(), a_updated_at, "in-place patch keeps updated_at");
        assert!(new_b.updated_at() >= b.updated_at());
    }

    #[test]
    fn test_resolve_follows_canonical_snapshot() {
        let state = register(&RegistryState::new(), "A", plain("A"));
        let stale = state.get("A").unwrap().reference(false);

        let mut next = state.clone();
        next.entities.insert("A".into(), with_data(state.get("A").unwrap(), json!(5)));

        let resolved = next.resolve(&stale).unwrap();
        assert!(!stale.points_to(resolved));
        assert_eq!(resolved.data(), Some(json!(5)));
    }

    #[test]
    fn test_reconcile_without_references_is_one_pass() {
        let state = register(&RegistryState::new(), "A", plain("A"));
        let mut entities = state.entities().clone();
        assert_eq!(reconcile(state.entities(), &mut entities), 1);
    }
}
