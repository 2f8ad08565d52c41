//! Component snapshots and per-component recomputation.
//!
//! A snapshot is replaced, never edited, when its data changes: `reduce`
//! returns the same `Arc` when every field reducer hands back an equal value,
//! and a fresh snapshot otherwise. The only in-place edit is reference
//! patching during reconciliation (see [`Component::sync_references`]).

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use statewell_common::{RegistryError, RegistryResult};
use statewell_events::{event_types, Event};
use tracing::{debug, error};

use crate::context::ReductionContext;
use crate::reference::{Reference, WeakReference};
use crate::registry::EntityMap;
use crate::template::{ClassOptions, Template};
use crate::value::FieldValue;

pub const UPDATED_AT: &str = "updatedAt";

pub struct Component {
    template: Arc<Template>,
    identifier: String,
    options: ClassOptions,
    fields: RwLock<IndexMap<String, FieldValue>>,
    is_mounted: bool,
    updated_at: DateTime<Utc>,
    reference: Mutex<Option<WeakReference>>,
}

impl Component {
    /// Snapshot synthesized from the template's default-state suppliers.
    pub fn initial(
        template: &Arc<Template>,
        options: &ClassOptions,
        entities: &EntityMap,
    ) -> Arc<Component> {
        let identifier = template.identifier_for(options);
        let ctx = ReductionContext::new(identifier.clone(), options.clone(), entities);
        let fields = template
            .fields()
            .iter()
            .map(|(name, field)| (name.clone(), field.default_value(&ctx)))
            .collect();

        Arc::new(Self::assemble(
            template.clone(),
            identifier,
            options.clone(),
            fields,
            false,
            Utc::now(),
        ))
    }

    fn assemble(
        template: Arc<Template>,
        identifier: String,
        options: ClassOptions,
        fields: IndexMap<String, FieldValue>,
        is_mounted: bool,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            template,
            identifier,
            options,
            fields: RwLock::new(fields),
            is_mounted,
            updated_at,
            reference: Mutex::new(None),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn options(&self) -> &ClassOptions {
        &self.options
    }

    pub fn is_mounted(&self) -> bool {
        self.is_mounted
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn get(&self, field: &str) -> Option<FieldValue> {
        self.read_fields().get(field).cloned()
    }

    /// Shortcut for the conventional `data` field.
    pub fn data(&self) -> Option<Value> {
        self.get("data")?.as_data().cloned()
    }

    /// Copy of every field value, in declaration order.
    pub fn fields(&self) -> IndexMap<String, FieldValue> {
        self.read_fields().clone()
    }

    fn read_fields(&self) -> RwLockReadGuard<'_, IndexMap<String, FieldValue>> {
        self.fields.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn set_field(&self, name: &str, value: FieldValue) {
        self.fields
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
    }

    /// The memoized reference to this snapshot. The same handle is returned
    /// while anything still holds it; a new one is allocated otherwise, or
    /// when `force_regenerate` is set.
    pub fn reference(self: &Arc<Self>, force_regenerate: bool) -> Reference {
        let mut memo = self.reference.lock().unwrap_or_else(PoisonError::into_inner);
        if !force_regenerate {
            if let Some(reference) = memo.as_ref().and_then(WeakReference::upgrade) {
                return reference;
            }
        }
        let reference = Reference::new(self);
        *memo = Some(reference.downgrade());
        reference
    }

    /// Recompute this snapshot for `event`.
    ///
    /// `entities` is the registry as reduced so far in the current pass; it
    /// backs [`ReductionContext::reference`].
    pub fn reduce(self: &Arc<Self>, event: &Event, entities: &EntityMap) -> RegistryResult<Arc<Component>> {
        let previous = self.fields();
        let targeted = event.is_targeted_at(&self.identifier);
        let mut ctx = ReductionContext::new(self.identifier.clone(), self.options.clone(), entities);
        let fingerprint = ctx.fingerprint();

        let mut next = IndexMap::with_capacity(previous.len());
        let mut is_mounted = self.is_mounted;
        let mut changed = false;
        let mut restored_at = None;

        if event.is(event_types::MOUNT) {
            next = previous;
            if targeted && !is_mounted {
                is_mounted = true;
                changed = true;
            }
        } else if event.is(event_types::REHYDRATE) {
            let restored = event.rehydrated(&self.identifier);
            for (name, value) in previous {
                let value = restored
                    .and_then(|r| r.get(&name))
                    .cloned()
                    .map_or(value, FieldValue::Data);
                next.insert(name, value);
            }
            restored_at = restored.and_then(|r| r.get(UPDATED_AT)).and_then(parse_timestamp);
            changed = true;
        } else {
            let reset = targeted && event.is(event_types::RESET);
            let empty = Event::empty();
            for (name, field) in self.template.fields() {
                let (input, source_event) = if reset {
                    (field.default_value(&ctx), &empty)
                } else {
                    let input = previous
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| field.default_value(&ctx));
                    (input, event)
                };

                let value = field.reduce(input, source_event, &mut ctx).map_err(|source| {
                    error!(id = %self.identifier, field = %name, error = %source, "Reducer failed");
                    RegistryError::Recomputation {
                        id: self.identifier.clone(),
                        field: name.clone(),
                        source: source.into(),
                    }
                })?;

                if ctx.fingerprint() != fingerprint {
                    error!(id = %self.identifier, field = %name, "Reducer mutated its reduction context");
                    return Err(RegistryError::PurityViolation {
                        template: self.template.name().to_string(),
                        field: name.clone(),
                    });
                }

                changed = changed || reset || previous.get(name) != Some(&value);
                next.insert(name.clone(), value);
            }
        }

        if !changed {
            return Ok(self.clone());
        }

        Ok(Arc::new(Self::assemble(
            self.template.clone(),
            self.identifier.clone(),
            self.options.clone(),
            next,
            is_mounted,
            restored_at.unwrap_or_else(Utc::now),
        )))
    }

    /// Repair reference fields whose target is no longer canonical in
    /// `entities`.
    ///
    /// With `regenerate`, a new snapshot carrying the patched references is
    /// installed as canonical for this identifier and `true` is returned.
    /// Without it, the fields are patched in place on this snapshot (no new
    /// `updated_at`) and `false` is returned.
    pub fn sync_references(self: &Arc<Self>, entities: &mut EntityMap, regenerate: bool) -> bool {
        let updates: Vec<(String, FieldValue)> = self
            .read_fields()
            .iter()
            .filter_map(|(name, value)| {
                let reference = value.as_reference()?;
                let canonical = entities.get(reference.target_id())?;
                if reference.points_to(canonical) {
                    return None;
                }
                Some((name.clone(), FieldValue::Reference(canonical.reference(false))))
            })
            .collect();

        if updates.is_empty() {
            return false;
        }

        if regenerate {
            let mut fields = self.fields();
            fields.extend(updates);
            let regenerated = Self::assemble(
                self.template.clone(),
                self.identifier.clone(),
                self.options.clone(),
                fields,
                self.is_mounted,
                Utc::now(),
            );
            debug!(id = %self.identifier, "Regenerated component with refreshed references");
            entities.insert(self.identifier.clone(), Arc::new(regenerated));
            true
        } else {
            let mut fields = self.fields.write().unwrap_or_else(PoisonError::into_inner);
            debug!(id = %self.identifier, patched = updates.len(), "Patched references in place");
            fields.extend(updates);
            false
        }
    }

    /// Externally visible data: every non-reference field plus `updatedAt`.
    pub fn reflect(&self) -> Map<String, Value> {
        let mut data: Map<String, Value> = self
            .read_fields()
            .iter()
            .filter_map(|(name, value)| Some((name.clone(), value.as_data()?.clone())))
            .collect();
        data.insert(
            UPDATED_AT.to_string(),
            serde_json::to_value(self.updated_at).unwrap_or(Value::Null),
        );
        data
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("identifier", &self.identifier)
            .field("template", &self.template.name())
            .field("fields", &*self.read_fields())
            .field("is_mounted", &self.is_mounted)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(millis) => DateTime::from_timestamp_millis(millis.as_i64()?),
        other => serde_json::from_value(other.clone()).ok(),
    }
}
