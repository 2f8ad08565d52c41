//! Reduction context and the purity fingerprint.
//!
//! One context is built per component recomputation and handed to every field
//! reducer as `&mut`. Reducers may read it and call its helpers; if its
//! fingerprint differs after a reducer returns, the whole registry update is
//! aborted with [`RegistryError::PurityViolation`].
//!
//! [`RegistryError::PurityViolation`]: statewell_common::RegistryError::PurityViolation

use serde_json::{json, Value};
use statewell_events::Event;

use crate::path::get_in;
use crate::reference::Reference;
use crate::registry::EntityMap;
use crate::template::ClassOptions;

pub struct ReductionContext<'a> {
    pub identifier: String,
    pub class_options: ClassOptions,
    entities: &'a EntityMap,
}

impl<'a> ReductionContext<'a> {
    pub(crate) fn new(identifier: String, class_options: ClassOptions, entities: &'a EntityMap) -> Self {
        Self {
            identifier,
            class_options,
            entities,
        }
    }

    pub fn is_target_for(&self, event: &Event) -> bool {
        event.is_targeted_at(&self.identifier)
    }

    /// Canonical serialization of `{identifier, classOptions}`.
    pub fn fingerprint(&self) -> String {
        json!({
            "identifier": self.identifier,
            "classOptions": self.class_options,
        })
        .to_string()
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.class_options.get(key)
    }

    /// Read `item` out of a rehydration payload.
    pub fn rehydrate_item<'p>(&self, payload: &'p Value, item: &str) -> Option<&'p Value> {
        get_in(payload, &[item])
    }

    /// Reference to a sibling component as reduced so far in this pass.
    ///
    /// Components registered earlier have already seen the current event;
    /// later ones still hold their previous snapshot. `None` when `id` was
    /// never registered.
    pub fn reference(&self, id: &str) -> Option<Reference> {
        self.entities.get(id).map(|component| component.reference(false))
    }
}
