//! Component registry and reconciliation engine.
//!
//! Registers named, versioned components and recomputes them from dispatched
//! events: per-field reduce → compose over every registered component →
//! reconcile stale cross-component references until settled.
//!
//! Consumers define their domain by building [`Template`]s (ordered field
//! reducers plus lifecycle hooks) and plug the registry into a [`Host`] store
//! with [`ComponentStore::attach`].

pub mod chain;
pub mod component;
pub mod context;
pub mod memory;
pub mod path;
pub mod reference;
pub mod reflector;
pub mod registry;
pub mod store;
pub mod template;
pub mod value;

pub use chain::{call_event_chain, Hook, HookCall};
pub use component::Component;
pub use context::ReductionContext;
pub use memory::MemoryHost;
pub use path::get_in;
pub use reference::Reference;
pub use reflector::{Reflection, ReflectionFilter, Reflector};
pub use registry::{reconcile, EntityMap, EntityReducer, RegistryAction, RegistryState};
pub use store::{ComponentStore, Host, HostEvent, Rehydrator, StoreMethods};
pub use template::{
    base_component, combine_fields, data_component, ClassOptions, Field, Template,
    TemplateBuilder, BASE_COMPONENT, DATA_COMPONENT,
};
pub use value::FieldValue;

pub use statewell_common::{RegistryError, RegistryResult, StoreConfig};
pub use statewell_events::{event_types, Event, UpdateReason};
