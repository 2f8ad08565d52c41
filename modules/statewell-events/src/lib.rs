//! Inbound event shape for the component registry.
//!
//! Events are plain facts: a type string, an optional target identifier and
//! an open JSON payload. Zero knowledge of components, templates or stores.
//!
//! The registry recognizes a handful of internal type families (see
//! [`event_types`]); everything else passes through to every component.

pub mod types;

pub use types::{event_types, Event, UpdateReason};
