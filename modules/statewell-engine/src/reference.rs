//! Identity-stable handles to component snapshots.
//!
//! Dependents store a [`Reference`] in their own fields instead of the
//! snapshot. Handles compare by `(target id, generation)`, and every
//! allocation gets a fresh generation, so equality is allocation identity.
//!
//! A handle keeps its snapshot alive, so reads through a handle obtained
//! before the target was replaced still see the snapshot it wraps. The
//! component only memoizes its handle weakly ([`WeakReference`]), which keeps
//! snapshot and handle from owning each other.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::component::Component;
use crate::value::FieldValue;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub struct Reference {
    inner: Arc<Handle>,
}

struct Handle {
    target_id: String,
    generation: u64,
    target: Arc<Component>,
}

/// Non-owning memo slot for a component's current handle.
pub(crate) struct WeakReference(Weak<Handle>);

impl WeakReference {
    pub(crate) fn upgrade(&self) -> Option<Reference> {
        self.0.upgrade().map(|inner| Reference { inner })
    }
}

impl Reference {
    pub(crate) fn new(target: &Arc<Component>) -> Self {
        Self {
            inner: Arc::new(Handle {
                target_id: target.identifier().to_string(),
                generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
                target: target.clone(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakReference {
        WeakReference(Arc::downgrade(&self.inner))
    }

    pub fn target_id(&self) -> &str {
        &self.inner.target_id
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// The wrapped snapshot. It may no longer be canonical; see
    /// [`RegistryState::resolve`](crate::registry::RegistryState::resolve).
    pub fn target(&self) -> &Arc<Component> {
        &self.inner.target
    }

    /// True when this handle wraps exactly `component`.
    pub fn points_to(&self, component: &Arc<Component>) -> bool {
        Arc::ptr_eq(&self.inner.target, component)
    }

    /// Forwarded field read.
    pub fn get(&self, field: &str) -> Option<FieldValue> {
        self.inner.target.get(field)
    }

    /// Forwarded field read, data only.
    pub fn value(&self, field: &str) -> Option<Value> {
        self.get(field)?.as_data().cloned()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.target.is_mounted()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.inner.target.updated_at()
    }

    /// Same allocation. Equivalent to `==`.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.inner.generation == other.inner.generation
            && self.inner.target_id == other.inner.target_id
    }
}

impl Eq for Reference {}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({}#{})", self.inner.target_id, self.inner.generation)
    }
}
