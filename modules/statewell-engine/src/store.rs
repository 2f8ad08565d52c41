//! Store adapter: runs the registry as a secondary store beside a host store.
//!
//! Every event dispatched through [`ComponentStore::dispatch`] is reduced by
//! the registry (unless it belongs to the exclusion set) and then always
//! forwarded to the host. Will-hooks run inline while the registry update is
//! observed; did-hooks are queued and drained once the outermost dispatch has
//! reached the host, so both stores have settled before consumers are told.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use parking_lot::ReentrantMutex;

use statewell_common::{RegistryError, RegistryResult, StoreConfig};
use statewell_events::{event_types, Event, UpdateReason};
use tracing::{debug, error, info, warn};

use crate::chain::{dispatch_hook, Hook};
use crate::component::Component;
use crate::reference::Reference;
use crate::reflector::{Reflection, ReflectionFilter};
use crate::registry::{EntityMap, RegistryAction, RegistryState};
use crate::template::{ClassOptions, Template};

// ---------------------------------------------------------------------------
// Host seam
// ---------------------------------------------------------------------------

/// What the registry sends to its host.
pub enum HostEvent<'a> {
    /// An event passing through the wrapped dispatch.
    Action(&'a Event),
    /// One-time bootstrap handshake carrying the store's method bag.
    Probe(&'a StoreMethods),
    /// Rehydration handshake; the persistence layer answers through the
    /// [`Rehydrator`].
    RehydrateComplete(&'a Rehydrator),
}

impl HostEvent<'_> {
    pub fn event_type(&self) -> &str {
        match self {
            HostEvent::Action(event) => &event.event_type,
            HostEvent::Probe(_) => event_types::PROBE,
            HostEvent::RehydrateComplete(_) => event_types::REHYDRATE_COMPLETE,
        }
    }
}

/// The hosting store's original dispatch.
///
/// Implemented by [`MemoryHost`](crate::memory::MemoryHost) for tests and by
/// whatever store the registry is attached to in production.
pub trait Host: Send + Sync {
    fn dispatch(&self, event: HostEvent<'_>) -> anyhow::Result<()>;
}

impl<H: Host + ?Sized> Host for Arc<H> {
    fn dispatch(&self, event: HostEvent<'_>) -> anyhow::Result<()> {
        (**self).dispatch(event)
    }
}

// ---------------------------------------------------------------------------
// ComponentStore
// ---------------------------------------------------------------------------

pub struct ComponentStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    host: Arc<dyn Host>,
    config: StoreConfig,
    state: Mutex<RegistryState>,
    pending: Mutex<VecDeque<PendingHook>>,
    /// Serializes dispatches across threads. Re-entrant so hooks can dispatch
    /// nested events; holds the nesting depth of the owning thread.
    gate: ReentrantMutex<Cell<usize>>,
}

struct PendingHook {
    hook: Hook,
    component: Arc<Component>,
    other: Option<Arc<Component>>,
    reason: UpdateReason,
}

impl ComponentStore {
    /// Attach a fresh registry to `host`: defer configured mounts, send the
    /// probe (templates register during it), then mount every registered
    /// component that is not deferred.
    ///
    /// Hook failures while mounting are fatal: the failing mount is rolled
    /// back and the error is returned instead of a store.
    pub fn attach(host: Arc<dyn Host>, config: StoreConfig) -> RegistryResult<Self> {
        let inner = Arc::new(StoreInner {
            host,
            config,
            state: Mutex::new(RegistryState::new()),
            pending: Mutex::new(VecDeque::new()),
            gate: ReentrantMutex::new(Cell::new(0)),
        });

        if !inner.config.deferred_mounts.is_empty() {
            let ids = inner.config.deferred_mounts.clone();
            inner.settle(|| inner.apply(RegistryAction::DeferMount { ids }))?;
        }

        let methods = inner.methods();
        inner.settle(|| inner.host_dispatch(HostEvent::Probe(&methods)))?;

        let state = inner.snapshot();
        info!(
            registered = state.entities().len(),
            deferred = state.deferred().len(),
            "Component store attached"
        );

        for (id, component) in state.entities() {
            if state.is_deferred(id) {
                debug!(id = %id, "Mount deferred");
                continue;
            }
            inner.settle(|| inner.mount(component))?;
        }

        Ok(Self { inner })
    }

    /// The wrapped dispatch.
    pub fn dispatch(&self, event: Event) -> RegistryResult<()> {
        self.inner.dispatch(event)
    }

    pub fn methods(&self) -> StoreMethods {
        self.inner.methods()
    }

    /// Current registry state. Cheap: snapshots are shared.
    pub fn state(&self) -> RegistryState {
        self.inner.snapshot()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Component>> {
        self.inner.get(id)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }
}

impl StoreInner {
    fn methods(self: &Arc<Self>) -> StoreMethods {
        StoreMethods {
            inner: Arc::downgrade(self),
        }
    }

    fn snapshot(&self) -> RegistryState {
        lock(&self.state).clone()
    }

    fn get(&self, id: &str) -> Option<Arc<Component>> {
        lock(&self.state).get(id).cloned()
    }

    fn bypasses_registry(&self, event: &Event) -> bool {
        event.is(event_types::UPDATE)
            || event.is(event_types::REFRESH_PROXIES)
            || event.is_persistence(&self.config.persistence_prefix)
    }

    fn dispatch(self: &Arc<Self>, event: Event) -> RegistryResult<()> {
        self.settle(|| {
            if self.bypasses_registry(&event) {
                debug!(event_type = %event.event_type, "Event bypasses registry");
            } else {
                self.apply(RegistryAction::Event(event.clone()))?;
            }
            self.host_dispatch(HostEvent::Action(&event))
        })
    }

    fn host_dispatch(&self, event: HostEvent<'_>) -> RegistryResult<()> {
        let event_type = event.event_type().to_string();
        self.host.dispatch(event).map_err(|source| {
            error!(event_type = %event_type, error = %source, "Host dispatch failed");
            RegistryError::Host(source.into())
        })
    }

    /// Reduce `action`, install the result, and run will-hooks for every
    /// replaced snapshot. Did-hooks are queued only once every will-hook has
    /// passed; a failing will-hook restores the previous registry state.
    ///
    /// Callers hold the dispatch gate (see [`StoreInner::settle`]).
    fn apply(self: &Arc<Self>, action: RegistryAction) -> RegistryResult<()> {
        let before = self.snapshot();
        let next = before.reduce(&action)?;
        *lock(&self.state) = next.clone();

        let reason = action.event().map_or(UpdateReason::Updated, |event| {
            UpdateReason::for_event(event, &self.config.persistence_prefix)
        });
        match self.observe(before.entities(), next.entities(), reason) {
            Ok(did_hooks) => {
                lock(&self.pending).extend(did_hooks);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Will-hook failed, restoring previous registry state");
                *lock(&self.state) = before;
                Err(err)
            }
        }
    }

    /// Run will-hooks for every replaced snapshot and collect the did-hooks
    /// to run once the dispatch settles.
    fn observe(
        self: &Arc<Self>,
        before: &EntityMap,
        after: &EntityMap,
        reason: UpdateReason,
    ) -> RegistryResult<Vec<PendingHook>> {
        let methods = self.methods();
        let mut did_hooks = Vec::new();
        for (id, updated) in after {
            let Some(original) = before.get(id) else {
                continue;
            };
            if Arc::ptr_eq(original, updated) {
                continue;
            }

            dispatch_hook(Hook::WillUpdate, original, Some(updated), reason, &methods)?;
            match reason {
                UpdateReason::Rehydrate => {
                    dispatch_hook(Hook::WillRehydrate, original, None, reason, &methods)?;
                }
                UpdateReason::Reset => {
                    dispatch_hook(Hook::WillReset, original, None, reason, &methods)?;
                }
                UpdateReason::Updated => {}
            }

            did_hooks.push(PendingHook {
                hook: Hook::DidUpdate,
                component: updated.clone(),
                other: Some(original.clone()),
                reason,
            });
            let follow_up = match reason {
                UpdateReason::Rehydrate => Some(Hook::DidRehydrate),
                UpdateReason::Reset => Some(Hook::DidReset),
                UpdateReason::Updated => None,
            };
            if let Some(hook) = follow_up {
                did_hooks.push(PendingHook {
                    hook,
                    component: updated.clone(),
                    other: None,
                    reason,
                });
            }
        }
        Ok(did_hooks)
    }

    fn mount(self: &Arc<Self>, component: &Arc<Component>) -> RegistryResult<()> {
        dispatch_hook(Hook::DidMount, component, None, UpdateReason::Updated, &self.methods())?;
        Ok(())
    }

    /// Run `f` holding the dispatch gate; the outermost caller on the owning
    /// thread then drains queued did-hooks before releasing it.
    fn settle<T>(self: &Arc<Self>, f: impl FnOnce() -> RegistryResult<T>) -> RegistryResult<T> {
        let depth = self.gate.lock();
        let outermost = depth.get() == 0;
        depth.set(depth.get() + 1);

        let result = f();
        let drained = if outermost { self.drain() } else { Ok(()) };
        depth.set(depth.get() - 1);

        let value = result?;
        drained?;
        Ok(value)
    }

    /// Run queued did-hooks in order. Hooks that dispatch enqueue more work
    /// onto the same queue. Every hook runs; the first failure is returned.
    fn drain(self: &Arc<Self>) -> RegistryResult<()> {
        let methods = self.methods();
        let mut first_error = None;

        loop {
            let next = lock(&self.pending).pop_front();
            let Some(pending) = next else {
                break;
            };
            if let Err(err) = dispatch_hook(
                pending.hook,
                &pending.component,
                pending.other.as_ref(),
                pending.reason,
                &methods,
            ) {
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

// ---------------------------------------------------------------------------
// StoreMethods
// ---------------------------------------------------------------------------

/// The method bag handed to templates through the probe.
///
/// Holds the store weakly; calls on a bag whose store is gone fail with
/// [`RegistryError::Detached`] (lookups return `None`).
#[derive(Clone)]
pub struct StoreMethods {
    inner: Weak<StoreInner>,
}

impl StoreMethods {
    /// A bag bound to no store.
    pub fn detached() -> Self {
        Self { inner: Weak::new() }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.strong_count() > 0
    }

    fn upgrade(&self) -> RegistryResult<Arc<StoreInner>> {
        self.inner.upgrade().ok_or(RegistryError::Detached)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Component>> {
        self.inner.upgrade()?.get(id)
    }

    /// Install `component` as canonical for `id`, bypassing its reducer.
    pub fn put(&self, id: &str, component: Arc<Component>) -> RegistryResult<()> {
        let inner = self.upgrade()?;
        inner.settle(|| {
            inner.apply(RegistryAction::Update {
                id: id.to_string(),
                component,
            })
        })
    }

    /// Reference to the canonical snapshot for `id`; `None` for an id that was
    /// never registered.
    pub fn reference(&self, id: &str, force_regenerate: bool) -> Option<Reference> {
        match self.get(id) {
            Some(component) => Some(component.reference(force_regenerate)),
            None => {
                debug!(id = %id, "Reference requested for unregistered component");
                None
            }
        }
    }

    /// Register `template` under `id`. Registering an existing id is a no-op.
    pub fn register(&self, id: &str, template: Arc<Template>, options: ClassOptions) -> RegistryResult<()> {
        let inner = self.upgrade()?;
        if lock(&inner.state).is_registered(id) {
            return Ok(());
        }
        inner.settle(|| {
            inner.apply(RegistryAction::Register {
                id: id.to_string(),
                template,
                options,
            })
        })
    }

    pub fn reflection(&self, filter: &ReflectionFilter) -> Reflection {
        let Some(inner) = self.inner.upgrade() else {
            return Reflection::new();
        };
        let state = lock(&inner.state);
        let reflection = filter.reflect(state.entities());
        reflection
    }

    pub fn defer<I, S>(&self, ids: I) -> RegistryResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inner = self.upgrade()?;
        let ids = ids.into_iter().map(Into::into).collect();
        inner.settle(|| inner.apply(RegistryAction::DeferMount { ids }))
    }

    /// Dispatch through the wrapped store dispatch.
    pub fn dispatch(&self, event: Event) -> RegistryResult<()> {
        self.upgrade()?.dispatch(event)
    }

    pub fn reset(&self, id: &str) -> RegistryResult<()> {
        self.dispatch(Event::reset(id))
    }

    /// Hand control to the host's persistence layer (which restores per-id
    /// state through the [`Rehydrator`]), mount the deferred components, then
    /// tell downstream consumers to refresh their references.
    pub async fn rehydrate(&self) -> RegistryResult<()> {
        tokio::task::yield_now().await;

        let inner = self.upgrade()?;
        let rehydrator = Rehydrator {
            methods: self.clone(),
        };
        inner.settle(|| inner.host_dispatch(HostEvent::RehydrateComplete(&rehydrator)))?;

        let deferred: Vec<Arc<Component>> = {
            let state = lock(&inner.state);
            let components = state
                .deferred()
                .iter()
                .filter_map(|id| state.get(id).cloned())
                .collect();
            components
        };
        inner.settle(|| {
            inner.apply(RegistryAction::ReleaseDeferred)?;
            deferred.iter().try_for_each(|component| inner.mount(component))
        })?;
        info!(mounted = deferred.len(), "Rehydration complete");

        inner.dispatch(Event::refresh_proxies())
    }
}

impl fmt::Debug for StoreMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreMethods")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Callback carried by the rehydrate-complete handshake.
pub struct Rehydrator {
    methods: StoreMethods,
}

impl Rehydrator {
    /// Restore per-id state (`id → {field: value, updatedAt?}`) into the
    /// registry. Fields missing from `state` keep their current values.
    pub fn restore(&self, state: Reflection) -> RegistryResult<()> {
        let inner = self.methods.upgrade()?;
        info!(components = state.len(), "Restoring persisted component state");
        inner.settle(|| inner.apply(RegistryAction::Event(Event::rehydrate(state))))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_methods() {
        let methods = StoreMethods::detached();
        assert!(!methods.is_attached());
        assert!(methods.get("A").is_none());
        assert!(methods.reference("A", false).is_none());
        assert!(methods.reflection(&ReflectionFilter::default()).is_empty());
        assert!(matches!(
            methods.dispatch(Event::new("TICK")),
            Err(RegistryError::Detached)
        ));
        assert!(matches!(methods.defer(["A"]), Err(RegistryError::Detached)));
    }

    #[test]
    fn test_host_event_types() {
        let event = Event::new("TICK");
        assert_eq!(HostEvent::Action(&event).event_type(), "TICK");
        let methods = StoreMethods::detached();
        assert_eq!(HostEvent::Probe(&methods).event_type(), event_types::PROBE);
    }
}
