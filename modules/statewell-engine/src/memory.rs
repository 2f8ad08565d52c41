use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use anyhow::Result;
use statewell_common::StoreConfig;
use statewell_events::Event;
use tracing::debug;

use crate::reflector::{Reflection, Reflector};
use crate::store::{Host, HostEvent, StoreMethods};
use crate::template::{ClassOptions, Template};

// ---------------------------------------------------------------------------
// MemoryHost (tests, no host store required)
// ---------------------------------------------------------------------------

/// In-memory host store for tests and demos. Registers its connected
/// templates when probed, records every action it is handed, and mirrors the
/// registry through a [`Reflector`]. Thread-safe.
pub struct MemoryHost {
    connections: Vec<(Arc<Template>, ClassOptions)>,
    methods: OnceLock<StoreMethods>,
    events: Mutex<Vec<Event>>,
    reflector: Reflector,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::with_reflector(Reflector::new(StoreConfig::default().persistence_prefix))
    }

    pub fn with_reflector(reflector: Reflector) -> Self {
        Self {
            connections: Vec::new(),
            methods: OnceLock::new(),
            events: Mutex::new(Vec::new()),
            reflector,
        }
    }

    /// Register `template` with `options` once the store probes this host.
    pub fn connect(mut self, template: &Arc<Template>, options: ClassOptions) -> Self {
        self.connections.push((template.clone(), options));
        self
    }

    /// Method bag received through the probe, once attached.
    pub fn methods(&self) -> Option<StoreMethods> {
        self.methods.get().cloned()
    }

    /// Every action dispatched to this host (for test assertions).
    pub fn events(&self) -> Vec<Event> {
        self.lock_events().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.lock_events()
            .iter()
            .map(|event| event.event_type.clone())
            .collect()
    }

    pub fn reflector(&self) -> &Reflector {
        &self.reflector
    }

    pub fn reflected(&self) -> Reflection {
        self.reflector.state()
    }

    fn lock_events(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for MemoryHost {
    fn dispatch(&self, event: HostEvent<'_>) -> Result<()> {
        match &event {
            HostEvent::Probe(methods) => {
                if self.methods.set((*methods).clone()).is_err() {
                    debug!("MemoryHost already bound to a store");
                }
                for (template, options) in &self.connections {
                    let id = template.identifier_for(options);
                    methods.register(&id, template.clone(), options.clone())?;
                }
            }
            HostEvent::Action(action) => self.lock_events().push((*action).clone()),
            HostEvent::RehydrateComplete(_) => {}
        }
        self.reflector.reduce(&event)?;
        Ok(())
    }
}
