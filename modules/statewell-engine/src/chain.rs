//! Event-chain dispatch for lifecycle hooks.
//!
//! Runs a hook as defined on each level of a template chain, oldest ancestor
//! first, so a base behavior is never obscured by a derived override and no
//! level has to call up to its parent explicitly.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use statewell_common::{RegistryError, RegistryResult};
use statewell_events::UpdateReason;

use crate::component::Component;
use crate::store::StoreMethods;
use crate::template::Template;

pub type HookFn = Arc<dyn Fn(&HookCall<'_>) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    DidMount,
    WillUpdate,
    DidUpdate,
    WillRehydrate,
    DidRehydrate,
    WillReset,
    DidReset,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::DidMount => "componentDidMount",
            Hook::WillUpdate => "componentWillUpdate",
            Hook::DidUpdate => "componentDidUpdate",
            Hook::WillRehydrate => "componentWillRehydrate",
            Hook::DidRehydrate => "componentDidRehydrate",
            Hook::WillReset => "componentWillReset",
            Hook::DidReset => "componentDidReset",
        };
        f.write_str(name)
    }
}

/// Arguments for one hook invocation.
///
/// `component` is the receiver. `other` is the next snapshot for will-hooks
/// and the previous one for did-hooks.
pub struct HookCall<'a> {
    pub component: &'a Arc<Component>,
    pub other: Option<&'a Arc<Component>>,
    pub reason: UpdateReason,
    pub store: &'a StoreMethods,
}

/// Invoke `hook` for every level from the root of `level`'s chain down to
/// `level` itself. A level contributes a call only when it defines the hook
/// and its implementation differs from what it would inherit. Returns the
/// number of implementations run; a hook defined nowhere is a no-op.
pub fn call_event_chain(level: &Template, hook: Hook, call: &HookCall<'_>) -> Result<usize> {
    let mut invoked = match level.parent() {
        Some(parent) => call_event_chain(parent, hook, call)?,
        None => 0,
    };

    if let Some(own) = level.own_hook(hook) {
        let inherited = level.parent().and_then(|parent| parent.resolved_hook(hook));
        let unchanged = inherited.is_some_and(|inherited| same_hook(inherited, own));
        if !unchanged {
            own(call)?;
            invoked += 1;
        }
    }

    Ok(invoked)
}

/// Run the full chain for the receiver's own template.
pub(crate) fn dispatch_hook(
    hook: Hook,
    component: &Arc<Component>,
    other: Option<&Arc<Component>>,
    reason: UpdateReason,
    store: &StoreMethods,
) -> RegistryResult<usize> {
    let call = HookCall {
        component,
        other,
        reason,
        store,
    };
    call_event_chain(component.template(), hook, &call).map_err(|source| {
        tracing::error!(id = %component.identifier(), %hook, error = %source, "Lifecycle hook failed");
        RegistryError::Hook {
            id: component.identifier().to_string(),
            hook: hook.to_string(),
            source: source.into(),
        }
    })
}

fn same_hook(a: &HookFn, b: &HookFn) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::component::Component;
    use crate::registry::EntityMap;
    use crate::template::ClassOptions;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn recorder(log: &Log, label: &'static str) -> impl Fn(&HookCall<'_>) -> Result<()> {
        let log = log.clone();
        move |_| {
            log.lock().unwrap().push(label);
            Ok(())
        }
    }

    fn run(template: &Arc<Template>, hook: Hook) -> Result<usize> {
        let entities = EntityMap::new();
        let component = Component::initial(template, &ClassOptions::new(), &entities);
        let store = StoreMethods::detached();
        let call = HookCall {
            component: &component,
            other: None,
            reason: UpdateReason::Updated,
            store: &store,
        };
        call_event_chain(template, hook, &call)
    }

    #[test]
    fn test_three_levels_run_oldest_first() {
        let log = Log::default();
        let one = Template::builder("One")
            .hook(Hook::WillUpdate, recorder(&log, "one"))
            .build();
        let two = Template::builder("Two")
            .extends(&one)
            .hook(Hook::WillUpdate, recorder(&log, "two"))
            .build();
        let three = Template::builder("Three")
            .extends(&two)
            .hook(Hook::WillUpdate, recorder(&log, "three"))
            .build();

        assert_eq!(run(&three, Hook::WillUpdate).unwrap(), 3);
        assert_eq!(*log.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_level_without_override_contributes_nothing() {
        let log = Log::default();
        let one = Template::builder("One")
            .hook(Hook::WillUpdate, recorder(&log, "one"))
            .build();
        let two = Template::builder("Two").extends(&one).build();
        let three = Template::builder("Three")
            .extends(&two)
            .hook(Hook::WillUpdate, recorder(&log, "three"))
            .build();

        assert_eq!(run(&three, Hook::WillUpdate).unwrap(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["one", "three"]);
    }

    #[test]
    fn test_reinstalled_parent_hook_runs_once() {
        let log = Log::default();
        let one = Template::builder("One")
            .hook(Hook::DidUpdate, recorder(&log, "one"))
            .build();
        let inherited = one.own_hook(Hook::DidUpdate).unwrap().clone();
        let two = Template::builder("Two")
            .extends(&one)
            .hook_fn(Hook::DidUpdate, inherited)
            .build();

        assert_eq!(run(&two, Hook::DidUpdate).unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["one"]);
    }

    #[test]
    fn test_unknown_hook_is_noop() {
        let template = Template::builder("Plain").build();
        assert_eq!(run(&template, Hook::DidReset).unwrap(), 0);
    }

    #[test]
    fn test_hook_error_stops_chain() {
        let log = Log::default();
        let one = Template::builder("One")
            .hook(Hook::WillReset, |_| Err(anyhow::anyhow!("nope")))
            .build();
        let two = Template::builder("Two")
            .extends(&one)
            .hook(Hook::WillReset, recorder(&log, "two"))
            .build();

        assert!(run(&two, Hook::WillReset).is_err());
        assert!(log.lock().unwrap().is_empty());
    }
}
