//! Component templates: ordered field reducers plus per-level lifecycle hooks.
//!
//! A template is assembled once, base to derived, with [`TemplateBuilder`].
//! Fields are resolved at build time (inherited first, in declaration order; a
//! derived field with the same name replaces the inherited one in place).
//! Hooks stay per level so the event chain can run each level's own
//! implementation in order.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use statewell_common::{RegistryError, RegistryResult};
use statewell_events::Event;

use crate::chain::{Hook, HookCall, HookFn};
use crate::context::ReductionContext;
use crate::value::FieldValue;

/// Construction options shared by every snapshot of one mounted component.
pub type ClassOptions = Map<String, Value>;

pub const BASE_COMPONENT: &str = "BaseComponent";
pub const DATA_COMPONENT: &str = "DataComponent";

type DefaultFn = Arc<dyn Fn(&ReductionContext<'_>) -> FieldValue + Send + Sync>;
type ReduceFn =
    Arc<dyn Fn(FieldValue, &Event, &mut ReductionContext<'_>) -> Result<FieldValue> + Send + Sync>;

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// One field: a default-state supplier and a pure reducer
/// `(previous, event, context) -> next`.
#[derive(Clone)]
pub struct Field {
    default: DefaultFn,
    reduce: ReduceFn,
}

impl Field {
    pub fn new<D, R>(default: D, reduce: R) -> Self
    where
        D: Fn(&ReductionContext<'_>) -> FieldValue + Send + Sync + 'static,
        R: Fn(FieldValue, &Event, &mut ReductionContext<'_>) -> Result<FieldValue>
            + Send
            + Sync
            + 'static,
    {
        Self {
            default: Arc::new(default),
            reduce: Arc::new(reduce),
        }
    }

    /// Field with a constant JSON default.
    pub fn with_default<R>(default: Value, reduce: R) -> Self
    where
        R: Fn(FieldValue, &Event, &mut ReductionContext<'_>) -> Result<FieldValue>
            + Send
            + Sync
            + 'static,
    {
        Self::new(move |_| FieldValue::Data(default.clone()), reduce)
    }

    pub fn default_value(&self, ctx: &ReductionContext<'_>) -> FieldValue {
        (self.default)(ctx)
    }

    pub fn reduce(
        &self,
        previous: FieldValue,
        event: &Event,
        ctx: &mut ReductionContext<'_>,
    ) -> Result<FieldValue> {
        (self.reduce)(previous, event, ctx)
    }

    /// Compose over this field: `wrap` receives the original reducer by value
    /// and decides when to delegate to it. The default supplier is kept.
    pub fn wrap<W>(&self, wrap: W) -> Self
    where
        W: Fn(&Field, FieldValue, &Event, &mut ReductionContext<'_>) -> Result<FieldValue>
            + Send
            + Sync
            + 'static,
    {
        let inner = self.clone();
        Self {
            default: self.default.clone(),
            reduce: Arc::new(move |previous, event, ctx| wrap(&inner, previous, event, ctx)),
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Field")
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

pub struct Template {
    name: String,
    default_id: String,
    parent: Option<Arc<Template>>,
    fields: IndexMap<String, Field>,
    hooks: HashMap<Hook, HookFn>,
}

impl Template {
    pub fn builder(name: impl Into<String>) -> TemplateBuilder {
        TemplateBuilder {
            name: name.into(),
            default_id: None,
            parent: None,
            fields: IndexMap::new(),
            hooks: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier used when construction options carry no explicit `id`.
    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn parent(&self) -> Option<&Arc<Template>> {
        self.parent.as_ref()
    }

    /// Every field, inherited ones included, in resolution order.
    pub fn fields(&self) -> &IndexMap<String, Field> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Hook defined at exactly this level.
    pub fn own_hook(&self, hook: Hook) -> Option<&HookFn> {
        self.hooks.get(&hook)
    }

    /// Hook as seen from this level: own, else the nearest ancestor's.
    pub fn resolved_hook(&self, hook: Hook) -> Option<&HookFn> {
        self.own_hook(hook)
            .or_else(|| self.parent.as_ref()?.resolved_hook(hook))
    }

    pub fn descends_from(&self, name: &str) -> bool {
        self.name == name
            || self
                .parent
                .as_ref()
                .is_some_and(|parent| parent.descends_from(name))
    }

    /// Explicit `id` option when it is a string, else the default identifier.
    pub fn identifier_for(&self, options: &ClassOptions) -> String {
        options
            .get("id")
            .and_then(Value::as_str)
            .map_or_else(|| self.default_id.clone(), str::to_string)
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("default_id", &self.default_id)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct TemplateBuilder {
    name: String,
    default_id: Option<String>,
    parent: Option<Arc<Template>>,
    fields: IndexMap<String, Field>,
    hooks: HashMap<Hook, HookFn>,
}

impl TemplateBuilder {
    pub fn extends(mut self, parent: &Arc<Template>) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn default_id(mut self, id: impl Into<String>) -> Self {
        self.default_id = Some(id.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn hook<F>(self, hook: Hook, f: F) -> Self
    where
        F: Fn(&HookCall<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.hook_fn(hook, Arc::new(f))
    }

    /// Install an existing hook implementation. Passing the parent's own
    /// `HookFn` back marks the hook as not overridden at this level.
    pub fn hook_fn(mut self, hook: Hook, f: HookFn) -> Self {
        self.hooks.insert(hook, f);
        self
    }

    pub fn build(self) -> Arc<Template> {
        let mut fields = self
            .parent
            .as_ref()
            .map(|parent| parent.fields.clone())
            .unwrap_or_default();
        fields.extend(self.fields);

        Arc::new(Template {
            default_id: self.default_id.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            parent: self.parent,
            fields,
            hooks: self.hooks,
        })
    }
}

// ---------------------------------------------------------------------------
// Built-in templates
// ---------------------------------------------------------------------------

static BASE: LazyLock<Arc<Template>> = LazyLock::new(|| {
    Template::builder(BASE_COMPONENT)
        .hook(Hook::DidMount, |call| {
            call.store
                .dispatch(Event::mount(call.component.identifier()))?;
            Ok(())
        })
        .build()
});

static DATA: LazyLock<Arc<Template>> = LazyLock::new(|| {
    Template::builder(DATA_COMPONENT)
        .extends(&BASE)
        .field("data", Field::with_default(Value::Null, |previous, _, _| Ok(previous)))
        .build()
});

/// Root of the template family. Its did-mount hook dispatches the mount event
/// for the receiving component.
pub fn base_component() -> Arc<Template> {
    BASE.clone()
}

/// Base plus a pass-through `data` field defaulting to `null`.
pub fn data_component() -> Arc<Template> {
    DATA.clone()
}

/// Derive `name` from `base` (default: [`data_component`]) adding `fields`.
pub fn combine_fields<I, S>(
    name: impl Into<String>,
    fields: I,
    base: Option<&Arc<Template>>,
) -> RegistryResult<Arc<Template>>
where
    I: IntoIterator<Item = (S, Field)>,
    S: Into<String>,
{
    let base = base.cloned().unwrap_or_else(data_component);
    if !base.descends_from(DATA_COMPONENT) {
        return Err(RegistryError::InvalidBaseTemplate {
            base: base.name().to_string(),
        });
    }

    let builder = fields
        .into_iter()
        .fold(Template::builder(name).extends(&base), |builder, (field_name, field)| {
            builder.field(field_name, field)
        });
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn passthrough() -> Field {
        Field::with_default(json!(0), |previous, _, _| Ok(previous))
    }

    #[test]
    fn test_fields_resolve_base_first() {
        let base = Template::builder("Base")
            .field("a", passthrough())
            .field("b", passthrough())
            .build();
        let derived = Template::builder("Derived")
            .extends(&base)
            .field("c", passthrough())
            .field("a", passthrough())
            .build();

        let names: Vec<_> = derived.fields().keys().cloned().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_identifier_rule() {
        let template = Template::builder("Counter").build();
        assert_eq!(template.identifier_for(&ClassOptions::new()), "Counter");

        let options = json!({"id": "left"}).as_object().cloned().unwrap();
        assert_eq!(template.identifier_for(&options), "left");

        let not_a_string = json!({"id": 7}).as_object().cloned().unwrap();
        assert_eq!(template.identifier_for(&not_a_string), "Counter");

        let renamed = Template::builder("Counter").default_id("counter").build();
        assert_eq!(renamed.identifier_for(&ClassOptions::new()), "counter");
    }

    #[test]
    fn test_data_component_family() {
        let data = data_component();
        assert!(data.descends_from(DATA_COMPONENT));
        assert!(data.descends_from(BASE_COMPONENT));
        assert!(data.field("data").is_some());
        assert!(data.resolved_hook(Hook::DidMount).is_some());
        assert!(data.own_hook(Hook::DidMount).is_none());
    }

    #[test]
    fn test_combine_fields_over_data_component() {
        let combined = combine_fields("Board", [("cells", passthrough())], None).unwrap();
        let names: Vec<_> = combined.fields().keys().cloned().collect();
        assert_eq!(names, vec!["data", "cells"]);
        assert!(combined.descends_from(DATA_COMPONENT));

        let again = combine_fields("Board2", [("more", passthrough())], Some(&combined)).unwrap();
        assert_eq!(again.fields().len(), 3);
    }

    #[test]
    fn test_combine_fields_rejects_foreign_base() {
        let foreign = Template::builder("Loose").build();
        let err = combine_fields("Board", [("cells", passthrough())], Some(&foreign)).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidBaseTemplate { ref base } if base == "Loose"));

        let err = combine_fields("Board", Vec::<(String, Field)>::new(), Some(&base_component()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidBaseTemplate { .. }));
    }

    #[test]
    fn test_wrap_delegates_to_parent_reducer() {
        let base = Template::builder("Base")
            .field(
                "n",
                Field::with_default(json!(0), |previous, _, _| {
                    Ok(json!(previous.as_i64().unwrap_or(0) + 1).into())
                }),
            )
            .build();
        let doubled = base.field("n").unwrap().wrap(|parent, previous, event, ctx| {
            let once = parent.reduce(previous, event, ctx)?;
            parent.reduce(once, event, ctx)
        });

        let entities = crate::registry::EntityMap::new();
        let mut ctx = ReductionContext::new("x".into(), ClassOptions::new(), &entities);
        let start = doubled.default_value(&ctx);
        let next = doubled.reduce(start, &Event::new("TICK"), &mut ctx).unwrap();
        assert_eq!(next.as_i64(), Some(2));
    }
}
