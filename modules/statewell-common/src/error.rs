//! Typed errors for registry updates and store interaction.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that abort a registry update or a store call.
///
/// Every variant surfaces synchronously out of the dispatch that caused it.
/// Nothing here is retried: recomputation is deterministic, so a retry would
/// reproduce the failure.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A field recomputation function mutated its reduction context.
    #[error(
        "illegal side effect in reducer for {field} in {template}; do not modify the reduction context in a reducer"
    )]
    PurityViolation { template: String, field: String },

    /// Template composition over a base outside the data component family.
    #[error("base template for combined fields must be a DataComponent, got {base}")]
    InvalidBaseTemplate { base: String },

    /// A field recomputation function failed.
    #[error("reducer for {field} in {id} failed: {source}")]
    Recomputation {
        id: String,
        field: String,
        #[source]
        source: BoxError,
    },

    /// A lifecycle hook failed.
    #[error("{hook} hook for {id} failed: {source}")]
    Hook {
        id: String,
        hook: String,
        #[source]
        source: BoxError,
    },

    /// The host store rejected an event.
    #[error("host dispatch failed: {0}")]
    Host(#[source] BoxError),

    /// The store behind a method bag has been dropped.
    #[error("component store is no longer attached")]
    Detached,
}

/// Result type alias for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purity_violation_names_field_and_template() {
        let err = RegistryError::PurityViolation {
            template: "Counter".into(),
            field: "data".into(),
        };
        let message = err.to_string();
        assert!(message.contains("data"));
        assert!(message.contains("Counter"));
    }

    #[test]
    fn test_recomputation_keeps_source() {
        let source: BoxError = "boom".into();
        let err = RegistryError::Recomputation {
            id: "Counter".into(),
            field: "data".into(),
            source,
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("boom"));
    }
}
