use std::env;

use typed_builder::TypedBuilder;

pub const DEFAULT_PERSISTENCE_PREFIX: &str = "persist/";

/// Store adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct StoreConfig {
    /// Host persistence-protocol events carry this type prefix and bypass the
    /// registry.
    #[builder(default = DEFAULT_PERSISTENCE_PREFIX.to_string(), setter(into))]
    pub persistence_prefix: String,

    /// Ids whose mount is postponed until rehydration completes.
    #[builder(default)]
    pub deferred_mounts: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl StoreConfig {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let config = Self {
            persistence_prefix: env::var("STATEWELL_PERSISTENCE_PREFIX")
                .unwrap_or_else(|_| DEFAULT_PERSISTENCE_PREFIX.to_string()),
            deferred_mounts: parse_list(&env::var("STATEWELL_DEFERRED_MOUNTS").unwrap_or_default()),
        };

        config.log_summary();
        config
    }

    pub fn log_summary(&self) {
        tracing::info!("Store config loaded:");
        tracing::info!("  STATEWELL_PERSISTENCE_PREFIX: {}", self.persistence_prefix);
        tracing::info!(
            "  STATEWELL_DEFERRED_MOUNTS: {}",
            if self.deferred_mounts.is_empty() {
                "<none>".to_string()
            } else {
                self.deferred_mounts.join(",")
            }
        );
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.persistence_prefix, "persist/");
        assert!(config.deferred_mounts.is_empty());
    }

    #[test]
    fn test_builder_overrides() {
        let config = StoreConfig::builder()
            .persistence_prefix("storage/")
            .deferred_mounts(vec!["Board".to_string()])
            .build();
        assert_eq!(config.persistence_prefix, "storage/");
        assert_eq!(config.deferred_mounts, vec!["Board"]);
    }

    #[test]
    fn test_parse_list_skips_blanks() {
        assert_eq!(parse_list(" Board, ,Clock "), vec!["Board", "Clock"]);
        assert!(parse_list("").is_empty());
    }
}
