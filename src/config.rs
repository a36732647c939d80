use std::env;
use std::num::NonZeroUsize;

use serde::Deserialize;

/// How a walk reacts to a vertex failing hard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Stop dispatching new vertices after the first failure.
    #[default]
    FailFast,
    /// Keep walking every branch that does not depend on a failure.
    Continue,
}

/// Settings read once per walk and handed to every evaluation context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    pub policy: ErrorPolicy,
    /// Downgrade output interpolation failures to a warning and an unknown
    /// placeholder value.
    pub warn_output_errors: bool,
    /// Number of worker threads. Uses the global rayon pool when unset.
    pub parallelism: Option<NonZeroUsize>,
}

impl WalkConfig {
    pub const ENV_WARN_OUTPUT_ERRORS: &'static str = "DAGWALK_WARN_OUTPUT_ERRORS";
    pub const ENV_CONTINUE_ON_ERROR: &'static str = "DAGWALK_CONTINUE_ON_ERROR";
    pub const ENV_PARALLELISM: &'static str = "DAGWALK_PARALLELISM";

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let policy = if flag(lookup(Self::ENV_CONTINUE_ON_ERROR)) {
            ErrorPolicy::Continue
        } else {
            ErrorPolicy::FailFast
        };

        let parallelism = lookup(Self::ENV_PARALLELISM).and_then(|value| {
            match value.trim().parse::<NonZeroUsize>() {
                Ok(n) => Some(n),
                Err(err) => {
                    tracing::warn!("ignoring {}={value:?}: {err}", Self::ENV_PARALLELISM);
                    None
                }
            }
        });

        Self {
            policy,
            warn_output_errors: flag(lookup(Self::ENV_WARN_OUTPUT_ERRORS)),
            parallelism,
        }
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_warn_output_errors(mut self, warn: bool) -> Self {
        self.warn_output_errors = warn;
        self
    }

    pub fn with_parallelism(mut self, workers: NonZeroUsize) -> Self {
        self.parallelism = Some(workers);
        self
    }

    pub fn fail_fast(&self) -> bool {
        self.policy == ErrorPolicy::FailFast
    }
}

fn flag(value: Option<String>) -> bool {
    value.is_some_and(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "True"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = WalkConfig::from_lookup(lookup(&[]));
        assert_eq!(config, WalkConfig::default());
        assert!(config.fail_fast());
    }

    #[test]
    fn test_from_lookup() {
        let config = WalkConfig::from_lookup(lookup(&[
            ("DAGWALK_WARN_OUTPUT_ERRORS", "1"),
            ("DAGWALK_CONTINUE_ON_ERROR", "true"),
            ("DAGWALK_PARALLELISM", "4"),
        ]));

        assert!(config.warn_output_errors);
        assert_eq!(config.policy, ErrorPolicy::Continue);
        assert_eq!(config.parallelism, NonZeroUsize::new(4));
    }

    #[test]
    fn test_invalid_parallelism_is_ignored() {
        let config = WalkConfig::from_lookup(lookup(&[
            ("DAGWALK_PARALLELISM", "0"),
            ("DAGWALK_WARN_OUTPUT_ERRORS", "no"),
        ]));

        assert_eq!(config.parallelism, None);
        assert!(!config.warn_output_errors);
    }

    #[test]
    fn test_deserialize() {
        let config: WalkConfig =
            serde_json::from_str(r#"{ "policy": "continue", "parallelism": 2 }"#).unwrap();
        assert_eq!(config.policy, ErrorPolicy::Continue);
        assert_eq!(config.parallelism, NonZeroUsize::new(2));
        assert!(!config.warn_output_errors);
    }
}
