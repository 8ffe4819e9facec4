//! Reserved configuration keys and scope-level options
//!
//! Keys beginning with `$` are metadata that configure the scope hosting a
//! plugin rather than the plugin itself. Inside a group, keys beginning with
//! `~` (disabled entries) or `$` are never treated as plugin entries.

use serde_json::{Map, Value};

/// Condition key controlling whether an entry is active
pub const CONDITION_KEY: &str = "$if";

/// Scope label override
pub const LABEL_KEY: &str = "$label";

/// Names isolated for a scope
pub const ISOLATE_KEY: &str = "$isolate";

/// Plugin name of the group container
pub const GROUP_NAME: &str = "group";

/// Whether `key` is scope-level metadata
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    key.starts_with('$')
}

/// Whether `key` inside a group is skipped as a plugin entry
#[must_use]
pub fn is_metadata(key: &str) -> bool {
    key.starts_with('~') || key.starts_with('$')
}

/// Keep only the reserved (`reserved = true`) or only the plain keys
///
/// A null config picks to an empty mapping. Non-mapping configs have no
/// reserved keys, so they pass through unchanged when plain keys are asked
/// for and pick to an empty mapping otherwise.
#[must_use]
pub fn pick(config: &Value, reserved: bool) -> Value {
    match config {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| is_reserved(key) == reserved)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        Value::Null => Value::Object(Map::new()),
        _ if reserved => Value::Object(Map::new()),
        other => other.clone(),
    }
}

/// Split a configuration key into `(name, alias)` at the first `:`
#[must_use]
pub fn parse_key(key: &str) -> (&str, &str) {
    key.split_once(':').unwrap_or((key, ""))
}

/// Scope-level options carried by reserved keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeOptions {
    /// Log label for the scope (`$label`)
    pub label: Option<String>,
    /// Names isolated from the parent scope (`$isolate`)
    pub isolate: Vec<String>,
}

impl ScopeOptions {
    /// Read options from the reserved keys of `config`
    #[must_use]
    pub fn from_config(config: &Value) -> Self {
        let label = config
            .get(LABEL_KEY)
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let isolate = config
            .get(ISOLATE_KEY)
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self { label, isolate }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn pick_splits_reserved_keys() {
        let config = json!({ "$if": "true", "$label": "x", "port": 1 });
        assert_eq!(pick(&config, false), json!({ "port": 1 }));
        assert_eq!(pick(&config, true), json!({ "$if": "true", "$label": "x" }));
    }

    #[test]
    fn pick_handles_non_mappings() {
        assert_eq!(pick(&Value::Null, false), json!({}));
        assert_eq!(pick(&json!("token"), false), json!("token"));
        assert_eq!(pick(&json!([1, 2]), true), json!({}));
    }

    #[test]
    fn parse_key_splits_at_first_colon() {
        assert_eq!(parse_key("echo"), ("echo", ""));
        assert_eq!(parse_key("group:entry"), ("group", "entry"));
        assert_eq!(parse_key("adapter:a:b"), ("adapter", "a:b"));
    }

    #[test]
    fn metadata_keys() {
        assert!(is_metadata("~disabled"));
        assert!(is_metadata("$if"));
        assert!(!is_metadata("echo"));
        assert!(!is_reserved("~disabled"));
    }

    #[test]
    fn scope_options_from_reserved_keys() {
        let options = ScopeOptions::from_config(&json!({
            "$label": "primary",
            "$isolate": ["database", 3],
            "port": 1,
        }));
        assert_eq!(options.label.as_deref(), Some("primary"));
        assert_eq!(options.isolate, vec!["database".to_string()]);
        assert_eq!(ScopeOptions::from_config(&Value::Null), ScopeOptions::default());
    }
}
