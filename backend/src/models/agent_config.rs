//! Agent config document.
//!
//! A structured document with a fixed set of recognized keys plus an opaque
//! extension map. Unknown keys are preserved but never validated; the
//! supervisor only acts on the recognized ones.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Recognized config keys, with everything else flattened into `extra`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Inclusive bounds for the numeric keys. Validation walks this table.
struct NumericBound {
    key: &'static str,
    min: f64,
    max: f64,
}

const NUMERIC_BOUNDS: &[NumericBound] = &[
    NumericBound {
        key: "temperature",
        min: 0.0,
        max: 2.0,
    },
    NumericBound {
        key: "max_tokens",
        min: 1.0,
        max: 32000.0,
    },
    NumericBound {
        key: "timeout_seconds",
        min: 1.0,
        max: 300.0,
    },
    NumericBound {
        key: "port",
        min: 1024.0,
        max: 65535.0,
    },
];

impl AgentConfig {
    fn numeric(&self, key: &str) -> Option<f64> {
        match key {
            "temperature" => self.temperature,
            "max_tokens" => self.max_tokens.map(|v| v as f64),
            "timeout_seconds" => self.timeout_seconds.map(|v| v as f64),
            "port" => self.port.map(|v| v as f64),
            _ => None,
        }
    }

    /// Check the recognized keys against their bounds. Returns every
    /// violation, not just the first.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match &self.model {
            None => errors.push("config.model is required".to_string()),
            Some(m) if m.trim().is_empty() => {
                errors.push("config.model must be a non-empty string".to_string())
            }
            Some(_) => {}
        }

        for bound in NUMERIC_BOUNDS {
            if let Some(v) = self.numeric(bound.key) {
                if !v.is_finite() || v < bound.min || v > bound.max {
                    errors.push(format!(
                        "config.{} must be between {} and {}",
                        bound.key, bound.min, bound.max
                    ));
                }
            }
        }

        errors
    }
}

/// Parse and validate a raw config document.
///
/// Wrong-typed recognized keys are reported the same way as out-of-range
/// values; unknown keys pass through untouched.
pub fn validate_config(raw: &Value) -> Result<AgentConfig, Vec<String>> {
    if !raw.is_object() {
        return Err(vec!["config must be an object".to_string()]);
    }

    let config: AgentConfig = serde_json::from_value(raw.clone())
        .map_err(|e| vec![format!("invalid config: {e}")])?;

    let errors = config.validate();
    if errors.is_empty() {
        Ok(config)
    } else {
        Err(errors)
    }
}

/// Deep-merge `overrides` on top of `base`.
///
/// Objects merge recursively; scalars and arrays from `overrides` replace
/// the base value outright.
pub fn deep_merge(base: &Value, overrides: &Value) -> Value {
    match (base, overrides) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in override_map {
                match merged.get(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        let combined = deep_merge(existing, value);
                        merged.insert(key.clone(), combined);
                    }
                    _ => {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        _ => overrides.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn minimal_config_is_valid() {
        let config = validate_config(&json!({"model": "m-a"})).unwrap();
        assert_eq!(config.model.as_deref(), Some("m-a"));
    }

    #[test]
    fn missing_model_is_rejected() {
        let errors = validate_config(&json!({"temperature": 0.5})).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("model")));
    }

    #[test]
    fn temperature_bounds_are_inclusive() {
        assert!(validate_config(&json!({"model": "m", "temperature": 0.0})).is_ok());
        assert!(validate_config(&json!({"model": "m", "temperature": 2.0})).is_ok());
        assert!(validate_config(&json!({"model": "m", "temperature": -0.1})).is_err());
        assert!(validate_config(&json!({"model": "m", "temperature": 2.1})).is_err());
    }

    #[test]
    fn max_tokens_bounds_are_inclusive() {
        assert!(validate_config(&json!({"model": "m", "max_tokens": 1})).is_ok());
        assert!(validate_config(&json!({"model": "m", "max_tokens": 32000})).is_ok());
        assert!(validate_config(&json!({"model": "m", "max_tokens": 0})).is_err());
        assert!(validate_config(&json!({"model": "m", "max_tokens": 32001})).is_err());
    }

    #[test]
    fn timeout_bounds_are_inclusive() {
        assert!(validate_config(&json!({"model": "m", "timeout_seconds": 1})).is_ok());
        assert!(validate_config(&json!({"model": "m", "timeout_seconds": 300})).is_ok());
        assert!(validate_config(&json!({"model": "m", "timeout_seconds": 0})).is_err());
        assert!(validate_config(&json!({"model": "m", "timeout_seconds": 301})).is_err());
    }

    #[test]
    fn user_specified_port_must_be_unprivileged() {
        assert!(validate_config(&json!({"model": "m", "port": 1024})).is_ok());
        assert!(validate_config(&json!({"model": "m", "port": 65535})).is_ok());
        assert!(validate_config(&json!({"model": "m", "port": 1023})).is_err());
        assert!(validate_config(&json!({"model": "m", "port": 65536})).is_err());
    }

    #[test]
    fn wrong_typed_recognized_key_is_rejected() {
        let errors = validate_config(&json!({"model": "m", "temperature": "hot"})).unwrap_err();
        assert!(errors[0].contains("invalid config"));
    }

    #[test]
    fn unknown_keys_are_preserved() {
        let raw = json!({"model": "m", "custom_flag": true, "nested": {"a": 1}});
        let config = validate_config(&raw).unwrap();
        assert_eq!(config.extra.get("custom_flag"), Some(&json!(true)));

        let round_tripped = serde_json::to_value(&config).unwrap();
        assert_eq!(round_tripped.get("custom_flag"), Some(&json!(true)));
        assert_eq!(round_tripped.get("nested"), Some(&json!({"a": 1})));
    }

    #[test]
    fn merge_lets_user_values_win() {
        let template = json!({"model": "m", "temperature": 0.7, "max_tokens": 1000});
        let user = json!({"temperature": 0.2});
        let merged = deep_merge(&template, &user);
        assert_eq!(
            merged,
            json!({"model": "m", "temperature": 0.2, "max_tokens": 1000})
        );
    }

    #[test]
    fn merge_recurses_into_objects() {
        let template = json!({"model": "m", "opts": {"a": 1, "b": 2}});
        let user = json!({"opts": {"b": 3, "c": 4}});
        let merged = deep_merge(&template, &user);
        assert_eq!(merged, json!({"model": "m", "opts": {"a": 1, "b": 3, "c": 4}}));
    }

    #[test]
    fn merge_replaces_arrays_outright() {
        let template = json!({"model": "m", "tools": ["search", "code"]});
        let user = json!({"tools": ["code"]});
        let merged = deep_merge(&template, &user);
        assert_eq!(merged, json!({"model": "m", "tools": ["code"]}));
    }

    proptest! {
        /// Any finite temperature inside the table bounds validates; anything
        /// outside is rejected.
        #[test]
        fn temperature_validation_matches_bounds(t in -10.0f64..10.0) {
            let result = validate_config(&json!({"model": "m", "temperature": t}));
            if (0.0..=2.0).contains(&t) {
                prop_assert!(result.is_ok());
            } else {
                prop_assert!(result.is_err());
            }
        }

        /// Merging never loses template keys the user did not touch.
        #[test]
        fn merge_preserves_untouched_keys(extra in 1i64..1000) {
            let template = json!({"model": "m", "max_tokens": extra});
            let user = json!({"temperature": 1.0});
            let merged = deep_merge(&template, &user);
            prop_assert_eq!(merged.get("max_tokens"), Some(&json!(extra)));
            prop_assert_eq!(merged.get("model"), Some(&json!("m")));
        }
    }
}
