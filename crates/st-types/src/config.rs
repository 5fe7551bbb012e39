use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::SamplingError;

/// Metric label → value, as handed back to the optimizer (e.g. `{"pass@32": 0.41}`).
pub type MetricMap = BTreeMap<String, f64>;

/// A point in the search space, as proposed by the optimizer.
///
/// Configurations are arbitrarily nested JSON mappings and are never mutated
/// once built. Equality is defined on the canonical key, so two
/// configurations that only differ in mapping-key order are the same point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(Value);

impl Configuration {
    pub fn new(value: Value) -> Result<Self, SamplingError> {
        if value.is_object() {
            Ok(Self(value))
        } else {
            Err(SamplingError::NotAMapping)
        }
    }

    /// Build a configuration from an already-constructed mapping.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(Value::Object(map))
    }

    /// Parse a configuration from its JSON text (canonical or not).
    pub fn from_json(text: &str) -> Result<Self, SamplingError> {
        let value: Value = serde_json::from_str(text).map_err(|e| SamplingError::InvalidValue {
            field: "<root>".to_string(),
            message: e.to_string(),
        })?;
        Self::new(value)
    }

    /// Compact JSON with keys sorted at every level.
    pub fn canonical_key(&self) -> String {
        sorted(&self.0).to_string()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Rebuild `value` with mapping keys inserted in sorted order, so the output
/// does not depend on whether `serde_json` preserves insertion order.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|k| (k.clone(), sorted(&map[k])))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_key() == other.canonical_key()
    }
}

impl Eq for Configuration {}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_key())
    }
}

impl TryFrom<Value> for Configuration {
    type Error = SamplingError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
