// SPDX-License-Identifier: MIT

//! Declared state keys and how writes to them combine

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{CRITERION_RESULTS, ERRORS};
use crate::flow::error::ConfigurationError;

/// Per-key reducers and defaults, keyed by state key
///
/// Deserializes from the `state:` mapping of a workflow file:
///
/// ```yaml
/// state:
///   matches: { type: array, reducer: append }
///   threshold: { type: number, default: 0.5 }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct StateSchema {
    #[serde(flatten)]
    pub fields: BTreeMap<String, StateFieldDef>,
}

impl StateSchema {
    /// Schema every policy workflow starts from: clause results merge, errors append
    pub fn policy_defaults() -> Self {
        Self::default()
            .with_field(
                CRITERION_RESULTS,
                StateFieldDef::new(FieldType::Object, ReducerType::Merge),
            )
            .with_field(ERRORS, StateFieldDef::new(FieldType::Array, ReducerType::Append))
    }

    pub fn with_field(mut self, name: &str, def: StateFieldDef) -> Self {
        self.fields.insert(name.to_string(), def);
        self
    }

    /// Reducer for a key; undeclared keys overwrite
    pub fn reducer_for(&self, key: &str) -> ReducerType {
        self.fields
            .get(key)
            .map(|def| def.reducer)
            .unwrap_or_default()
    }

    /// Overlay another schema; fields in `other` win
    pub fn merged(mut self, other: &StateSchema) -> Self {
        self.fields
            .extend(other.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Every declared default must have the declared type
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (key, def) in &self.fields {
            match &def.default {
                Some(default) if !def.field_type.accepts(default) => {
                    return Err(ConfigurationError::Invalid(format!(
                        "State key '{}' declares type {} but its default is {}",
                        key,
                        def.field_type.as_str(),
                        default
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StateFieldDef {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub reducer: ReducerType,
    /// Value the key holds before any node writes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl StateFieldDef {
    pub fn new(field_type: FieldType, reducer: ReducerType) -> Self {
        Self {
            field_type,
            reducer,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Whether `value` is of this type; null is accepted for every type
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::String, Value::String(_))
            | (Self::Number, Value::Number(_))
            | (Self::Boolean, Value::Bool(_))
            | (Self::Array, Value::Array(_))
            | (Self::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

/// How a write combines with the value already held under a key
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReducerType {
    #[default]
    Overwrite,
    /// Push one item, or extend by an array of items
    Append,
    /// Keep the larger number; non-numeric writes are dropped
    Max,
    /// Keep the smaller number; non-numeric writes are dropped
    Min,
    /// Shallow-merge objects, incoming keys win; non-object writes are dropped
    Merge,
}

impl ReducerType {
    /// Value a key holds after `incoming` is written over `current`
    pub fn reduce(self, current: Option<Value>, incoming: Value) -> Option<Value> {
        match self {
            Self::Overwrite => Some(incoming),
            Self::Append => {
                let mut items = match current {
                    Some(Value::Array(items)) => items,
                    Some(Value::Null) | None => Vec::new(),
                    Some(single) => vec![single],
                };
                match incoming {
                    Value::Array(more) => items.extend(more),
                    one => items.push(one),
                }
                Some(Value::Array(items))
            }
            Self::Max | Self::Min => {
                let Some(new) = incoming.as_f64() else {
                    return current;
                };
                let keep = current
                    .as_ref()
                    .and_then(Value::as_f64)
                    .is_some_and(|old| if self == Self::Max { old >= new } else { old <= new });
                if keep {
                    current
                } else {
                    Some(incoming)
                }
            }
            Self::Merge => match (current, incoming) {
                (Some(Value::Object(mut held)), Value::Object(more)) => {
                    held.extend(more);
                    Some(Value::Object(held))
                }
                (_, incoming @ Value::Object(_)) => Some(incoming),
                (current, _) => current,
            },
        }
    }
}
