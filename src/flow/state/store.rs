// SPDX-License-Identifier: MIT

//! Per-run shared state

use serde_json::{Map, Value};
use std::collections::HashMap;

use super::schema::{ReducerType, StateSchema};

/// Key/value channel between the nodes of one workflow run
///
/// Writes through [`SharedState::update`] go through the key's reducer, so
/// several clause nodes can each add their verdict to `criterion_results`.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    values: Map<String, Value>,
    reducers: HashMap<String, ReducerType>,
}

impl SharedState {
    /// State seeded with the schema's defaults and reducers
    pub fn new(schema: &StateSchema) -> Self {
        let reducers = schema
            .fields
            .iter()
            .map(|(key, def)| (key.clone(), def.reducer))
            .collect();
        let values = schema
            .fields
            .iter()
            .filter_map(|(key, def)| Some((key.clone(), def.default.clone()?)))
            .collect();
        Self { values, reducers }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn update(&mut self, key: &str, value: Value) {
        let reducer = self.reducers.get(key).copied().unwrap_or_default();
        let current = self.values.remove(key);
        if let Some(next) = reducer.reduce(current, value) {
            self.values.insert(key.to_string(), next);
        }
    }

    /// Overwrite a key, ignoring its reducer
    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Number at a dot path
    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get_path(path).and_then(Value::as_f64)
    }

    /// Value at a dot path such as `criterion_results.criterion_1.met`
    ///
    /// A top-level key that itself contains dots wins over the nested lookup.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        self.values.get(path).or_else(|| {
            let (head, rest) = path.split_once('.')?;
            rest.split('.')
                .try_fold(self.values.get(head)?, |value, part| value.get(part))
        })
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone())
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }
}
