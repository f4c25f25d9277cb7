//! Graph State and Schema
//!
//! A [`State`] is the ordered field map that flows through a run. Its shape
//! is fixed by a [`StateSchema`] declared when the graph is built; steps
//! return a [`PartialState`] holding only the fields they change.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use super::ReducerKind;
use crate::error::{GraphError, GraphResult};

/// The shared data object flowing through a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    fields: Map<String, Value>,
}

impl State {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a JSON object
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Create from a JSON value (must be an object)
    pub fn from_json(value: Value) -> GraphResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(GraphError::Serialization(format!(
                "State must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a field deserialized into `T`; `null` reads as `None`
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.fields.get(key).filter(|v| !v.is_null()).and_then(|v| {
            match serde_json::from_value(v.clone()) {
                Ok(val) => Some(val),
                Err(e) => {
                    tracing::warn!(key = key, error = %e, "State::get_as deserialization failed");
                    None
                }
            }
        })
    }

    /// Check if a field is present
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Field names in order
    pub fn fields(&self) -> Vec<&str> {
        self.fields.keys().map(|s| s.as_str()).collect()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Convert to a JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub(crate) fn insert(&mut self, key: String, value: Value) {
        self.fields.insert(key, value);
    }
}

/// A subset of state fields returned by a step or supplied by a caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialState {
    fields: Map<String, Value>,
}

impl PartialState {
    /// Create an empty partial state (no changes)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field update
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Set a field update in place
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Create from a JSON value (must be an object)
    pub fn from_json(value: Value) -> GraphResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(GraphError::Serialization(format!(
                "Partial state must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Iterate over updates in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

impl From<State> for PartialState {
    fn from(state: State) -> Self {
        Self {
            fields: state.fields,
        }
    }
}

impl IntoIterator for PartialState {
    type Item = (String, Value);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

/// JSON type accepted by a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Any,
    String,
    Number,
    Integer,
    Bool,
    Array,
    Object,
}

impl FieldType {
    /// Whether `value` is acceptable for this type. `null` always is.
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            FieldType::Any => true,
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::Any => "any",
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Bool => "bool",
            FieldType::Array => "array",
            FieldType::Object => "object",
        };
        f.write_str(name)
    }
}

/// A single declared field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateField {
    pub name: String,
    #[serde(default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub reducer: ReducerKind,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

impl StateField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            reducer: ReducerKind::Overwrite,
            default: None,
            description: None,
        }
    }

    /// Set the reducer
    pub fn with_reducer(mut self, reducer: ReducerKind) -> Self {
        self.reducer = reducer;
        self
    }

    /// Set the default value
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn initial_value(&self) -> Value {
        match (&self.default, &self.reducer) {
            (Some(value), _) => value.clone(),
            (None, ReducerKind::Append) => Value::Array(Vec::new()),
            (None, ReducerKind::Overwrite) => Value::Null,
        }
    }
}

/// Declared shape of a graph's state
///
/// # Example
///
/// ```rust,ignore
/// let schema = StateSchema::new("Chat")
///     .field("question", FieldType::String)
///     .append("messages")
///     .add_field(StateField::new("turns", FieldType::Integer).with_default(0));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSchema {
    pub name: String,
    pub fields: Vec<StateField>,
}

impl StateSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field definition
    pub fn add_field(mut self, field: StateField) -> Self {
        self.fields.push(field);
        self
    }

    /// Add an overwrite field
    pub fn field(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.add_field(StateField::new(name, field_type))
    }

    /// Add an append-only array field (message/history-like)
    pub fn append(self, name: impl Into<String>) -> Self {
        self.add_field(StateField::new(name, FieldType::Array).with_reducer(ReducerKind::Append))
    }

    pub fn get_field(&self, name: &str) -> Option<&StateField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Reducer for a field; undeclared fields have none
    pub fn reducer_for(&self, name: &str) -> Option<&ReducerKind> {
        self.get_field(name).map(|f| &f.reducer)
    }

    /// State holding every declared field at its default
    pub fn initial_state(&self) -> State {
        let mut state = State::new();
        for field in &self.fields {
            state.insert(field.name.clone(), field.initial_value());
        }
        state
    }

    /// Check the schema itself is well formed
    pub fn validate(&self) -> GraphResult<()> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(GraphError::MalformedGraph(format!(
                    "schema '{}' declares a field with an empty name",
                    self.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(GraphError::MalformedGraph(format!(
                    "schema '{}' declares field '{}' twice",
                    self.name, field.name
                )));
            }
            if field.reducer == ReducerKind::Append
                && !matches!(field.field_type, FieldType::Array | FieldType::Any)
            {
                return Err(GraphError::MalformedGraph(format!(
                    "append field '{}' must be typed array or any, not {}",
                    field.name, field.field_type
                )));
            }
            if let Some(default) = &field.default {
                if !field.field_type.accepts(default) {
                    return Err(GraphError::MalformedGraph(format!(
                        "default for field '{}' is not a {}",
                        field.name, field.field_type
                    )));
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
