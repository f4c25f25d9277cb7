//! State Merge Policy
//!
//! Reducers determine how a step's partial output is combined with the
//! running state. Each declared field carries one [`ReducerKind`];
//! [`merge`] applies a whole [`PartialState`] against a [`StateSchema`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{PartialState, State, StateSchema};
use crate::error::{GraphError, GraphResult};

/// Per-field update strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReducerKind {
    /// Replace the current value with the update (default)
    #[default]
    Overwrite,

    /// Concatenate the update onto the current ordered sequence.
    ///
    /// An array update contributes each of its items, any other value
    /// contributes itself as a single item.
    Append,
}

impl ReducerKind {
    /// Reduce the current value with the update value
    pub fn reduce(&self, current: Option<&Value>, update: Value) -> Value {
        match self {
            ReducerKind::Overwrite => update,
            ReducerKind::Append => {
                let mut items = match current {
                    Some(Value::Array(existing)) => existing.clone(),
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => vec![other.clone()],
                };
                match update {
                    Value::Array(new_items) => items.extend(new_items),
                    other => items.push(other),
                }
                Value::Array(items)
            }
        }
    }
}

impl std::fmt::Display for ReducerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReducerKind::Overwrite => write!(f, "overwrite"),
            ReducerKind::Append => write!(f, "append"),
        }
    }
}

/// Merge `partial` into `base` according to the schema's field reducers.
///
/// Fields absent from `partial` are left untouched. A field not declared
/// in the schema, or a value whose JSON type does not match the declared
/// field type, fails with [`GraphError::SchemaViolation`] and leaves no
/// partial result behind.
pub fn merge(base: &State, partial: &PartialState, schema: &StateSchema) -> GraphResult<State> {
    let mut merged = base.clone();
    for (key, value) in partial.iter() {
        let field = schema.get_field(key).ok_or_else(|| {
            GraphError::schema_violation(
                key.clone(),
                format!("field is not declared in schema '{}'", schema.name),
            )
        })?;
        // Checked after reducing: an Append update may be a single item
        let reduced = field.reducer.reduce(merged.get(key), value.clone());
        if !field.field_type.accepts(&reduced) {
            return Err(GraphError::schema_violation(
                key.clone(),
                format!(
                    "expected {}, got {}",
                    field.field_type,
                    super::state::json_kind(&reduced)
                ),
            ));
        }
        merged.insert(key.clone(), reduced);
    }
    Ok(merged)
}
