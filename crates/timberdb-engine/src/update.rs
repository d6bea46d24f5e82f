//! Update specifications.
//!
//! An update document in operator form (`$set`, `$unset`, `$inc`, `$push`)
//! is parsed into an [`UpdateSpec`] before anything reaches the log, and
//! applied to documents during replay. Dotted paths traverse nested
//! objects; arrays are not path-indexed.

use timberdb_core::{Document, TimberError, TimberResult, Value};

/// One parsed update action.
#[derive(Debug, Clone, PartialEq)]
enum Action {
    /// Assign a value, creating intermediate objects as needed.
    Set { path: String, value: Value },
    /// Remove a key; absent keys are a no-op.
    Unset { path: String },
    /// Add a numeric delta; a missing target is treated as zero.
    Inc { path: String, delta: Value },
    /// Append to an array field; a missing target becomes a fresh array.
    Push { path: String, value: Value },
}

/// A validated operator-form update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSpec {
    actions: Vec<Action>,
}

impl UpdateSpec {
    /// Parses an update document.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the document is empty, contains an unknown
    /// `$operator`, a non-object operand, or a non-numeric `$inc` delta.
    pub fn parse(update: &Document) -> TimberResult<Self> {
        if update.is_empty() {
            return Err(TimberError::validation("update document is empty"));
        }

        let mut actions = Vec::new();
        for (op, operand) in update.iter() {
            let fields = operand.as_object().ok_or_else(|| {
                TimberError::validation(format!(
                    "{op} expects an object operand, got {}",
                    operand.to_json()
                ))
            })?;

            for (path, value) in fields.iter() {
                let action = match op.as_str() {
                    "$set" => Action::Set {
                        path: path.clone(),
                        value: value.clone(),
                    },
                    "$unset" => Action::Unset { path: path.clone() },
                    "$inc" => {
                        if !matches!(value, Value::Int(_) | Value::Float(_)) {
                            return Err(TimberError::validation(format!(
                                "$inc delta for `{path}` must be numeric, got {}",
                                value.to_json()
                            )));
                        }
                        Action::Inc {
                            path: path.clone(),
                            delta: value.clone(),
                        }
                    }
                    "$push" => Action::Push {
                        path: path.clone(),
                        value: value.clone(),
                    },
                    other => {
                        return Err(TimberError::validation(format!(
                            "unknown update operator `{other}`"
                        )))
                    }
                };
                actions.push(action);
            }
        }

        Ok(Self { actions })
    }

    /// Applies every action to `doc` in parse order.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when `$inc` targets a non-numeric existing
    /// field or `$push` targets a non-array existing field.
    pub fn apply(&self, doc: &mut Document) -> TimberResult<()> {
        for action in &self.actions {
            match action {
                Action::Set { path, value } => doc.set_path(path, value.clone()),
                Action::Unset { path } => {
                    doc.remove_path(path);
                }
                Action::Inc { path, delta } => {
                    let current = doc.get_path(path).cloned().unwrap_or(Value::Int(0));
                    let sum = current.numeric_add(delta).ok_or_else(|| {
                        TimberError::validation(format!(
                            "$inc target `{path}` holds non-numeric {}",
                            current.to_json()
                        ))
                    })?;
                    doc.set_path(path, sum);
                }
                Action::Push { path, value } => {
                    let mut items = match doc.get_path(path).cloned() {
                        None | Some(Value::Null) => Vec::new(),
                        Some(Value::Array(items)) => items,
                        Some(other) => {
                            return Err(TimberError::validation(format!(
                                "$push target `{path}` holds non-array {}",
                                other.to_json()
                            )))
                        }
                    };
                    items.push(value.clone());
                    doc.set_path(path, Value::Array(items));
                }
            }
        }
        Ok(())
    }
}
