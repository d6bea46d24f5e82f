//! Filter expressions.
//!
//! A filter document is parsed into a small AST before evaluation. Top-level
//! keys combine conjunctively; each key holds either a literal (implicit
//! equality, dotted paths allowed) or an object of comparison operators.
//! Parsing validates operator names and shapes up front so the write path
//! rejects malformed filters before anything reaches the log.

use timberdb_core::{Document, TimberError, TimberResult, Value};

/// Maximum number of clauses accepted in one filter.
const MAX_FILTER_CLAUSES: usize = 64;

/// One comparison against a document path.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Equality (implicit or `$eq`).
    Eq(Value),
    /// `$ne` - not equal (absent fields match).
    Ne(Value),
    /// `$gt` - strictly greater, natural ordering.
    Gt(Value),
    /// `$gte` - greater or equal.
    Gte(Value),
    /// `$lt` - strictly less.
    Lt(Value),
    /// `$lte` - less or equal.
    Lte(Value),
    /// `$in` - equal to any listed value.
    In(Vec<Value>),
    /// `$nin` - equal to none of the listed values.
    Nin(Vec<Value>),
}

impl Predicate {
    fn matches(&self, actual: Option<&Value>) -> bool {
        match self {
            Self::Eq(expected) => actual.is_some_and(|v| v.matches_eq(expected)),
            Self::Ne(expected) => !actual.is_some_and(|v| v.matches_eq(expected)),
            Self::Gt(bound) => cmp_matches(actual, bound, |o| o == std::cmp::Ordering::Greater),
            Self::Gte(bound) => cmp_matches(actual, bound, |o| o != std::cmp::Ordering::Less),
            Self::Lt(bound) => cmp_matches(actual, bound, |o| o == std::cmp::Ordering::Less),
            Self::Lte(bound) => cmp_matches(actual, bound, |o| o != std::cmp::Ordering::Greater),
            Self::In(options) => {
                actual.is_some_and(|v| options.iter().any(|option| v.matches_eq(option)))
            }
            Self::Nin(options) => {
                !actual.is_some_and(|v| options.iter().any(|option| v.matches_eq(option)))
            }
        }
    }
}

fn cmp_matches(
    actual: Option<&Value>,
    bound: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    actual
        .and_then(|v| v.compare(bound))
        .is_some_and(accept)
}

/// A parsed, conjunctive filter.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Vec<(String, Predicate)>,
}

impl Filter {
    /// Parses a filter document.
    ///
    /// # Errors
    ///
    /// Returns `Validation` on unknown operators, non-array `$in`/`$nin`
    /// operands, or an oversized filter.
    pub fn parse(filter: &Document) -> TimberResult<Self> {
        let mut clauses = Vec::new();

        for (path, condition) in filter.iter() {
            match condition {
                Value::Object(ops) if looks_like_operators(ops) => {
                    for (op, operand) in ops.iter() {
                        clauses.push((path.clone(), parse_operator(op, operand)?));
                    }
                }
                literal => clauses.push((path.clone(), Predicate::Eq(literal.clone()))),
            }

            if clauses.len() > MAX_FILTER_CLAUSES {
                return Err(TimberError::validation(format!(
                    "filter exceeds {MAX_FILTER_CLAUSES} clauses"
                )));
            }
        }

        Ok(Self { clauses })
    }

    /// `true` when every clause matches `doc`. The empty filter matches
    /// everything.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(path, predicate)| predicate.matches(doc.get_path(path)))
    }

    /// When the filter is exactly `{_id: <scalar>}`, returns that identity.
    #[must_use]
    pub fn as_identity(&self) -> Option<String> {
        match self.clauses.as_slice() {
            [(path, Predicate::Eq(value))] if path == "_id" => value.id_string(),
            _ => None,
        }
    }

    /// Number of parsed clauses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// `true` for the match-everything filter.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// An object operand is an operator set only when every key starts with `$`;
/// otherwise it is a literal nested-document equality.
fn looks_like_operators(ops: &Document) -> bool {
    !ops.is_empty() && ops.keys().all(|k| k.starts_with('$'))
}

fn parse_operator(op: &str, operand: &Value) -> TimberResult<Predicate> {
    let list = |operand: &Value| -> TimberResult<Vec<Value>> {
        match operand {
            Value::Array(items) => Ok(items.clone()),
            other => Err(TimberError::validation(format!(
                "{op} expects an array operand, got {}",
                other.to_json()
            ))),
        }
    };

    match op {
        "$eq" => Ok(Predicate::Eq(operand.clone())),
        "$ne" => Ok(Predicate::Ne(operand.clone())),
        "$gt" => Ok(Predicate::Gt(operand.clone())),
        "$gte" => Ok(Predicate::Gte(operand.clone())),
        "$lt" => Ok(Predicate::Lt(operand.clone())),
        "$lte" => Ok(Predicate::Lte(operand.clone())),
        "$in" => Ok(Predicate::In(list(operand)?)),
        "$nin" => Ok(Predicate::Nin(list(operand)?)),
        other => Err(TimberError::validation(format!(
            "unknown filter operator `{other}`"
        ))),
    }
}
