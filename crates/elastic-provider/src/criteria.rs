//! Criteria translation.
//!
//! Translates MongoDB-style criteria objects into an [`EngineQuery`] tree and
//! from there into Elasticsearch Query DSL JSON. Translation is pure and
//! bottom-up: every clause is translated from its children, and the input is
//! never modified.
//!
//! | Criteria                         | Query DSL                                   |
//! |----------------------------------|---------------------------------------------|
//! | `{"name": "bob"}`                | `term` on `data.name.keyword`               |
//! | `{"_id": "/a/*"}`                | `regexp` on `path`                          |
//! | `{"n": {"$in": [1, 2]}}`         | `terms` on `data.n`                         |
//! | `{"n": {"$gte": 3}}`             | `range` on `data.n`                         |
//! | `{"$and": [..]}`                 | `bool.filter`                               |
//! | `{"$or": [..]}`                  | `bool.should` with `minimum_should_match: 1`|
//! | `{"$not": {..}}`, `{"$ne": ..}`  | `bool.must_not`                             |
//! | `{"n": null}`                    | `bool.must_not` of `exists`                 |

use serde_json::{Map, Value, json};

use crate::error::CriteriaError;
use crate::path::wildcard_to_regex;

/// Stored top-level fields addressable directly from criteria.
const META_FIELDS: &[&str] = &[
    "path",
    "created",
    "modified",
    "timestamp",
    "createdBy",
    "modifiedBy",
    "deletedBy",
    "_tag",
];

/// A query in the engine's boolean query model.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum EngineQuery {
    /// Matches every document.
    MatchAll,
    /// Exact value on a field.
    Term { field: String, value: Value },
    /// Any of a set of values on a field.
    Terms { field: String, values: Vec<Value> },
    /// One bound on a field.
    Range {
        field: String,
        op: RangeOp,
        value: Value,
    },
    /// The field has a non-null value.
    Exists { field: String },
    /// The whole field value matches an anchored regular expression.
    Regexp { field: String, pattern: String },
    /// Every clause matches.
    And(Vec<EngineQuery>),
    /// At least one clause matches.
    Or(Vec<EngineQuery>),
    /// The clause does not match.
    Not(Box<EngineQuery>),
}

/// Range comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
}

impl RangeOp {
    /// Query DSL key for this bound.
    pub fn as_str(&self) -> &'static str {
        match self {
            RangeOp::Gt => "gt",
            RangeOp::Gte => "gte",
            RangeOp::Lt => "lt",
            RangeOp::Lte => "lte",
        }
    }
}

impl EngineQuery {
    /// Conjunction that collapses trivial cases: no clauses is `MatchAll`,
    /// one clause is itself, and `MatchAll` members are dropped.
    pub fn and(clauses: Vec<EngineQuery>) -> EngineQuery {
        let mut clauses: Vec<EngineQuery> = clauses
            .into_iter()
            .filter(|c| *c != EngineQuery::MatchAll)
            .collect();
        match clauses.len() {
            0 => EngineQuery::MatchAll,
            1 => clauses.remove(0),
            _ => EngineQuery::And(clauses),
        }
    }

    /// Negation of a clause.
    pub fn not(clause: EngineQuery) -> EngineQuery {
        EngineQuery::Not(Box::new(clause))
    }

    /// Renders the query as Query DSL JSON.
    pub fn to_json(&self) -> Value {
        match self {
            EngineQuery::MatchAll => json!({ "match_all": {} }),
            EngineQuery::Term { field, value } => json!({ "term": { field.as_str(): value } }),
            EngineQuery::Terms { field, values } => {
                json!({ "terms": { field.as_str(): values } })
            }
            EngineQuery::Range { field, op, value } => {
                json!({ "range": { field.as_str(): { op.as_str(): value } } })
            }
            EngineQuery::Exists { field } => json!({ "exists": { "field": field } }),
            EngineQuery::Regexp { field, pattern } => {
                json!({ "regexp": { field.as_str(): { "value": pattern } } })
            }
            EngineQuery::And(clauses) => json!({
                "bool": { "filter": clauses.iter().map(|c| c.to_json()).collect::<Vec<_>>() }
            }),
            EngineQuery::Or(clauses) => json!({
                "bool": {
                    "should": clauses.iter().map(|c| c.to_json()).collect::<Vec<_>>(),
                    "minimum_should_match": 1
                }
            }),
            EngineQuery::Not(clause) => json!({ "bool": { "must_not": [clause.to_json()] } }),
        }
    }
}

/// Maps a criteria field name to the stored field it addresses.
///
/// `_id` and `_meta._id` address the document path. Meta fields and any
/// `_meta.`-prefixed name (such as a dynamic route field) address the
/// envelope; `data.*` and `_data.*` keep their name; every other name is a
/// field of the stored data.
pub fn engine_field(name: &str) -> String {
    if let Some(envelope) = name.strip_prefix("_meta.") {
        return if envelope == "_id" { "path" } else { envelope }.to_string();
    }
    if name == "_id" {
        return "path".to_string();
    }
    if META_FIELDS.contains(&name) {
        return name.to_string();
    }
    if name == "data" || name.starts_with("data.") || name.starts_with("_data.") {
        return name.to_string();
    }
    format!("data.{}", name)
}

/// Translates a criteria object.
pub fn translate(criteria: &Value) -> Result<EngineQuery, CriteriaError> {
    translate_object(criteria, "$")
}

/// Translates a criteria object straight to Query DSL JSON.
pub fn translate_to_json(criteria: &Value) -> Result<Value, CriteriaError> {
    translate(criteria).map(|q| q.to_json())
}

fn translate_object(criteria: &Value, at: &str) -> Result<EngineQuery, CriteriaError> {
    let Value::Object(map) = criteria else {
        return Err(CriteriaError::NotAnObject { at: at.to_string() });
    };

    let mut clauses = Vec::with_capacity(map.len());
    for (key, value) in map {
        let child_at = format!("{}.{}", at, key);
        let clause = match key.as_str() {
            "$and" => EngineQuery::And(translate_list(key, value, &child_at)?),
            "$or" => EngineQuery::Or(translate_list(key, value, &child_at)?),
            "$not" => EngineQuery::not(translate_object(value, &child_at)?),
            op if op.starts_with('$') => {
                return Err(CriteriaError::UnsupportedOperator {
                    operator: op.to_string(),
                    at: at.to_string(),
                });
            }
            field => translate_field(&engine_field(field), value, &child_at)?,
        };
        clauses.push(clause);
    }
    Ok(EngineQuery::and(clauses))
}

fn translate_list(
    operator: &str,
    operand: &Value,
    at: &str,
) -> Result<Vec<EngineQuery>, CriteriaError> {
    let Value::Array(items) = operand else {
        return Err(CriteriaError::ExpectedArray {
            operator: operator.to_string(),
            at: at.to_string(),
        });
    };
    if items.is_empty() {
        return Err(CriteriaError::EmptyCombinator {
            operator: operator.to_string(),
            at: at.to_string(),
        });
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| translate_object(item, &format!("{}[{}]", at, i)))
        .collect()
}

fn translate_field(field: &str, value: &Value, at: &str) -> Result<EngineQuery, CriteriaError> {
    match value {
        Value::Object(map) if map.is_empty() => Ok(equality(field, value)),
        Value::Object(map) => {
            let operators = map.keys().filter(|k| k.starts_with('$')).count();
            if operators == map.len() {
                translate_operators(field, map, at)
            } else if operators == 0 {
                // nested document: flatten into dotted equality clauses
                let clauses = map
                    .iter()
                    .map(|(k, v)| {
                        translate_field(&format!("{}.{}", field, k), v, &format!("{}.{}", at, k))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(EngineQuery::and(clauses))
            } else {
                Err(CriteriaError::InvalidOperand {
                    operator: map
                        .keys()
                        .find(|k| k.starts_with('$'))
                        .cloned()
                        .unwrap_or_default(),
                    at: at.to_string(),
                    message: "operators cannot be mixed with field names".to_string(),
                })
            }
        }
        _ => Ok(equality(field, value)),
    }
}

fn translate_operators(
    field: &str,
    operators: &Map<String, Value>,
    at: &str,
) -> Result<EngineQuery, CriteriaError> {
    let mut clauses = Vec::with_capacity(operators.len());
    for (operator, operand) in operators {
        let clause = match operator.as_str() {
            "$eq" => equality(field, operand),
            "$ne" => EngineQuery::not(equality(field, operand)),
            "$in" => membership(field, operator, operand, at)?,
            "$nin" => EngineQuery::not(membership(field, operator, operand, at)?),
            "$gt" => range(field, RangeOp::Gt, operator, operand, at)?,
            "$gte" => range(field, RangeOp::Gte, operator, operand, at)?,
            "$lt" => range(field, RangeOp::Lt, operator, operand, at)?,
            "$lte" => range(field, RangeOp::Lte, operator, operand, at)?,
            "$exists" => match operand {
                Value::Bool(true) => EngineQuery::Exists {
                    field: field.to_string(),
                },
                Value::Bool(false) => EngineQuery::not(EngineQuery::Exists {
                    field: field.to_string(),
                }),
                _ => {
                    return Err(CriteriaError::InvalidOperand {
                        operator: operator.clone(),
                        at: at.to_string(),
                        message: "expected a boolean".to_string(),
                    });
                }
            },
            "$not" => EngineQuery::not(translate_field(field, operand, at)?),
            other => {
                return Err(CriteriaError::UnsupportedOperator {
                    operator: other.to_string(),
                    at: at.to_string(),
                });
            }
        };
        clauses.push(clause);
    }
    Ok(EngineQuery::and(clauses))
}

/// Equality on a single value. `null` matches a missing or null field.
fn equality(field: &str, value: &Value) -> EngineQuery {
    match value {
        Value::Null => EngineQuery::not(EngineQuery::Exists {
            field: field.to_string(),
        }),
        Value::String(s) if field == "path" && s.contains('*') => EngineQuery::Regexp {
            field: field.to_string(),
            pattern: wildcard_to_regex(s),
        },
        Value::String(_) => EngineQuery::Term {
            field: keyword_field(field),
            value: value.clone(),
        },
        // an array value must be fully contained in the stored array
        Value::Array(items) => EngineQuery::and(items.iter().map(|v| equality(field, v)).collect()),
        _ => EngineQuery::Term {
            field: field.to_string(),
            value: value.clone(),
        },
    }
}

fn membership(
    field: &str,
    operator: &str,
    operand: &Value,
    at: &str,
) -> Result<EngineQuery, CriteriaError> {
    let Value::Array(items) = operand else {
        return Err(CriteriaError::ExpectedArray {
            operator: operator.to_string(),
            at: at.to_string(),
        });
    };

    let plain = items.iter().all(|v| match v {
        Value::Null | Value::Array(_) | Value::Object(_) => false,
        Value::String(s) => !(field == "path" && s.contains('*')),
        _ => true,
    });
    let all_strings = items.iter().all(Value::is_string);

    if plain && (all_strings || items.iter().all(|v| !v.is_string())) {
        let field = if all_strings && !items.is_empty() {
            keyword_field(field)
        } else {
            field.to_string()
        };
        return Ok(EngineQuery::Terms {
            field,
            values: items.clone(),
        });
    }

    Ok(EngineQuery::Or(
        items.iter().map(|v| equality(field, v)).collect(),
    ))
}

fn range(
    field: &str,
    op: RangeOp,
    operator: &str,
    operand: &Value,
    at: &str,
) -> Result<EngineQuery, CriteriaError> {
    let field = match operand {
        Value::Number(_) => field.to_string(),
        Value::String(_) => keyword_field(field),
        _ => {
            return Err(CriteriaError::InvalidOperand {
                operator: operator.to_string(),
                at: at.to_string(),
                message: "expected a number or a string".to_string(),
            });
        }
    };
    Ok(EngineQuery::Range {
        field,
        op,
        value: operand.clone(),
    })
}

/// Strings in stored data are dynamically mapped as text with a `keyword`
/// sub-field; exact matches go against the sub-field.
fn keyword_field(field: &str) -> String {
    if field.starts_with("data.") {
        format!("{}.keyword", field)
    } else {
        field.to_string()
    }
}
