//! The canonical intent: one backend-independent description of a request.
//!
//! Every intent source produces an [`Intent`], and every translator consumes
//! one. Intents are plain data; building one never touches a backend.
//!
//! ```
//! use polyq::intent::Intent;
//!
//! let intent = Intent::filter("movies")
//!     .eq("year", 1993)
//!     .contains_ci("director", "spielberg")
//!     .limit(10);
//! assert!(intent.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EngineError, EngineResult};
use crate::value::Value;

/// What the intent asks the backend to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    #[serde(alias = "find", alias = "get", alias = "search")]
    Filter,
    #[serde(alias = "insert", alias = "add")]
    Create,
    #[serde(alias = "read_by_key", alias = "key", alias = "lookup")]
    ReadByKey,
    #[serde(alias = "set")]
    Update,
    #[serde(alias = "del", alias = "remove")]
    Delete,
    #[serde(alias = "describe_schema", alias = "schema", alias = "describe")]
    DescribeSchema,
}

impl Operation {
    /// Whether the operation reads entity records back.
    pub fn returns_records(&self) -> bool {
        matches!(self, Operation::Filter | Operation::ReadByKey | Operation::DescribeSchema)
    }

    /// Whether the operation must address a single entity by identity.
    pub fn requires_identity(&self) -> bool {
        matches!(
            self,
            Operation::Create | Operation::ReadByKey | Operation::Update | Operation::Delete
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Filter => "filter",
            Operation::Create => "create",
            Operation::ReadByKey => "read-by-key",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::DescribeSchema => "describe-schema",
        };
        write!(f, "{}", name)
    }
}

/// Predicate comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operator {
    #[serde(alias = "eq", alias = "=", alias = "==")]
    Equals,
    #[serde(alias = "~", alias = "like")]
    Contains,
    #[serde(alias = "gt", alias = ">", alias = "greater_than")]
    GreaterThan,
    #[serde(alias = "lt", alias = "<", alias = "less_than")]
    LessThan,
    #[serde(alias = "in", alias = "in_set")]
    InSet,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::Contains => "~",
            Operator::GreaterThan => ">",
            Operator::LessThan => "<",
            Operator::InSet => "in",
        }
    }
}

/// A single field condition. All predicates of an intent are AND-combined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    #[serde(alias = "op")]
    pub operator: Operator,
    pub value: Value,
    #[serde(default, alias = "ignore_case")]
    pub case_insensitive: bool,
}

impl Predicate {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            case_insensitive: false,
        }
    }

    /// Fold case when matching this predicate.
    pub fn ignore_case(mut self) -> Self {
        self.case_insensitive = true;
        self
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fold = if self.case_insensitive { " (ci)" } else { "" };
        write!(f, "{} {} {}{}", self.field, self.operator.symbol(), self.value, fold)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Canonical request handed to every translator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub operation: Operation,
    pub entity: String,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
    #[serde(default)]
    pub updates: BTreeMap<String, Value>,
    #[serde(default)]
    pub payload: BTreeMap<String, Value>,
    #[serde(default)]
    pub pagination: Pagination,
}

impl Intent {
    pub fn new(operation: Operation, entity: impl Into<String>) -> Self {
        Self {
            operation,
            entity: entity.into(),
            predicates: vec![],
            updates: BTreeMap::new(),
            payload: BTreeMap::new(),
            pagination: Pagination::default(),
        }
    }

    pub fn filter(entity: impl Into<String>) -> Self {
        Self::new(Operation::Filter, entity)
    }

    pub fn create(entity: impl Into<String>) -> Self {
        Self::new(Operation::Create, entity)
    }

    pub fn read_by_key(entity: impl Into<String>) -> Self {
        Self::new(Operation::ReadByKey, entity)
    }

    pub fn update(entity: impl Into<String>) -> Self {
        Self::new(Operation::Update, entity)
    }

    pub fn delete(entity: impl Into<String>) -> Self {
        Self::new(Operation::Delete, entity)
    }

    pub fn describe_schema(entity: impl Into<String>) -> Self {
        Self::new(Operation::DescribeSchema, entity)
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(Predicate::new(field, Operator::Equals, value))
    }

    pub fn eq_ci(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(Predicate::new(field, Operator::Equals, value).ignore_case())
    }

    pub fn contains(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(Predicate::new(field, Operator::Contains, value))
    }

    pub fn contains_ci(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(Predicate::new(field, Operator::Contains, value).ignore_case())
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(Predicate::new(field, Operator::GreaterThan, value))
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(Predicate::new(field, Operator::LessThan, value))
    }

    pub fn in_set<T: Into<Value>>(self, field: &str, values: Vec<T>) -> Self {
        self.with(Predicate::new(field, Operator::InSet, values))
    }

    /// Add a field assignment for an update.
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.updates.insert(field.to_string(), value.into());
        self
    }

    /// Add a payload field for a create.
    pub fn value(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(field.to_string(), value.into());
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.pagination.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.pagination.offset = Some(n);
        self
    }

    /// Structural validation shared by every backend.
    ///
    /// Type checks against the entity's fields happen at translation time,
    /// since only the mapping knows field types.
    pub fn validate(&self) -> EngineResult<()> {
        let entity = self.entity.trim();
        if entity.is_empty() {
            return Err(EngineError::malformed("entity is required"));
        }
        if !entity.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            return Err(EngineError::malformed(format!("invalid entity name '{}'", entity)));
        }

        match self.operation {
            Operation::Create => {
                if self.payload.is_empty() {
                    return Err(EngineError::malformed("create requires a payload"));
                }
                if !self.predicates.is_empty() {
                    return Err(EngineError::malformed("create takes a payload, not predicates"));
                }
            }
            Operation::Update => {
                if self.updates.is_empty() {
                    return Err(EngineError::malformed("update requires at least one field assignment"));
                }
                if self.predicates.is_empty() {
                    return Err(EngineError::malformed("update requires predicates"));
                }
            }
            Operation::ReadByKey | Operation::Delete => {
                if self.predicates.is_empty() {
                    return Err(EngineError::malformed(format!("{} requires predicates", self.operation)));
                }
            }
            Operation::DescribeSchema => {
                if !self.predicates.is_empty() {
                    return Err(EngineError::malformed("describe-schema takes no predicates"));
                }
            }
            Operation::Filter => {}
        }

        if self.operation != Operation::Create && !self.payload.is_empty() {
            return Err(EngineError::malformed(format!("{} does not take a payload", self.operation)));
        }
        if self.operation != Operation::Update && !self.updates.is_empty() {
            return Err(EngineError::malformed(format!("{} does not take field assignments", self.operation)));
        }
        if self.pagination.limit == Some(0) {
            return Err(EngineError::malformed("limit must be positive"));
        }

        for predicate in &self.predicates {
            validate_predicate(predicate)?;
        }
        for (field, value) in self.updates.iter().chain(self.payload.iter()) {
            if field.trim().is_empty() {
                return Err(EngineError::malformed("assignment with an empty field name"));
            }
            validate_value(field, value)?;
        }
        Ok(())
    }

    /// Equality predicates on `field`, in declaration order.
    pub fn equalities<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Predicate> + 'a {
        self.predicates
            .iter()
            .filter(move |p| p.field == field && p.operator == Operator::Equals)
    }

    /// Check the identity rules against the entity's identity fields.
    ///
    /// Create must carry every identity field, update must not assign one,
    /// and keyed operations need an equality predicate on each.
    pub fn validate_identity(&self, identity: &[String]) -> EngineResult<()> {
        let names = identity.join(", ");
        let keyed = |intent: &Intent| -> EngineResult<()> {
            match identity.iter().find(|f| intent.equalities(f).next().is_none()) {
                Some(_) => Err(EngineError::malformed(format!(
                    "{} needs an equality predicate on every identity field ({})",
                    intent.operation, names
                ))),
                None => Ok(()),
            }
        };

        match self.operation {
            Operation::Create => {
                if identity.iter().any(|f| !self.payload.contains_key(f)) {
                    return Err(EngineError::malformed(format!(
                        "create needs every identity field ({}) in the payload",
                        names
                    )));
                }
            }
            Operation::Update => {
                if let Some(field) = self.updates.keys().find(|f| identity.contains(f)) {
                    return Err(EngineError::malformed(format!(
                        "identity field '{}' cannot be updated",
                        field
                    )));
                }
                keyed(self)?;
            }
            Operation::ReadByKey | Operation::Delete => keyed(self)?,
            Operation::Filter | Operation::DescribeSchema => {}
        }
        Ok(())
    }
}

fn validate_predicate(predicate: &Predicate) -> EngineResult<()> {
    if predicate.field.trim().is_empty() {
        return Err(EngineError::malformed("predicate with an empty field name"));
    }
    validate_value(&predicate.field, &predicate.value)?;
    match (&predicate.operator, &predicate.value) {
        (Operator::InSet, Value::List(items)) if items.is_empty() => Err(EngineError::malformed(
            format!("in-set predicate on '{}' has no values", predicate.field),
        )),
        (Operator::InSet, Value::List(items)) if items.iter().any(|v| matches!(v, Value::List(_))) => {
            Err(EngineError::malformed(format!(
                "in-set predicate on '{}' contains a nested list",
                predicate.field
            )))
        }
        (Operator::InSet, Value::List(_)) => Ok(()),
        (Operator::InSet, _) => Err(EngineError::malformed(format!(
            "in-set predicate on '{}' needs a list value",
            predicate.field
        ))),
        (_, Value::List(_)) => Err(EngineError::malformed(format!(
            "'{}' predicate on '{}' takes a single value",
            predicate.operator.symbol(),
            predicate.field
        ))),
        (_, Value::Null) => Err(EngineError::malformed(format!(
            "predicate on '{}' has no value",
            predicate.field
        ))),
        _ => Ok(()),
    }
}

fn validate_value(field: &str, value: &Value) -> EngineResult<()> {
    let has_marker = value.is_not_applicable()
        || value
            .as_list()
            .is_some_and(|items| items.iter().any(Value::is_not_applicable));
    if has_marker {
        return Err(EngineError::malformed(format!(
            "'{}' carries the not-applicable marker",
            field
        )));
    }
    Ok(())
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation, self.entity)?;
        if !self.predicates.is_empty() {
            let preds: Vec<String> = self.predicates.iter().map(|p| p.to_string()).collect();
            write!(f, " where {}", preds.join(" and "))?;
        }
        for (label, map) in [("set", &self.updates), ("values", &self.payload)] {
            if !map.is_empty() {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{} = {}", k, v)).collect();
                write!(f, " {} {}", label, parts.join(", "))?;
            }
        }
        if let Some(limit) = self.pagination.limit {
            write!(f, " limit {}", limit)?;
        }
        if let Some(offset) = self.pagination.offset {
            write!(f, " offset {}", offset)?;
        }
        Ok(())
    }
}
