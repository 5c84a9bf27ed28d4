use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Dialect used when rendering a query as an OData query string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ODataVersion {
    V2,
    #[default]
    V4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    StartsWith,
    EndsWith,
    Contains,
}

impl FilterOperator {
    /// Parse an operator token the way the native predicate constructor
    /// does. Matching is case-insensitive.
    pub fn parse(token: &str) -> Result<Self, Error> {
        let op = match token.to_lowercase().as_str() {
            "eq" | "==" => FilterOperator::Eq,
            "ne" | "!=" => FilterOperator::Ne,
            "gt" | ">" => FilterOperator::Gt,
            "lt" | "<" => FilterOperator::Lt,
            "ge" | ">=" => FilterOperator::Ge,
            "le" | "<=" => FilterOperator::Le,
            "startswith" => FilterOperator::StartsWith,
            "endswith" => FilterOperator::EndsWith,
            "contains" | "substringof" => FilterOperator::Contains,
            _ => return Err(Error::InvalidOperator(token.to_string())),
        };
        Ok(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Ne => "ne",
            FilterOperator::Gt => "gt",
            FilterOperator::Lt => "lt",
            FilterOperator::Ge => "ge",
            FilterOperator::Le => "le",
            FilterOperator::StartsWith => "startswith",
            FilterOperator::EndsWith => "endswith",
            FilterOperator::Contains => "contains",
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(
            self,
            FilterOperator::StartsWith | FilterOperator::EndsWith | FilterOperator::Contains
        )
    }
}

/// Logical connective joining the operands of a predicate group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connective {
    #[default]
    And,
    Or,
}

impl Connective {
    /// Anything mentioning `and` or `&` is a conjunction, everything else
    /// is a disjunction.
    pub fn from_token(token: &str) -> Self {
        let token = token.to_lowercase();
        if token.contains("and") || token.contains('&') {
            Connective::And
        } else {
            Connective::Or
        }
    }
}

/// Boolean expression tree understood by the entity manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Predicate {
    Binary {
        field: String,
        operator: FilterOperator,
        value: Value,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn new(
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl ToQueryValue,
    ) -> Self {
        Predicate::Binary {
            field: field.into(),
            operator,
            value: value.to_query_value(),
        }
    }

    /// Build a leaf predicate from an operator token.
    pub fn binary(
        field: impl Into<String>,
        operator: &str,
        value: impl ToQueryValue,
    ) -> Result<Self, Error> {
        Ok(Self::new(field, FilterOperator::parse(operator)?, value))
    }

    pub fn and(operands: Vec<Predicate>) -> Self {
        Predicate::And(operands)
    }

    pub fn or(operands: Vec<Predicate>) -> Self {
        Predicate::Or(operands)
    }

    pub fn not(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }

    pub fn group(connective: Connective, operands: Vec<Predicate>) -> Self {
        match connective {
            Connective::And => Predicate::And(operands),
            Connective::Or => Predicate::Or(operands),
        }
    }

    /// Render as the body of an OData `$filter` option.
    pub fn to_odata(&self, version: ODataVersion) -> String {
        match self {
            Predicate::Binary {
                field,
                operator,
                value,
            } => {
                let path = odata_path(field);
                let literal = odata_literal(value);
                match (operator, version) {
                    (FilterOperator::Contains, ODataVersion::V2) => {
                        format!("substringof({},{}) eq true", literal, path)
                    }
                    (op, _) if op.is_function() => {
                        format!("{}({},{}) eq true", op.as_str(), path, literal)
                    }
                    (op, _) => format!("{} {} {}", path, op.as_str(), literal),
                }
            }
            Predicate::And(operands) => join_operands(operands, " and ", version),
            Predicate::Or(operands) => join_operands(operands, " or ", version),
            Predicate::Not(inner) => format!("not ({})", inner.to_odata(version)),
        }
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_odata(ODataVersion::default()))
    }
}

fn join_operands(operands: &[Predicate], separator: &str, version: ODataVersion) -> String {
    operands
        .iter()
        .map(|p| format!("({})", p.to_odata(version)))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Property paths use `.` in the API and `/` on the wire.
pub fn odata_path(field: &str) -> String {
    field.replace('.', "/")
}

pub fn odata_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

// Helper trait to convert types to query values
pub trait ToQueryValue {
    fn to_query_value(&self) -> Value;
}

impl ToQueryValue for Value {
    fn to_query_value(&self) -> Value {
        self.clone()
    }
}

impl ToQueryValue for &Value {
    fn to_query_value(&self) -> Value {
        (*self).clone()
    }
}

impl ToQueryValue for String {
    fn to_query_value(&self) -> Value {
        Value::String(self.clone())
    }
}

impl ToQueryValue for &str {
    fn to_query_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl ToQueryValue for i64 {
    fn to_query_value(&self) -> Value {
        Value::from(*self)
    }
}

impl ToQueryValue for i32 {
    fn to_query_value(&self) -> Value {
        Value::from(*self)
    }
}

impl ToQueryValue for u64 {
    fn to_query_value(&self) -> Value {
        Value::from(*self)
    }
}

impl ToQueryValue for f64 {
    fn to_query_value(&self) -> Value {
        Value::from(*self)
    }
}

impl ToQueryValue for bool {
    fn to_query_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl ToQueryValue for chrono::DateTime<chrono::Utc> {
    fn to_query_value(&self) -> Value {
        Value::String(self.to_rfc3339())
    }
}

impl ToQueryValue for uuid::Uuid {
    fn to_query_value(&self) -> Value {
        Value::String(self.to_string())
    }
}
