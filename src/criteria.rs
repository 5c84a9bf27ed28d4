//! Criteria grammar and its compiler.
//!
//! Filters arrive as nested JSON arrays:
//!
//! - a leaf is `[field, operator, value]` or `[field, value]` (operator `=`)
//! - a group is an array whose first element is itself an array; its
//!   elements alternate between sub-criteria and connective tokens
//!   (`"and"`, `"&"`, `"or"`)
//! - a negation is `["!", criterion]` or `["not", criterion]`
//!
//! ```rust,ignore
//! let predicate = compile_criteria(&json!([
//!     [["a", "<>", 1], "or", ["b", 2]],
//!     "and",
//!     ["!", ["c", "contains", "x"]]
//! ]))?;
//! ```
//!
//! Parsing produces a [`Criterion`] tree which [`Criterion::compile`] turns
//! into a native [`Predicate`]. Every failure surfaces here, before any
//! request is issued.

use serde_json::Value;

use crate::{
    error::Error,
    query::{Connective, Predicate, ToQueryValue},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    Leaf {
        field: String,
        operator: String,
        value: Value,
    },
    Group(Vec<GroupItem>),
    Not(Box<Criterion>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupItem {
    Operand(Criterion),
    Connective(Connective),
}

impl Criterion {
    pub fn leaf(field: impl Into<String>, operator: &str, value: impl ToQueryValue) -> Self {
        Criterion::Leaf {
            field: field.into(),
            operator: operator.to_string(),
            value: value.to_query_value(),
        }
    }

    pub fn not(criterion: Criterion) -> Self {
        Criterion::Not(Box::new(criterion))
    }

    /// Parse the array form of a criterion.
    pub fn parse(criteria: &Value) -> Result<Self, Error> {
        let items = criteria.as_array().ok_or_else(|| {
            Error::InvalidCriterionShape(format!("expected an array, got {}", criteria))
        })?;

        if let Some(negated) = negated_operand(items) {
            return Ok(Criterion::not(Criterion::parse(negated)?));
        }

        match items.first() {
            Some(Value::Array(_)) => parse_group(items),
            _ => parse_leaf(items),
        }
    }

    pub fn compile(&self) -> Result<Predicate, Error> {
        match self {
            Criterion::Leaf {
                field,
                operator,
                value,
            } => compile_binary(field, operator, value),
            Criterion::Group(items) => compile_group(items),
            Criterion::Not(inner) => Ok(Predicate::not(inner.compile()?)),
        }
    }
}

impl TryFrom<&Value> for Criterion {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        Criterion::parse(value)
    }
}

/// Parse and compile in one step.
pub fn compile_criteria(criteria: &Value) -> Result<Predicate, Error> {
    Criterion::parse(criteria)?.compile()
}

fn is_negation_token(token: &str) -> bool {
    token == "!" || token.eq_ignore_ascii_case("not")
}

fn negated_operand(items: &[Value]) -> Option<&Value> {
    match items {
        [Value::String(token), operand @ Value::Array(_)] if is_negation_token(token) => {
            Some(operand)
        }
        _ => None,
    }
}

fn parse_leaf(items: &[Value]) -> Result<Criterion, Error> {
    if items.len() < 2 {
        return Err(Error::InvalidCriterionShape(format!(
            "a comparison needs at least a field and a value, got {} element(s)",
            items.len()
        )));
    }

    let field = items[0].as_str().ok_or_else(|| {
        Error::InvalidCriterionShape(format!("field must be a string, got {}", items[0]))
    })?;

    // [field, value] is shorthand for [field, "=", value]
    let (operator, value) = if items.len() == 2 {
        ("=", &items[1])
    } else {
        let operator = items[1].as_str().ok_or_else(|| {
            Error::InvalidCriterionShape(format!("operator must be a string, got {}", items[1]))
        })?;
        (operator, &items[2])
    };

    Ok(Criterion::leaf(field, operator, value))
}

fn parse_group(items: &[Value]) -> Result<Criterion, Error> {
    items
        .iter()
        .map(|item| match item {
            Value::Array(_) => Criterion::parse(item).map(GroupItem::Operand),
            Value::String(token) => Ok(GroupItem::Connective(Connective::from_token(token))),
            other => Err(Error::InvalidCriterionShape(format!(
                "unexpected group element {}",
                other
            ))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Criterion::Group)
}

fn translate_operator(operator: &str) -> &str {
    match operator {
        "=" => "eq",
        "<>" => "ne",
        other => other,
    }
}

fn compile_binary(field: &str, operator: &str, value: &Value) -> Result<Predicate, Error> {
    let operator = operator.to_lowercase();
    let negate = operator == "notcontains";
    let operator = if negate { "contains" } else { operator.as_str() };

    let predicate = Predicate::binary(field, translate_operator(operator), value)?;

    Ok(if negate {
        Predicate::not(predicate)
    } else {
        predicate
    })
}

fn compile_group(items: &[GroupItem]) -> Result<Predicate, Error> {
    let mut operands = Vec::new();
    let mut group_connective: Option<Connective> = None;
    let mut next_connective: Option<Connective> = None;

    for item in items {
        match item {
            GroupItem::Operand(criterion) => {
                if operands.len() > 1 && next_connective != group_connective {
                    return Err(Error::MixedConnective);
                }
                group_connective = next_connective;
                operands.push(criterion.compile()?);
                // adjacent operands without a token are conjoined
                next_connective = Some(Connective::And);
            }
            GroupItem::Connective(connective) => next_connective = Some(*connective),
        }
    }

    match operands.len() {
        0 => Err(Error::InvalidCriterionShape("empty group".to_string())),
        1 => Ok(operands.remove(0)),
        _ => Ok(Predicate::group(
            group_connective.unwrap_or_default(),
            operands,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FilterOperator, ODataVersion};
    use serde_json::json;

    fn compile(criteria: Value) -> Result<String, Error> {
        compile_criteria(&criteria).map(|p| p.to_odata(ODataVersion::V4))
    }

    #[test]
    fn test_simple_filter() {
        assert_eq!(compile(json!(["name", "John"])).unwrap(), "name eq 'John'");
        assert_eq!(compile(json!(["a", "<>", 1])).unwrap(), "a ne 1");
        assert_eq!(compile(json!(["a", ">=", 1])).unwrap(), "a ge 1");
    }

    #[test]
    fn test_complex_filter() {
        let criteria = json!([
            [
                ["a", "<>", 1],
                "or",
                [["b", 1], ["c", ">", 1]],
                "or",
                ["c", "<", 1],
                "or",
                ["c", 1]
            ],
            "and",
            ["d", 1]
        ]);
        assert_eq!(
            compile(criteria).unwrap(),
            "((a ne 1) or ((b eq 1) and (c gt 1)) or (c lt 1) or (c eq 1)) and (d eq 1)"
        );
    }

    #[test]
    fn test_all_filter_operations() {
        let criteria = json!([
            ["a", "=", "foo"],
            ["a", ">", "foo"],
            ["a", "<", "foo"],
            ["a", "<>", "foo"],
            ["a", ">=", "foo"],
            ["a", "<=", "foo"],
            ["a", "endswith", "x"],
            ["a", "startswith", "x"],
            ["a", "contains", "x"],
            ["a", "notcontains", "x"]
        ]);
        let predicate = compile_criteria(&criteria).unwrap();
        assert_eq!(
            predicate.to_odata(ODataVersion::V2),
            "(a eq 'foo') and (a gt 'foo') and (a lt 'foo') and (a ne 'foo') and (a ge 'foo') \
             and (a le 'foo') and (endswith(a,'x') eq true) and (startswith(a,'x') eq true) \
             and (substringof('x',a) eq true) and (not (substringof('x',a) eq true))"
        );
    }

    #[test]
    fn test_notcontains_is_negated_contains() {
        let predicate = compile_criteria(&json!(["a", "NotContains", "x"])).unwrap();
        assert_eq!(
            predicate,
            Predicate::not(Predicate::new("a", FilterOperator::Contains, "x"))
        );
        assert_eq!(predicate.to_string(), "not (contains(a,'x') eq true)");
    }

    #[test]
    fn test_negation() {
        assert_eq!(compile(json!(["!", ["a", "<>", 1]])).unwrap(), "not (a ne 1)");
        assert_eq!(
            compile(json!(["not", [["a", 1], "or", ["b", 2]]])).unwrap(),
            "not ((a eq 1) or (b eq 2))"
        );
    }

    #[test]
    fn test_single_operand_group_is_transparent() {
        assert_eq!(compile(json!([["a", 1]])).unwrap(), "a eq 1");
        assert_eq!(compile(json!([[["a", 1]]])).unwrap(), "a eq 1");
    }

    #[test]
    fn test_mixing_connectives_fails() {
        let cases = [
            json!([["a", "foo"], "and", ["a", "<", "bar"], "or", ["a", ">", "foobar"]]),
            json!([["a", "foo"], ["a", "<", "bar"], "or", ["a", ">", "foobar"]]),
            json!([["a", "foo"], "or", ["a", "<", "bar"], ["a", ">", "foobar"]]),
        ];
        for criteria in cases {
            assert_eq!(compile(criteria), Err(Error::MixedConnective));
        }
    }

    #[test]
    fn test_ampersand_and_case_insensitive_tokens() {
        assert_eq!(
            compile(json!([["a", 1], "&", ["b", 2], "AND", ["c", 3]])).unwrap(),
            "(a eq 1) and (b eq 2) and (c eq 3)"
        );
        assert_eq!(
            compile(json!([["a", 1], "OR", ["b", 2]])).unwrap(),
            "(a eq 1) or (b eq 2)"
        );
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(matches!(
            compile(json!(["a"])),
            Err(Error::InvalidCriterionShape(_))
        ));
        assert!(matches!(compile(json!([])), Err(Error::InvalidCriterionShape(_))));
        assert!(matches!(
            compile(json!("a")),
            Err(Error::InvalidCriterionShape(_))
        ));
        assert!(matches!(
            compile(json!([1, "=", 2])),
            Err(Error::InvalidCriterionShape(_))
        ));
        assert!(matches!(
            compile(json!([["a", 1], 5, ["b", 1]])),
            Err(Error::InvalidCriterionShape(_))
        ));
        assert_eq!(
            compile(json!(["a", "between", 1])),
            Err(Error::InvalidOperator("between".to_string()))
        );
    }

    #[test]
    fn test_typed_criterion() {
        let criterion = Criterion::Group(vec![
            GroupItem::Operand(Criterion::leaf("a", "=", 1)),
            GroupItem::Connective(Connective::Or),
            GroupItem::Operand(Criterion::not(Criterion::leaf("b", "startswith", "x"))),
        ]);
        assert_eq!(
            criterion.compile().unwrap().to_string(),
            "(a eq 1) or (not (startswith(b,'x') eq true))"
        );

        let criteria = json!([["a", 1], "or", ["!", ["b", "startswith", "x"]]]);
        let parsed = Criterion::try_from(&criteria);
        assert_eq!(parsed, Ok(criterion));
    }
}
