use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::errors::Result;
use crate::schema::PropertyKey;
use crate::value::Value;

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cmp {
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    /// Text containment.
    Contains,
    /// Text prefix.
    Prefix,
}

impl Cmp {
    /// Applies the operator with `value` on the left and `condition` on the right.
    pub fn test(self, value: &Value, condition: &Value) -> bool {
        match self {
            Cmp::Equal => value == condition,
            Cmp::NotEqual => value != condition,
            Cmp::LessThan => value.partial_compare(condition) == Some(Ordering::Less),
            Cmp::LessThanEqual => matches!(
                value.partial_compare(condition),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Cmp::GreaterThan => value.partial_compare(condition) == Some(Ordering::Greater),
            Cmp::GreaterThanEqual => matches!(
                value.partial_compare(condition),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Cmp::Contains => match (value.as_text(), condition.as_text()) {
                (Some(v), Some(c)) => v.contains(c),
                _ => false,
            },
            Cmp::Prefix => match (value.as_text(), condition.as_text()) {
                (Some(v), Some(c)) => v.starts_with(c),
                _ => false,
            },
        }
    }

    /// Whether an element with several values satisfies the predicate.
    /// `NotEqual` requires that no value is equal; every other operator
    /// requires one matching value.
    pub fn test_any<'a>(self, mut values: impl Iterator<Item = &'a Value>, condition: &Value) -> bool {
        match self {
            Cmp::NotEqual => values.all(|v| v != condition),
            _ => values.any(|v| self.test(v, condition)),
        }
    }
}

impl fmt::Display for Cmp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cmp::Equal => "=",
            Cmp::NotEqual => "<>",
            Cmp::LessThan => "<",
            Cmp::LessThanEqual => "<=",
            Cmp::GreaterThan => ">",
            Cmp::GreaterThanEqual => ">=",
            Cmp::Contains => "contains",
            Cmp::Prefix => "prefix",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct Predicate {
    pub key: Arc<PropertyKey>,
    pub cmp: Cmp,
    pub value: Value,
}

impl Predicate {
    pub fn new(key: Arc<PropertyKey>, cmp: Cmp, value: Value) -> Self {
        Self { key, cmp, value }
    }

    pub fn is_equality(&self) -> bool {
        self.cmp == Cmp::Equal
    }
}

/// Condition tree of a graph-centric query, in conjunctive normal form at
/// the top level: an `And` of clauses, each a predicate or an `Or` of them.
#[derive(Debug, Clone)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Predicate(Predicate),
}

impl Condition {
    /// The condition every element satisfies.
    pub fn all() -> Self {
        Condition::And(Vec::new())
    }

    pub fn is_unconstrained(&self) -> bool {
        matches!(self, Condition::And(children) if children.is_empty())
    }

    /// Top-level conjuncts.
    pub fn clauses(&self) -> &[Condition] {
        match self {
            Condition::And(children) => children,
            other => std::slice::from_ref(other),
        }
    }

    /// The predicate when the condition is exactly one equality test.
    pub fn single_equality(&self) -> Option<&Predicate> {
        match self.clauses() {
            [Condition::Predicate(p)] if p.is_equality() => Some(p),
            _ => None,
        }
    }

    /// Every key referenced anywhere in the tree, each once.
    pub fn keys(&self) -> Vec<Arc<PropertyKey>> {
        let mut keys: Vec<Arc<PropertyKey>> = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys(&self, keys: &mut Vec<Arc<PropertyKey>>) {
        match self {
            Condition::And(children) | Condition::Or(children) => {
                children.iter().for_each(|c| c.collect_keys(keys))
            }
            Condition::Not(child) => child.collect_keys(keys),
            Condition::Predicate(p) => {
                if !keys.iter().any(|k| k.id() == p.key.id()) {
                    keys.push(Arc::clone(&p.key));
                }
            }
        }
    }

    /// Evaluates the tree, answering each predicate with `leaf`.
    pub fn evaluate(&self, leaf: &mut dyn FnMut(&Predicate) -> Result<bool>) -> Result<bool> {
        match self {
            Condition::And(children) => {
                for child in children {
                    if !child.evaluate(leaf)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Or(children) => {
                for child in children {
                    if child.evaluate(leaf)? {
                        return Ok(true);
                    }
                }
                Ok(children.is_empty())
            }
            Condition::Not(child) => Ok(!child.evaluate(leaf)?),
            Condition::Predicate(p) => leaf(p),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, children: &[Condition], op: &str| -> fmt::Result {
            f.write_str("(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", op)?;
                }
                write!(f, "{}", child)?;
            }
            f.write_str(")")
        };
        match self {
            Condition::And(children) if children.is_empty() => f.write_str("true"),
            Condition::And(children) => join(f, children, "AND"),
            Condition::Or(children) => join(f, children, "OR"),
            Condition::Not(child) => write!(f, "NOT {}", child),
            Condition::Predicate(p) => write!(f, "{} {} {}", p.key.name(), p.cmp, p.value),
        }
    }
}
