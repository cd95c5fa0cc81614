//! Category filter expressions.
//!
//! A request may narrow a feed page to entries carrying certain categories.
//! Two surface forms are accepted:
//!
//! - **Additive**: `+Cat1+Cat2`, every listed category must be present.
//! - **Prefix**: `(AND(cat=a)(cat=b))`, `(OR(cat=a)(cat=b))`,
//!   `(NOT(cat=a))`, nested freely.
//!
//! Both compile to the same [`CategoryFilter`] tree, with category values
//! lower-cased. The tree is then rendered for a particular store: SQL for
//! the SQLite store ([`CategoryFilter::to_sql`]), or evaluated directly
//! ([`CategoryFilter::matches`]).

mod parser;
mod sql;

use std::fmt;
use thiserror::Error;

pub use sql::SqlFilter;

/// Longest expression accepted, in bytes.
pub const MAX_EXPRESSION_LENGTH: usize = 1024;
/// Deepest nesting of `AND`/`OR`/`NOT` nodes accepted.
pub const MAX_NESTING_DEPTH: usize = 16;
/// Most category terms a single expression may contain.
pub const MAX_TERMS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid category expression at offset {offset}: {message}")]
pub struct FilterParseError {
    pub message: String,
    pub offset: usize,
}

impl FilterParseError {
    pub(crate) fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// Compiled category predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryFilter {
    And(Vec<CategoryFilter>),
    Or(Vec<CategoryFilter>),
    Not(Box<CategoryFilter>),
    /// The entry carries this (lower-cased) category.
    Equals(String),
}

/// Compile a category expression.
///
/// Returns `Ok(None)` for an absent, empty or whitespace-only expression,
/// meaning "match every entry".
pub fn compile(expression: &str) -> Result<Option<CategoryFilter>, FilterParseError> {
    if expression.trim().is_empty() {
        return Ok(None);
    }
    if expression.len() > MAX_EXPRESSION_LENGTH {
        return Err(FilterParseError::new(
            format!("expression exceeds {MAX_EXPRESSION_LENGTH} bytes"),
            MAX_EXPRESSION_LENGTH,
        ));
    }
    parser::parse(expression).map(Some)
}

impl CategoryFilter {
    /// Evaluate the predicate against an entry's categories.
    pub fn matches(&self, categories: &[String]) -> bool {
        match self {
            CategoryFilter::And(children) => children.iter().all(|c| c.matches(categories)),
            CategoryFilter::Or(children) => children.iter().any(|c| c.matches(categories)),
            CategoryFilter::Not(inner) => !inner.matches(categories),
            CategoryFilter::Equals(term) => categories
                .iter()
                .any(|category| category.to_lowercase() == *term),
        }
    }

    /// Number of equality terms in the tree.
    pub fn term_count(&self) -> usize {
        match self {
            CategoryFilter::And(children) | CategoryFilter::Or(children) => {
                children.iter().map(CategoryFilter::term_count).sum()
            }
            CategoryFilter::Not(inner) => inner.term_count(),
            CategoryFilter::Equals(_) => 1,
        }
    }
}

/// Canonical prefix form, e.g. `(AND(cat=cat1)(cat=cat2))`.
impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryFilter::And(children) => {
                write!(f, "(AND")?;
                for child in children {
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            CategoryFilter::Or(children) => {
                write!(f, "(OR")?;
                for child in children {
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            CategoryFilter::Not(inner) => write!(f, "(NOT{inner})"),
            CategoryFilter::Equals(term) => write!(f, "(cat={term})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn cats(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_empty_expression_matches_all() {
        assert_eq!(compile("").unwrap(), None);
        assert_eq!(compile("   ").unwrap(), None);
    }

    #[test]
    fn test_single_additive_term() {
        let filter = compile("+Cat1").unwrap().unwrap();
        assert_eq!(filter, CategoryFilter::Equals("cat1".to_string()));
        assert_eq!(filter.to_string(), "(cat=cat1)");
    }

    #[test]
    fn test_multi_additive_terms_compile_to_and() {
        let filter = compile("+Cat1+Cat2").unwrap().unwrap();
        assert_eq!(filter.to_string(), "(AND(cat=cat1)(cat=cat2))");
    }

    #[test]
    fn test_prefix_forms_round_trip() {
        for (input, expected) in [
            ("(AND(cat=cat1)(cat=cat2))", "(AND(cat=cat1)(cat=cat2))"),
            ("(OR(cat=cat1)(cat=cat2))", "(OR(cat=cat1)(cat=cat2))"),
            ("(NOT(cat=CAT1))", "(NOT(cat=cat1))"),
            (
                "(or (and(cat=a)(cat=b)) (not(cat=c)))",
                "(OR(AND(cat=a)(cat=b))(NOT(cat=c)))",
            ),
        ] {
            let filter = compile(input).unwrap().unwrap();
            assert_eq!(filter.to_string(), expected, "input: {input}");
        }
    }

    #[test]
    fn test_matches_is_case_insensitive() {
        let filter = compile("+Cat1+Cat2").unwrap().unwrap();
        assert!(filter.matches(&cats(&["CAT1", "cat2", "other"])));
        assert!(!filter.matches(&cats(&["cat1"])));
        assert!(!filter.matches(&[]));
    }

    #[test]
    fn test_matches_or_and_not() {
        let or = compile("(OR(cat=a)(cat=b))").unwrap().unwrap();
        assert!(or.matches(&cats(&["b"])));
        assert!(!or.matches(&cats(&["c"])));

        let not = compile("(NOT(cat=a))").unwrap().unwrap();
        assert!(not.matches(&cats(&["b"])));
        assert!(not.matches(&[]));
        assert!(!not.matches(&cats(&["A"])));
    }

    #[test]
    fn test_prefixed_terms_match_whole_categories() {
        let filter = compile("+tid:1234").unwrap().unwrap();
        assert!(filter.matches(&cats(&["TID:1234"])));
        assert!(!filter.matches(&cats(&["1234"])));
        assert!(!filter.matches(&cats(&["tid:5678"])));
    }

    #[test]
    fn test_term_count() {
        let filter = compile("(OR(AND(cat=a)(cat=b))(NOT(cat=c)))").unwrap().unwrap();
        assert_eq!(filter.term_count(), 3);
    }

    #[test]
    fn test_expression_length_limit() {
        let long = format!("+{}", "a".repeat(MAX_EXPRESSION_LENGTH));
        let err = compile(&long).unwrap_err();
        assert!(err.message.contains("exceeds"));
    }

    proptest! {
        #[test]
        fn prop_additive_expression_is_and_of_lowercased_terms(
            terms in proptest::collection::vec("[A-Za-z][A-Za-z0-9_]{0,8}", 2..8)
        ) {
            let expression: String = terms.iter().map(|t| format!("+{t}")).collect();
            let filter = compile(&expression).unwrap().unwrap();
            let expected = CategoryFilter::And(
                terms.iter().map(|t| CategoryFilter::Equals(t.to_lowercase())).collect(),
            );
            prop_assert_eq!(filter, expected);
        }
    }
}
