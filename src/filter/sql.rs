use sqlx::{QueryBuilder, Sqlite};

use super::CategoryFilter;
use crate::config::StorageLayout;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SqlPart {
    Text(String),
    Bind(String),
}

/// A category filter rendered as a SQL boolean clause over the `entries`
/// table aliased as `e`, with its bind values kept separate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlFilter {
    parts: Vec<SqlPart>,
}

impl SqlFilter {
    /// The clause text with `?` placeholders.
    pub fn clause(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                SqlPart::Text(text) => text.as_str(),
                SqlPart::Bind(_) => "?",
            })
            .collect()
    }

    /// Bind values in placeholder order.
    pub fn binds(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                SqlPart::Bind(value) => Some(value.as_str()),
                SqlPart::Text(_) => None,
            })
            .collect()
    }

    pub(crate) fn push_to(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        for part in &self.parts {
            match part {
                SqlPart::Text(text) => {
                    builder.push(text);
                }
                SqlPart::Bind(value) => {
                    builder.push_bind(value.clone());
                }
            }
        }
    }

    fn text(&mut self, text: impl Into<String>) {
        self.parts.push(SqlPart::Text(text.into()));
    }

    fn bind(&mut self, value: impl Into<String>) {
        self.parts.push(SqlPart::Bind(value.into()));
    }
}

impl CategoryFilter {
    /// Render for the SQLite entry store.
    ///
    /// Terms whose prefix is mapped to a column compare that column against
    /// the term's value; all other terms test membership in
    /// `entry_categories`. Column equality uses `IS` so a missing value
    /// reads as "not equal" rather than NULL under `NOT`.
    pub fn to_sql(&self, layout: &StorageLayout) -> SqlFilter {
        let mut out = SqlFilter::default();
        self.write_sql(layout, &mut out);
        out
    }

    fn write_sql(&self, layout: &StorageLayout, out: &mut SqlFilter) {
        match self {
            CategoryFilter::And(children) => write_joined(children, " AND ", layout, out),
            CategoryFilter::Or(children) => write_joined(children, " OR ", layout, out),
            CategoryFilter::Not(inner) => {
                out.text("NOT (");
                inner.write_sql(layout, out);
                out.text(")");
            }
            CategoryFilter::Equals(term) => match layout.split(term) {
                Some((column, value)) => {
                    out.text(format!("e.\"{column}\" IS "));
                    out.bind(value);
                }
                None => {
                    out.text(
                        "EXISTS (SELECT 1 FROM entry_categories c \
                         WHERE c.entry_pk = e.id AND c.term_lc = ",
                    );
                    out.bind(term.as_str());
                    out.text(")");
                }
            },
        }
    }
}

fn write_joined(
    children: &[CategoryFilter],
    separator: &str,
    layout: &StorageLayout,
    out: &mut SqlFilter,
) {
    out.text("(");
    for (idx, child) in children.iter().enumerate() {
        if idx > 0 {
            out.text(separator);
        }
        child.write_sql(layout, out);
    }
    out.text(")");
}
