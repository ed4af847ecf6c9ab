//! Shared driver base: timed connection tests and SQL fragment builders.
//!
//! SQL drivers delegate WHERE/ORDER BY/LIMIT assembly here so pagination and
//! filtering behave identically across engines. Values are always emitted as
//! bind placeholders, never inlined into the statement text.

use std::time::Instant;

use serde::Serialize;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::DataEngine;
use crate::engine::types::{
    ConnectionConfig, DataOptions, Filter, FilterOp, SortDirection, SortSpec, Value,
};

/// Result of a timed connectivity test.
#[derive(Debug, Clone, Serialize)]
pub struct TestOutcome {
    pub latency_ms: f64,
}

/// Runs a driver's connection test and measures wall-clock latency.
///
/// The driver contract guarantees no handle survives the test, so there is
/// nothing to clean up here on either path.
pub async fn timed_test(
    driver: &dyn DataEngine,
    config: &ConnectionConfig,
) -> EngineResult<TestOutcome> {
    let started = Instant::now();
    driver.test_connection(config).await?;
    Ok(TestOutcome {
        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
    })
}

/// Identifier quoting and placeholder conventions per SQL engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    /// Double-quoted identifiers, `$1`-style placeholders.
    Postgres,
    /// Backtick identifiers, `?` placeholders.
    MySql,
    /// Double-quoted identifiers, `?` placeholders.
    Sqlite,
    /// Backtick identifiers, `?` placeholders (server-side substitution).
    ClickHouse,
}

impl SqlDialect {
    fn quote_char(&self) -> char {
        match self {
            SqlDialect::Postgres | SqlDialect::Sqlite => '"',
            SqlDialect::MySql | SqlDialect::ClickHouse => '`',
        }
    }

    /// Quotes an identifier, doubling any embedded quote character.
    pub fn quote_ident(&self, ident: &str) -> String {
        let q = self.quote_char();
        let mut out = String::with_capacity(ident.len() + 2);
        out.push(q);
        for c in ident.chars() {
            if c == q {
                out.push(q);
            }
            out.push(c);
        }
        out.push(q);
        out
    }

    /// Renders the placeholder for the `index`-th bound value (1-based).
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${index}"),
            _ => "?".to_string(),
        }
    }
}

/// A rendered SQL fragment plus the values to bind, in placeholder order.
#[derive(Debug, Clone, Default)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlFragment {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

fn expect_one_value(filter: &Filter) -> EngineResult<&Value> {
    filter.values.first().ok_or_else(|| {
        EngineError::configuration(format!(
            "filter on '{}' requires a value for {:?}",
            filter.column, filter.op
        ))
    })
}

/// Builds a WHERE clause from filters, composed with AND only.
///
/// Returns an empty fragment for an empty filter list. IN / NOT IN expand
/// one placeholder per element; an empty IN list is rejected as a
/// configuration error rather than silently matching nothing.
pub fn build_where(
    filters: &[Filter],
    dialect: SqlDialect,
    first_placeholder: usize,
) -> EngineResult<SqlFragment> {
    if filters.is_empty() {
        return Ok(SqlFragment::default());
    }

    let mut clauses = Vec::with_capacity(filters.len());
    let mut params = Vec::new();
    let mut index = first_placeholder;

    for filter in filters {
        let column = dialect.quote_ident(&filter.column);
        match filter.op {
            FilterOp::Eq | FilterOp::Ne | FilterOp::Gt | FilterOp::Gte | FilterOp::Lt
            | FilterOp::Lte | FilterOp::Like | FilterOp::NotLike => {
                let op = match filter.op {
                    FilterOp::Eq => "=",
                    FilterOp::Ne => "<>",
                    FilterOp::Gt => ">",
                    FilterOp::Gte => ">=",
                    FilterOp::Lt => "<",
                    FilterOp::Lte => "<=",
                    FilterOp::Like => "LIKE",
                    FilterOp::NotLike => "NOT LIKE",
                    _ => unreachable!(),
                };
                let value = expect_one_value(filter)?;
                clauses.push(format!("{column} {op} {}", dialect.placeholder(index)));
                params.push(value.clone());
                index += 1;
            }
            FilterOp::In | FilterOp::NotIn => {
                if filter.values.is_empty() {
                    return Err(EngineError::configuration(format!(
                        "IN filter on '{}' has no values",
                        filter.column
                    )));
                }
                let op = if filter.op == FilterOp::In { "IN" } else { "NOT IN" };
                let mut holes = Vec::with_capacity(filter.values.len());
                for value in &filter.values {
                    holes.push(dialect.placeholder(index));
                    params.push(value.clone());
                    index += 1;
                }
                clauses.push(format!("{column} {op} ({})", holes.join(", ")));
            }
            FilterOp::IsNull => clauses.push(format!("{column} IS NULL")),
            FilterOp::IsNotNull => clauses.push(format!("{column} IS NOT NULL")),
        }
    }

    Ok(SqlFragment {
        sql: format!("WHERE {}", clauses.join(" AND ")),
        params,
    })
}

/// Builds an ORDER BY clause; empty input renders nothing.
pub fn build_order_by(sorts: &[SortSpec], dialect: SqlDialect) -> String {
    if sorts.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = sorts
        .iter()
        .map(|s| {
            let dir = match s.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            format!("{} {dir}", dialect.quote_ident(&s.column))
        })
        .collect();
    format!("ORDER BY {}", terms.join(", "))
}

/// Builds a LIMIT/OFFSET clause. An offset without a limit still needs a
/// LIMIT on MySQL/SQLite, so a very large bound is substituted.
pub fn build_limit(limit: Option<u64>, offset: Option<u64>) -> String {
    match (limit, offset) {
        (Some(l), Some(o)) => format!("LIMIT {l} OFFSET {o}"),
        (Some(l), None) => format!("LIMIT {l}"),
        (None, Some(o)) => format!("LIMIT {} OFFSET {o}", i64::MAX),
        (None, None) => String::new(),
    }
}

/// Renders the SELECT statement `read_table` executes.
pub fn render_select(
    table_ref: &str,
    options: &DataOptions,
    dialect: SqlDialect,
) -> EngineResult<SqlFragment> {
    let where_clause = build_where(&options.filters, dialect, 1)?;
    let mut sql = format!("SELECT * FROM {table_ref}");

    if !where_clause.is_empty() {
        sql.push(' ');
        sql.push_str(&where_clause.sql);
    }
    let order = build_order_by(&options.sort, dialect);
    if !order.is_empty() {
        sql.push(' ');
        sql.push_str(&order);
    }
    let limit = build_limit(options.limit, options.offset);
    if !limit.is_empty() {
        sql.push(' ');
        sql.push_str(&limit);
    }

    Ok(SqlFragment {
        sql,
        params: where_clause.params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_doubles_embedded_quote_chars() {
        assert_eq!(SqlDialect::Postgres.quote_ident("weird\"name"), "\"weird\"\"name\"");
        assert_eq!(SqlDialect::MySql.quote_ident("weird`name"), "`weird``name`");
    }

    #[test]
    fn where_builder_parameterizes_every_value() {
        let filters = vec![
            Filter::new("age", FilterOp::Gte, Value::Int(18)),
            Filter::new("name", FilterOp::Like, Value::Text("%a%".into())),
        ];
        let fragment = build_where(&filters, SqlDialect::Postgres, 1).expect("build");

        assert_eq!(fragment.sql, "WHERE \"age\" >= $1 AND \"name\" LIKE $2");
        assert_eq!(fragment.params.len(), 2);
        // No literal values inlined into the SQL text.
        assert!(!fragment.sql.contains("18"));
        assert!(!fragment.sql.contains("%a%"));
    }

    #[test]
    fn in_filter_expands_placeholders_per_element() {
        let filters = vec![Filter::in_list(
            "id",
            vec![Value::Int(1), Value::Int(2), Value::Int(3)],
        )];
        let fragment = build_where(&filters, SqlDialect::MySql, 1).expect("build");
        assert_eq!(fragment.sql, "WHERE `id` IN (?, ?, ?)");
        assert_eq!(fragment.params.len(), 3);
    }

    #[test]
    fn empty_in_list_is_rejected() {
        let filters = vec![Filter::in_list("id", vec![])];
        assert!(build_where(&filters, SqlDialect::Sqlite, 1).is_err());
    }

    #[test]
    fn null_filters_take_no_parameters() {
        let filters = vec![Filter::is_null("deleted_at"), Filter::is_not_null("id")];
        let fragment = build_where(&filters, SqlDialect::Postgres, 1).expect("build");
        assert_eq!(
            fragment.sql,
            "WHERE \"deleted_at\" IS NULL AND \"id\" IS NOT NULL"
        );
        assert!(fragment.params.is_empty());
    }

    #[test]
    fn empty_filters_render_nothing() {
        let fragment = build_where(&[], SqlDialect::Postgres, 1).expect("build");
        assert!(fragment.is_empty());
        assert!(fragment.params.is_empty());
    }

    #[test]
    fn order_by_quotes_columns_and_keeps_direction() {
        let sorts = vec![
            SortSpec { column: "created_at".into(), direction: SortDirection::Desc },
            SortSpec { column: "id".into(), direction: SortDirection::Asc },
        ];
        assert_eq!(
            build_order_by(&sorts, SqlDialect::Postgres),
            "ORDER BY \"created_at\" DESC, \"id\" ASC"
        );
    }

    #[test]
    fn limit_offset_combinations() {
        assert_eq!(build_limit(Some(50), Some(100)), "LIMIT 50 OFFSET 100");
        assert_eq!(build_limit(Some(50), None), "LIMIT 50");
        assert_eq!(build_limit(None, None), "");
    }

    #[test]
    fn render_select_composes_all_clauses() {
        let options = DataOptions {
            filters: vec![Filter::new("active", FilterOp::Eq, Value::Bool(true))],
            sort: vec![SortSpec { column: "id".into(), direction: SortDirection::Asc }],
            limit: Some(10),
            offset: Some(20),
        };
        let fragment =
            render_select("\"public\".\"users\"", &options, SqlDialect::Postgres).expect("render");
        assert_eq!(
            fragment.sql,
            "SELECT * FROM \"public\".\"users\" WHERE \"active\" = $1 ORDER BY \"id\" ASC LIMIT 10 OFFSET 20"
        );
        assert_eq!(fragment.params.len(), 1);
    }
}
