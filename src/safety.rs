//! Read-only guard for SQL query bodies.
//!
//! Uses sqlparser-rs with the PostgreSQL dialect to accept only statements
//! that cannot modify data: plain queries (including CTEs, set operations and
//! derived tables) and non-analyzing `EXPLAIN`.

use sqlparser::ast::{Query, Select, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::{HarnessError, Result};

/// Returns Ok if `sql` is a single read-only statement.
pub fn ensure_read_only(sql: &str) -> Result<()> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| HarnessError::query(format!("SQL parse error: {e}")))?;

    if statements.is_empty() {
        return Err(HarnessError::query("Empty SQL statement"));
    }
    // The driver prepares the body as one statement.
    if statements.len() > 1 {
        return Err(HarnessError::query(format!(
            "Only one SQL statement per query is allowed, got {}",
            statements.len()
        )));
    }

    let statement = &statements[0];
    if statement_is_read_only(statement) {
        Ok(())
    } else {
        let text = statement.to_string();
        let head: String = text.chars().take(60).collect();
        Err(HarnessError::query(format!(
            "Only read-only statements are allowed, refusing: {head}"
        )))
    }
}

fn statement_is_read_only(statement: &Statement) -> bool {
    match statement {
        Statement::Query(query) => query_is_read_only(query),
        // EXPLAIN ANALYZE executes the statement
        Statement::Explain {
            analyze, statement, ..
        } => !*analyze || statement_is_read_only(statement),
        _ => false,
    }
}

fn query_is_read_only(query: &Query) -> bool {
    if !query.locks.is_empty() {
        return false;
    }
    if let Some(with) = &query.with {
        if !with.cte_tables.iter().all(|cte| query_is_read_only(&cte.query)) {
            return false;
        }
    }
    set_expr_is_read_only(&query.body)
}

fn set_expr_is_read_only(set_expr: &SetExpr) -> bool {
    match set_expr {
        SetExpr::Select(select) => select_is_read_only(select),
        SetExpr::Query(query) => query_is_read_only(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_is_read_only(left) && set_expr_is_read_only(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => true,
        // Insert, Update and other data-modifying bodies
        _ => false,
    }
}

fn select_is_read_only(select: &Select) -> bool {
    select.into.is_none() && select.from.iter().all(table_with_joins_is_read_only)
}

fn table_with_joins_is_read_only(twj: &TableWithJoins) -> bool {
    table_factor_is_read_only(&twj.relation)
        && twj
            .joins
            .iter()
            .all(|join| table_factor_is_read_only(&join.relation))
}

fn table_factor_is_read_only(factor: &TableFactor) -> bool {
    match factor {
        TableFactor::Derived { subquery, .. } => query_is_read_only(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => table_with_joins_is_read_only(table_with_joins),
        _ => true,
    }
}
