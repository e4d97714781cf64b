//! MATCH expression escaping and SQL construction for index queries.
//!
//! Supports the three FTS generations. FTS3/FTS4 restrict the match to the
//! `textContents` column and rank through `rank(matchinfo(..))`; FTS5 tables
//! only index `textContents`, so a table-level MATCH is used and relevance comes
//! from the built-in `bm25()`.

use rusqlite::ToSql;

use crate::error::{Result, SearchKitError};
use crate::model::types::{ITEM_TYPE_IGNORE, ItemType};
use crate::search::rank::RANK_FUNCTION_NAME;
use crate::storage::sqlite::{COLUMN_COUNT, EngineGeneration, TableInfo};

/// Result ordering of a searcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderMode {
    /// Whatever order the storage engine yields matches in.
    #[default]
    Natural,
    /// Most relevant first.
    Relevance,
}

/// How search text is turned into a MATCH expression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryMode {
    /// Every whitespace-separated term is quoted and matched as a whole
    /// token; terms are ANDed. A trailing `*` is dropped, so no engine
    /// treats the term as a prefix.
    #[default]
    Terms,
    /// The text is passed through as an FTS query expression.
    Raw,
}

impl std::str::FromStr for OrderMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "natural" | "default" => Ok(OrderMode::Natural),
            "relevance" | "rank" => Ok(OrderMode::Relevance),
            other => Err(format!("unknown order mode: {other}")),
        }
    }
}

impl std::str::FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terms" => Ok(QueryMode::Terms),
            "raw" => Ok(QueryMode::Raw),
            other => Err(format!("unknown query mode: {other}")),
        }
    }
}

/// Escape a query string for safe use with MATCH.
///
/// Wraps each term in double-quotes, doubling any internal double-quotes.
/// Trailing `*` is stripped: FTS3/FTS4 honour it as a prefix marker even inside
/// quotes while FTS5 does not.
///
/// # Examples
///
/// ```
/// use fts_searchkit::search::fts::escape_match_query;
///
/// assert_eq!(escape_match_query("hello world"), r#""hello" "world""#);
/// assert_eq!(escape_match_query("foo\"bar"), r#""foo""bar""#);
/// ```
pub fn escape_match_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|t| t.trim_end_matches('*'))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Validate that a query is non-empty.
///
/// Returns `None` if the query is empty or contains only whitespace.
pub fn validate_match_query(query: &str) -> Option<String> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Build the MATCH argument for `text`.
pub fn match_expression(text: &str, mode: QueryMode) -> Result<String> {
    let cleaned = validate_match_query(text)
        .ok_or_else(|| SearchKitError::Query("search text is empty".into()))?;
    let expr = match mode {
        QueryMode::Terms => escape_match_query(&cleaned),
        QueryMode::Raw => cleaned,
    };
    if expr.is_empty() {
        return Err(SearchKitError::Query("search text has no terms".into()));
    }
    Ok(expr)
}

/// Everything needed to build one search statement.
#[derive(Debug, Clone)]
pub struct QueryPlan<'a> {
    pub text: &'a str,
    pub item_type: ItemType,
    /// Applied only when >= 1.
    pub offset: usize,
    /// Applied only when >= 1.
    pub limit: usize,
    pub order: OrderMode,
    pub query_mode: QueryMode,
    pub weights: &'a [f64],
}

/// A statement with its positional parameters.
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Box<dyn ToSql + Send>>,
}

impl std::fmt::Debug for BuiltQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltQuery")
            .field("sql", &self.sql)
            .field("params", &self.params.len())
            .finish()
    }
}

impl BuiltQuery {
    pub fn param_refs(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p.as_ref() as &dyn ToSql).collect()
    }
}

fn match_clause(table: &TableInfo) -> String {
    match table.engine {
        EngineGeneration::Fts3 | EngineGeneration::Fts4 => "textContents MATCH ?".to_string(),
        EngineGeneration::Fts5 => format!("\"{}\" MATCH ?", table.name),
    }
}

fn where_clause(
    table: &TableInfo,
    text: &str,
    item_type: ItemType,
    mode: QueryMode,
    params: &mut Vec<Box<dyn ToSql + Send>>,
) -> Result<String> {
    let mut sql = format!(" WHERE {}", match_clause(table));
    params.push(Box::new(match_expression(text, mode)?));
    if item_type != ITEM_TYPE_IGNORE {
        sql.push_str(" AND itemType = ?");
        params.push(Box::new(item_type));
    }
    Ok(sql)
}

/// Check the weights against the table layout.
pub fn validate_weights(weights: &[f64]) -> Result<()> {
    if weights.len() != COLUMN_COUNT {
        return Err(SearchKitError::Query(format!(
            "expected {COLUMN_COUNT} column weights, got {}",
            weights.len()
        )));
    }
    if weights.iter().any(|w| !w.is_finite()) {
        return Err(SearchKitError::Query("column weights must be finite".into()));
    }
    Ok(())
}

/// Build the row query for `plan`.
///
/// ```sql
/// SELECT identifier, textContents, itemType, meta
/// FROM "docs"
/// WHERE textContents MATCH ?
///     AND itemType = ?
/// ORDER BY rank(matchinfo("docs"), ?, ?, ?, ?) DESC
/// LIMIT ? OFFSET ?
/// ```
pub fn build_search_sql(table: &TableInfo, plan: &QueryPlan<'_>) -> Result<BuiltQuery> {
    let mut params: Vec<Box<dyn ToSql + Send>> = Vec::new();
    let mut sql = format!(
        "SELECT identifier, textContents, itemType, meta FROM \"{}\"",
        table.name
    );
    sql.push_str(&where_clause(
        table,
        plan.text,
        plan.item_type,
        plan.query_mode,
        &mut params,
    )?);

    if plan.order == OrderMode::Relevance {
        validate_weights(plan.weights)?;
        let placeholders = vec!["?"; plan.weights.len()].join(", ");
        match table.engine {
            EngineGeneration::Fts3 | EngineGeneration::Fts4 => sql.push_str(&format!(
                " ORDER BY {RANK_FUNCTION_NAME}(matchinfo(\"{}\"), {placeholders}) DESC",
                table.name
            )),
            EngineGeneration::Fts5 => sql.push_str(&format!(
                " ORDER BY bm25(\"{}\", {placeholders})",
                table.name
            )),
        }
        for w in plan.weights {
            params.push(Box::new(*w));
        }
    }

    match (plan.limit, plan.offset) {
        (0, 0) => {}
        (limit, 0) => {
            sql.push_str(" LIMIT ?");
            params.push(Box::new(sql_count(limit)));
        }
        (0, offset) => {
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(Box::new(sql_count(offset)));
        }
        (limit, offset) => {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(Box::new(sql_count(limit)));
            params.push(Box::new(sql_count(offset)));
        }
    }

    Ok(BuiltQuery { sql, params })
}

/// SQLite reads a negative LIMIT as unbounded and a negative OFFSET as zero,
/// so oversized values saturate instead of wrapping.
fn sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Build a `COUNT(*)` over the rows matching `text`.
pub fn build_count_sql(
    table: &TableInfo,
    text: &str,
    item_type: ItemType,
    mode: QueryMode,
) -> Result<BuiltQuery> {
    let mut params: Vec<Box<dyn ToSql + Send>> = Vec::new();
    let mut sql = format!("SELECT COUNT(*) FROM \"{}\"", table.name);
    sql.push_str(&where_clause(table, text, item_type, mode, &mut params)?);
    Ok(BuiltQuery { sql, params })
}
