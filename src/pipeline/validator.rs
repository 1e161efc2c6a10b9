//! Pattern-based checks on generated SQL.
//!
//! Nothing here parses SQL. Statements are scanned with regexes after
//! string literals, quoted identifiers and comments are masked out, so
//! results are best-effort: table extraction only looks at the name right
//! after `FROM`/`JOIN`, and aliases are never resolved.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::db::schema::SchemaSnapshot;

const READ_VERBS: &[&str] = &[
    "SELECT", "WITH", "FROM", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "VALUES",
];

const BLOCKED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
    "MERGE", "UPSERT", "ATTACH", "DETACH", "COPY", "EXPORT", "IMPORT", "INSTALL", "LOAD",
    "CALL", "VACUUM", "CHECKPOINT",
];

/// Functions whose argument syntax uses `FROM` without naming a table.
const FROM_FUNCTIONS: &[&str] = &["EXTRACT", "SUBSTRING", "TRIM", "OVERLAY", "POSITION"];

const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "pg_catalog"];

static BLOCKED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({})\b", BLOCKED_KEYWORDS.join("|"))).expect("blocked keyword regex")
});

static TABLE_REF: LazyLock<Regex> = LazyLock::new(|| {
    let ident = r#"(?:"[^"]+"|`[^`]+`|[A-Za-z_][\w$]*)"#;
    Regex::new(&format!(r"(?i)\b(?:FROM|JOIN)\s+({ident}(?:\s*\.\s*{ident})*)"))
        .expect("table reference regex")
});

static CTE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\bWITH\s+(?:RECURSIVE\s+)?|,\s*)([A-Za-z_]\w*)\s*(?:\([^)]*\)\s*)?AS\s*(?:NOT\s+)?(?:MATERIALIZED\s+)?\(")
        .expect("cte regex")
});

static QUALIFIED_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w.])([A-Za-z_]\w*)\.([A-Za-z_]\w*)\b").expect("qualified column regex")
});

static ROW_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bLIMIT\b|\bFETCH\s+(?:FIRST|NEXT)\b|\bTOP\s*\(?\s*\d").expect("limit regex")
});

static AGGREGATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bGROUP\s+BY\b|\b(?:COUNT|SUM|AVG|MIN|MAX)\s*\(").expect("aggregate regex")
});

static JOIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bJOIN\b").expect("join regex"));

static JOIN_CONDITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bON\b|\bUSING\s*\(").expect("join condition regex"));

static WILDCARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bSELECT\s+(?:DISTINCT\s+)?(?:[A-Za-z_]\w*\.)?\*").expect("wildcard regex")
});

/// Advisory result of a validation pass. Only `errors` block execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryValidator;

impl QueryValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, sql: &str, schema: &SchemaSnapshot) -> ValidationVerdict {
        let mut verdict = ValidationVerdict::default();

        // Byte-aligned: literals and comments masked in both, quoted
        // identifiers kept in `code` and blanked in `keywords`
        let code = mask(sql, false);
        let keywords = mask(sql, true);

        let leading = leading_keyword(&keywords);
        match leading.as_deref() {
            None => verdict.errors.push("Statement is empty".to_string()),
            Some(verb) if !READ_VERBS.contains(&verb) => verdict.errors.push(format!(
                "Only read-only statements are allowed, statement starts with {}",
                verb
            )),
            Some(_) => {}
        }

        let mut blocked_seen = HashSet::new();
        for found in BLOCKED.find_iter(&keywords) {
            let keyword = found.as_str().to_ascii_uppercase();
            if blocked_seen.insert(keyword.clone()) {
                verdict
                    .errors
                    .push(format!("Statement contains blocked keyword {}", keyword));
            }
        }

        let ctes: HashSet<String> = CTE_NAME
            .captures_iter(&keywords)
            .map(|c| c[1].to_ascii_lowercase())
            .collect();

        let mut unknown_seen = HashSet::new();
        for table in referenced_tables(&code, &keywords) {
            if ctes.contains(&table.to_ascii_lowercase()) || schema.has_table(&table) {
                continue;
            }
            if unknown_seen.insert(table.to_ascii_lowercase()) {
                verdict
                    .errors
                    .push(format!("Table {} does not exist in the schema", table));
            }
        }

        let mut column_seen = HashSet::new();
        for caps in QUALIFIED_COLUMN.captures_iter(&keywords) {
            let (table_name, column) = (&caps[1], &caps[2]);
            let Some(table) = schema.table(table_name) else {
                continue;
            };
            if !table.columns.is_empty()
                && !table.has_column(column)
                && column_seen.insert(format!("{}.{}", table_name, column).to_ascii_lowercase())
            {
                verdict.warnings.push(format!(
                    "Column {} is not a known column of table {}",
                    column, table_name
                ));
            }
        }

        let is_query = matches!(leading.as_deref(), Some("SELECT" | "WITH" | "FROM" | "VALUES"));
        if is_query && !ROW_LIMIT.is_match(&keywords) && !AGGREGATE.is_match(&keywords) {
            verdict.warnings.push(
                "Query has no LIMIT clause and no aggregate, the result set may be large"
                    .to_string(),
            );
        }

        let joins = JOIN.find_iter(&keywords).count();
        let conditions = JOIN_CONDITION.find_iter(&keywords).count();
        if joins > conditions {
            verdict.warnings.push(format!(
                "Query has {} joins but only {} join conditions, check for an unintended cross product",
                joins, conditions
            ));
        }

        if WILDCARD.is_match(&keywords) {
            verdict
                .suggestions
                .push("Replace SELECT * with an explicit column list".to_string());
        }

        verdict.valid = verdict.errors.is_empty();
        verdict
    }
}

/// Whether the statement groups or aggregates, ignoring literals and comments.
pub fn has_aggregate(sql: &str) -> bool {
    AGGREGATE.is_match(&mask(sql, true))
}

/// Table names following `FROM`/`JOIN`, unquoted, system catalogs and
/// table functions skipped. Keywords are found in `keywords`, names are
/// read from `code` at the same byte range.
fn referenced_tables(code: &str, keywords: &str) -> Vec<String> {
    let mut tables = Vec::new();

    for caps in TABLE_REF.captures_iter(keywords) {
        let Some(name_match) = caps.get(1) else {
            continue;
        };
        let whole = caps.get(0).map_or(name_match.start(), |m| m.start());

        // generate_series(...) and friends
        if keywords[name_match.end()..].trim_start().starts_with('(') {
            continue;
        }
        // EXTRACT(YEAR FROM ts), a IS DISTINCT FROM b
        if enclosing_function(keywords, whole)
            .is_some_and(|f| FROM_FUNCTIONS.contains(&f.to_ascii_uppercase().as_str()))
            || previous_word(keywords, whole).eq_ignore_ascii_case("DISTINCT")
        {
            continue;
        }

        let Some(name) = code.get(name_match.range()) else {
            continue;
        };
        let segments: Vec<String> = name
            .split('.')
            .map(|s| s.trim().trim_matches(|c| c == '"' || c == '`').to_string())
            .collect();
        let Some(table) = segments.last() else {
            continue;
        };

        let system = segments[..segments.len() - 1]
            .iter()
            .any(|s| SYSTEM_SCHEMAS.contains(&s.to_ascii_lowercase().as_str()))
            || table.starts_with("duckdb_")
            || table.starts_with("sqlite_");
        if !system {
            tables.push(table.clone());
        }
    }

    tables
}

/// Name of the function whose unclosed `(` contains byte offset `pos`.
fn enclosing_function(code: &str, pos: usize) -> Option<&str> {
    let bytes = code.as_bytes();
    let mut depth = 0usize;
    for i in (0..pos).rev() {
        match bytes[i] {
            b')' => depth += 1,
            b'(' if depth == 0 => {
                let word = previous_word(code, i);
                return if word.is_empty() { None } else { Some(word) };
            }
            b'(' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// The identifier-like word ending right before byte offset `pos`.
fn previous_word(code: &str, pos: usize) -> &str {
    let bytes = code.as_bytes();
    let mut end = pos;
    while end > 0 && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    let mut start = end;
    while start > 0 && (bytes[start - 1].is_ascii_alphanumeric() || bytes[start - 1] == b'_') {
        start -= 1;
    }
    &code[start..end]
}

fn leading_keyword(code: &str) -> Option<String> {
    let trimmed = code.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
    let word: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if word.is_empty() {
        None
    } else {
        Some(word.to_ascii_uppercase())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Scan {
    Code,
    Literal,
    DoubleQuoted,
    Backtick,
    LineComment,
    BlockComment,
}

/// One space per byte of `c`, so masked text keeps the input's byte offsets.
fn blank(out: &mut String, c: char) {
    for _ in 0..c.len_utf8() {
        out.push(' ');
    }
}

/// Blank out string literal contents and comments; with `identifiers`
/// also blank out quoted identifier contents. Quote characters stay.
fn mask(sql: &str, identifiers: bool) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut state = Scan::Code;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            Scan::Code => match c {
                '\'' => {
                    state = Scan::Literal;
                    out.push(c);
                }
                '"' => {
                    state = Scan::DoubleQuoted;
                    out.push(c);
                }
                '`' => {
                    state = Scan::Backtick;
                    out.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    state = Scan::LineComment;
                    blank(&mut out, c);
                }
                '/' if chars.peek() == Some(&'*') => {
                    state = Scan::BlockComment;
                    blank(&mut out, c);
                }
                _ => out.push(c),
            },
            Scan::Literal => {
                if c == '\'' {
                    state = Scan::Code;
                    out.push(c);
                } else {
                    blank(&mut out, c);
                }
            }
            Scan::DoubleQuoted | Scan::Backtick => {
                let close = if state == Scan::DoubleQuoted { '"' } else { '`' };
                if c == close {
                    state = Scan::Code;
                    out.push(c);
                } else if identifiers {
                    blank(&mut out, c);
                } else {
                    out.push(c);
                }
            }
            Scan::LineComment => {
                if c == '\n' {
                    state = Scan::Code;
                    out.push(c);
                } else {
                    blank(&mut out, c);
                }
            }
            Scan::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = Scan::Code;
                    out.push_str("  ");
                } else {
                    blank(&mut out, c);
                }
            }
        }
    }

    out
}
