//! Safe execution of analyst-supplied SQL.
//!
//! Defense in depth, in order:
//!   1. An allowlist validator tokenizes the text (string literals,
//!      quoted identifiers, and both comment styles handled) and rejects
//!      anything that is not a single SELECT/WITH statement.
//!   2. Execution runs on a separate connection opened read-only with
//!      PRAGMA query_only=ON, and the prepared statement itself must
//!      report readonly — SQLite is the final authority, not the
//!      tokenizer.
//!   3. The statement is wrapped in an outer LIMIT, so a missing LIMIT
//!      gets the ceiling injected and a larger one is clamped down.
//!   4. A watchdog thread interrupts the connection when the wall-clock
//!      budget expires.

use crate::{
    config::QueryLimits,
    error::{CoreError, CoreResult},
    store::PortfolioStore,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

/// Terminal state of one execution attempt, as recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    Succeeded,
    Failed,
    TimedOut,
    Rejected,
}

impl QueryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "timed_out" => Some(Self::TimedOut),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Classify an executor error into the outcome it represents.
    pub fn from_error(err: &CoreError) -> Self {
        match err {
            CoreError::ForbiddenOperation(_)
            | CoreError::UnknownRelation(_)
            | CoreError::Validation(_) => Self::Rejected,
            CoreError::ResourceExceeded(_) => Self::TimedOut,
            _ => Self::Failed,
        }
    }
}

/// A single result cell, preserving SQLite's native types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<rusqlite::types::ValueRef<'_>> for SqlValue {
    fn from(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(r) => SqlValue::Real(r),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Declared type where SQLite knows it; None for computed columns.
    pub decl_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

// ── Validation ───────────────────────────────────────────────────────────────

/// Statement kinds and verbs that are never allowed through, regardless
/// of where they appear in the text.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "REPLACE",
    "PRAGMA", "ATTACH", "DETACH", "VACUUM", "REINDEX", "ANALYZE",
    "BEGIN", "COMMIT", "ROLLBACK", "SAVEPOINT", "RELEASE",
];

#[derive(Debug, PartialEq)]
enum Token {
    Word(String), // uppercased bare word
    Semicolon,
    Other, // literals, quoted identifiers, punctuation
}

/// Tokenize just enough SQL to see keywords for what they are: string
/// literals, quoted identifiers, and comments cannot hide or fake a verb.
fn tokenize(text: &str) -> CoreResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            c if c.is_ascii_whitespace() => i += 1,
            '-' if bytes.get(i + 1) == Some(&b'-') => {
                // line comment
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            '/' if bytes.get(i + 1) == Some(&b'*') => {
                let close = text[i + 2..].find("*/").ok_or_else(|| {
                    CoreError::Validation("unterminated block comment".into())
                })?;
                i += 2 + close + 2;
            }
            '\'' | '"' | '`' => {
                let quote = bytes[i];
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => {
                            return Err(CoreError::Validation(
                                "unterminated quoted token".into(),
                            ))
                        }
                        Some(&b) if b == quote => {
                            // doubled quote escapes itself
                            if bytes.get(i + 1) == Some(&quote) {
                                i += 2;
                            } else {
                                i += 1;
                                break;
                            }
                        }
                        Some(_) => i += 1,
                    }
                }
                tokens.push(Token::Other);
            }
            '[' => {
                let close = text[i + 1..].find(']').ok_or_else(|| {
                    CoreError::Validation("unterminated bracketed identifier".into())
                })?;
                i += 1 + close + 1;
                tokens.push(Token::Other);
            }
            ';' => {
                tokens.push(Token::Semicolon);
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() {
                    let b = bytes[i] as char;
                    if b.is_ascii_alphanumeric() || b == '_' || b == '$' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(text[start..i].to_ascii_uppercase()));
            }
            _ => {
                tokens.push(Token::Other);
                i += 1;
            }
        }
    }
    Ok(tokens)
}

/// Validate that `text` is a single read-only statement. Rejections carry
/// the reason; nothing is ever silently stripped.
pub fn validate_query(text: &str) -> CoreResult<()> {
    let tokens = tokenize(text)?;

    let first_word = tokens.iter().find_map(|t| match t {
        Token::Word(w) => Some(w.as_str()),
        _ => None,
    });
    match first_word {
        None => return Err(CoreError::Validation("empty query".into())),
        Some("SELECT") | Some("WITH") => {}
        Some(other) => {
            return Err(CoreError::ForbiddenOperation(format!(
                "statement must be a SELECT, found {other}"
            )))
        }
    }

    let mut seen_semicolon = false;
    for token in &tokens {
        match token {
            Token::Semicolon => seen_semicolon = true,
            Token::Word(w) if seen_semicolon => {
                return Err(CoreError::ForbiddenOperation(format!(
                    "multiple statements are not allowed (found {w} after ';')"
                )))
            }
            Token::Other if seen_semicolon => {
                return Err(CoreError::ForbiddenOperation(
                    "multiple statements are not allowed".into(),
                ))
            }
            Token::Word(w) if FORBIDDEN_KEYWORDS.contains(&w.as_str()) => {
                return Err(CoreError::ForbiddenOperation(format!(
                    "{w} is not permitted in ad-hoc queries"
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Execution ────────────────────────────────────────────────────────────────

pub struct SafeQueryExecutor {
    conn: Connection,
    limits: QueryLimits,
}

impl SafeQueryExecutor {
    /// Open a read-only session against the store's database.
    pub fn new(store: &PortfolioStore, limits: QueryLimits) -> CoreResult<Self> {
        Ok(Self {
            conn: store.reopen_read_only()?,
            limits,
        })
    }

    /// Validate and run one query, returning the bounded result set.
    pub fn execute(&self, text: &str) -> CoreResult<RowSet> {
        validate_query(text)?;

        // Wrap the statement so the row ceiling applies after any inner
        // LIMIT: injected when absent, clamped when larger, never raised.
        let body = text.trim().trim_end_matches(';').trim();
        let wrapped = format!(
            "SELECT * FROM (\n{body}\n) LIMIT {}",
            self.limits.max_rows
        );

        let mut stmt = self.conn.prepare(&wrapped).map_err(map_prepare_error)?;
        if !stmt.readonly() {
            return Err(CoreError::ForbiddenOperation(
                "statement is not read-only".into(),
            ));
        }

        let columns: Vec<ColumnMeta> = stmt
            .columns()
            .iter()
            .map(|c| ColumnMeta {
                name: c.name().to_string(),
                decl_type: c.decl_type().map(str::to_string),
            })
            .collect();
        let column_count = columns.len();

        // Watchdog: interrupt the connection if the budget expires. The
        // done flag keeps a finished query's watchdog from interrupting
        // a later statement on the same connection.
        let done = Arc::new(AtomicBool::new(false));
        let handle = self.conn.get_interrupt_handle();
        let budget = Duration::from_millis(self.limits.timeout_ms);
        let watchdog = {
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let start = Instant::now();
                while !done.load(Ordering::Relaxed) {
                    if start.elapsed() >= budget {
                        handle.interrupt();
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            })
        };

        let result = (|| -> CoreResult<Vec<Vec<SqlValue>>> {
            let mut out = Vec::new();
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next().map_err(|e| map_exec_error(e, budget))? {
                let mut values = Vec::with_capacity(column_count);
                for idx in 0..column_count {
                    values.push(SqlValue::from(row.get_ref(idx)?));
                }
                out.push(values);
                if out.len() >= self.limits.max_rows {
                    break;
                }
            }
            Ok(out)
        })();

        done.store(true, Ordering::Relaxed);
        let _ = watchdog.join();

        Ok(RowSet {
            columns,
            rows: result?,
        })
    }
}

fn map_prepare_error(err: rusqlite::Error) -> CoreError {
    if let rusqlite::Error::SqliteFailure(_, Some(msg)) = &err {
        // SQLite reports a missing relation as "no such table: name",
        // for views as well.
        if let Some(name) = msg.strip_prefix("no such table: ") {
            return CoreError::UnknownRelation(name.to_string());
        }
        if msg.contains("syntax error") {
            return CoreError::Validation(msg.clone());
        }
    }
    CoreError::Database(err)
}

fn map_exec_error(err: rusqlite::Error, budget: Duration) -> CoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::OperationInterrupted =>
        {
            CoreError::ResourceExceeded(format!(
                "query exceeded its {}ms budget",
                budget.as_millis()
            ))
        }
        _ => CoreError::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_and_cte_pass_validation() {
        validate_query("SELECT * FROM loans").unwrap();
        validate_query("  with t as (select 1) select * from t").unwrap();
        validate_query("SELECT 1;").unwrap();
    }

    #[test]
    fn mutating_verbs_rejected_anywhere() {
        for q in [
            "DROP TABLE loans;",
            "delete from loans",
            "SELECT 1; DELETE FROM loans;",
            "update loans set total_paid = 0",
            "CREATE TABLE x (y)",
            "PRAGMA journal_mode=DELETE",
        ] {
            match validate_query(q) {
                Err(CoreError::ForbiddenOperation(_)) => {}
                other => panic!("expected ForbiddenOperation for {q:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn comments_and_casing_do_not_bypass() {
        let sneaky = "SeLeCt 1 /* harmless */; DrOp TaBlE loans";
        assert!(matches!(
            validate_query(sneaky),
            Err(CoreError::ForbiddenOperation(_))
        ));
        // Verbs inside string literals are data, not statements.
        validate_query("SELECT 'DROP TABLE loans' AS note").unwrap();
        validate_query("SELECT * FROM loans -- DELETE nothing").unwrap();
    }

    #[test]
    fn empty_and_unterminated_input_rejected() {
        assert!(matches!(
            validate_query("   -- nothing here"),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            validate_query("SELECT 'oops"),
            Err(CoreError::Validation(_))
        ));
    }
}
