//! Query portability rewriting.
//!
//! The TPC query generators (`qgen`, `dsqgen`) emit SQL with a handful of
//! dialect quirks that PostgreSQL rejects. This module normalizes a single
//! generated query into text that executes unchanged on PostgreSQL without
//! altering its semantics:
//!
//! - `LIMIT` emitted on its own statement-terminated line is folded back
//!   into the preceding SELECT
//! - the `limit -1` sentinel ("no limit") is removed entirely
//! - bare date-interval literals (`... - 30 days)`) become
//!   `interval '30 days')`
//! - inline derived tables without an alias get a synthetic one, since
//!   PostgreSQL requires every subquery in FROM to be aliased

use regex::Regex;
use std::sync::OnceLock;

/// Alias injected after unaliased derived tables.
const SYNTHETIC_ALIAS: &str = " as alias123 ";

/// Keywords that can legally follow a derived table without an alias in the
/// generator dialect. Seeing one means the subquery is unaliased.
const CLAUSE_KEYWORDS: [&str; 4] = ["limit", "group", "order", "where"];

fn interval_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r" ([0-9]+) days\)").unwrap())
}

fn derived_table_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"((from)|,)[ \t\n]*\(").unwrap())
}

/// Rewrite one generator-produced query so it is valid PostgreSQL.
///
/// This is a total function over well-formed generator output. Unbalanced
/// parentheses mean the upstream query files are corrupt; that case panics
/// rather than producing silently broken SQL.
pub fn rewrite(text: &str) -> String {
    let text = text.replace(";\nlimit ", " limit ").replace("limit -1", "");
    let text = interval_pattern()
        .replace_all(&text, " interval '$1 days')")
        .into_owned();
    alias_derived_tables(&text)
}

/// Insert a synthetic alias after every inline derived table that is not
/// already followed by one.
///
/// The scan is case-insensitive (performed over a lowercased copy), but all
/// positions index into the original text. From each `from (` / `, (` match
/// a running parenthesis-depth count starting at 1 locates the position just
/// past the subquery's closing parenthesis; the next whitespace-trimmed
/// token decides whether an alias is already present. Insertions are applied
/// in descending position order so earlier ones do not shift later offsets.
fn alias_derived_tables(query_text: &str) -> String {
    let lowered = query_text.to_lowercase();
    let bytes = lowered.as_bytes();
    let mut positions = Vec::new();

    for m in derived_table_pattern().find_iter(&lowered) {
        let mut depth = 1usize;
        let mut pos = m.end();

        while depth > 0 {
            match bytes.get(pos) {
                Some(b'(') => depth += 1,
                Some(b')') => depth -= 1,
                Some(_) => {}
                None => panic!("unbalanced parentheses in generated query: {query_text}"),
            }
            pos += 1;
        }

        let next_word = query_text[pos..]
            .trim_start()
            .split(' ')
            .next()
            .unwrap_or("")
            .split('\n')
            .next()
            .unwrap_or("");

        if next_word.is_empty()
            || next_word.starts_with(')')
            || next_word.starts_with(',')
            || CLAUSE_KEYWORDS.contains(&next_word.to_lowercase().as_str())
        {
            positions.push(pos);
        }
    }

    let mut aliased = query_text.to_string();
    positions.sort_unstable();
    for pos in positions.into_iter().rev() {
        aliased.insert_str(pos, SYNTHETIC_ALIAS);
    }

    aliased
}
