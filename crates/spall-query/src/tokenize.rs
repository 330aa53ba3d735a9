//! Plain-mode query tokenization.
//!
//! Plain mode turns arbitrary user input into a safe FTS5 expression:
//! split on whitespace, split each run on anything outside
//! `[A-Za-z0-9_]`, drop empties, quote every token (doubling embedded
//! quotes), and AND them together. Operators like `OR` survive only as
//! literal tokens.

/// Builds the FTS5 match expression for plain mode. Empty input yields
/// an empty expression, which retrieval maps to an empty result.
pub fn plain_match_expr(q: &str) -> String {
    let tokens: Vec<String> = q
        .split_whitespace()
        .flat_map(|run| run.split(|c: char| !c.is_ascii_alphanumeric() && c != '_'))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    tokens.join(" AND ")
}
