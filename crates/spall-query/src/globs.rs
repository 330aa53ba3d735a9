//! Glob matching for vector-search path filters.
//!
//! Globs are translated to anchored regexes: every regex metacharacter
//! is escaped, then `*` maps to `.*` and `?` to `.`.

use regex::Regex;

use spall_core::{Error, Result};

/// Compiles a path glob into an anchored regex.
pub fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::with_capacity(glob.len() * 2 + 2);
    pattern.push('^');
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c if regex_syntax_metachar(c) => {
                pattern.push('\\');
                pattern.push(c);
            }
            c => pattern.push(c),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|e| Error::other(format!("bad path glob {glob:?}: {e}")))
}

fn regex_syntax_metachar(c: char) -> bool {
    matches!(
        c,
        '\\' | '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|'
    )
}

/// A path filter that short-circuits the `*` match-everything case.
pub enum PathFilter {
    All,
    Glob(Regex),
}

impl PathFilter {
    pub fn new(glob: &str) -> Result<Self> {
        if glob == "*" {
            Ok(PathFilter::All)
        } else {
            Ok(PathFilter::Glob(glob_to_regex(glob)?))
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathFilter::All => true,
            PathFilter::Glob(regex) => regex.is_match(path),
        }
    }
}
