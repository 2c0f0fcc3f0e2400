//! Argument string tokenizer
//!
//! Hosts hand the session a single free-text argument string such as
//! `-b 0.0.0.0:8086 --gool -e "162.159.192.1:2408"`. This module splits it
//! into flag and value tokens; interpreting them is left to
//! [`crate::config`].

use once_cell::sync::Lazy;
use regex::Regex;

/// A single token of an argument string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A flag as written, dashes included (`-b`, `--gool`)
    Flag(String),
    /// The value following a flag, with surrounding quotes removed
    Value(String),
}

impl Token {
    /// The argv-style spelling of this token
    pub fn as_str(&self) -> &str {
        match self {
            Token::Flag(flag) => flag,
            Token::Value(value) => value,
        }
    }

    /// Flag name without leading dashes, `None` for values
    pub fn flag_name(&self) -> Option<&str> {
        match self {
            Token::Flag(flag) => Some(flag.trim_start_matches('-')),
            Token::Value(_) => None,
        }
    }
}

/// A flag at the start of the input or after whitespace: `-name` or `--name`,
/// where the name does not start with a digit (so `-5` stays a value)
static FLAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)(--?[\w&&\D]\w*)").unwrap()
});

/// A value directly after a flag name, attached with `=` or separated by
/// whitespace. Quotes may be left unterminated.
static VALUE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\A(?:(=)|\s+)("[^"]*"?|'[^']*'?|\S+)"#).unwrap()
});

/// Whether `text` would be read as a flag
fn looks_like_flag(text: &str) -> bool {
    FLAG_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .is_some_and(|name| name.start() == 0)
}

/// Remove the opening quote and, if present, the matching closing one
fn unquote(raw: &str) -> &str {
    match raw.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let inner = &raw[1..];
            inner.strip_suffix(quote).unwrap_or(inner)
        }
        _ => raw,
    }
}

/// Split an argument string into flag and value tokens.
///
/// A value belongs to the preceding flag when it follows `=` or whitespace
/// and is not itself a flag. Text that belongs to no flag is skipped; unknown
/// flags are kept for the resolver to reject.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(caps) = FLAG_PATTERN.captures_at(input, pos) {
        let Some(name) = caps.get(1) else { break };
        tokens.push(Token::Flag(name.as_str().to_string()));
        pos = name.end();

        let Some(value) = VALUE_PATTERN.captures(&input[pos..]) else {
            continue;
        };
        let (Some(whole), Some(raw)) = (value.get(0), value.get(2)) else {
            continue;
        };

        // `=` attaches anything; after whitespace a flag starts a new token
        let attached = value.get(1).is_some();
        if attached || !looks_like_flag(raw.as_str()) {
            tokens.push(Token::Value(unquote(raw.as_str()).to_string()));
            pos += whole.end();
        }
    }

    tokens
}
