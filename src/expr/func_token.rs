//! Token functions: `tokens`, `contains_token`, `contains_token_like` and
//! `contains_token_regexp`.
//!
//! Strings tokenize into their words; other atomic values are their own token;
//! arrays tokenize every element; objects contribute their field names
//! verbatim and tokenize their values.
use std::collections::BTreeSet;

use regex::Regex;

use crate::value::Value;

/// Case folding applied to string tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenCase {
    /// Lower-case every string token.
    Lower,
    /// Upper-case every string token.
    Upper,
}

/// Options object accepted by the token functions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenOptions {
    /// Optional case folding.
    pub case: Option<TokenCase>,
    /// Also emit whitespace-delimited chunks that contain special characters.
    pub specials: bool,
    /// Emit object field names.
    pub names: bool,
}

impl Default for TokenOptions {
    fn default() -> Self {
        Self {
            case: None,
            specials: false,
            names: true,
        }
    }
}

impl TokenOptions {
    /// Reads options from an object value; unknown or ill-typed fields keep defaults.
    pub fn from_value(options: &Value) -> Self {
        let mut out = Self::default();
        match options.field("case").as_str() {
            Some(case) if case.eq_ignore_ascii_case("lower") => out.case = Some(TokenCase::Lower),
            Some(case) if case.eq_ignore_ascii_case("upper") => out.case = Some(TokenCase::Upper),
            _ => {}
        }
        if let Value::Bool(b) = options.field("specials") {
            out.specials = *b;
        }
        if let Value::Bool(b) = options.field("names") {
            out.names = *b;
        }
        out
    }

    fn fold(&self, token: &str) -> String {
        match self.case {
            Some(TokenCase::Lower) => token.to_lowercase(),
            Some(TokenCase::Upper) => token.to_uppercase(),
            None => token.to_owned(),
        }
    }
}

/// Collects the tokens of `value` into `out`.
pub fn collect_tokens(value: &Value, options: &TokenOptions, out: &mut BTreeSet<Value>) {
    match value {
        Value::Missing => {}
        Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => {
            out.insert(value.clone());
        }
        Value::String(s) => {
            for word in s.split(|c: char| !c.is_alphanumeric()) {
                if !word.is_empty() {
                    out.insert(Value::String(options.fold(word)));
                }
            }
            if options.specials {
                for chunk in s.split_whitespace() {
                    if chunk.chars().any(|c| !c.is_alphanumeric()) {
                        out.insert(Value::String(options.fold(chunk)));
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_tokens(item, options, out);
            }
        }
        Value::Object(fields) => {
            for (name, field) in fields {
                if options.names {
                    out.insert(Value::String(name.clone()));
                }
                collect_tokens(field, options, out);
            }
        }
    }
}

// Options argument at `pos`: absent means defaults, MISSING propagates,
// anything other than an object is NULL.
fn options_arg(args: &[Value], pos: usize) -> Result<TokenOptions, Value> {
    match args.get(pos) {
        None => Ok(TokenOptions::default()),
        Some(Value::Object(_)) => Ok(TokenOptions::from_value(&args[pos])),
        Some(Value::Missing) => Err(Value::Missing),
        Some(_) => Err(Value::Null),
    }
}

/// `tokens(value[, options])`: sorted, de-duplicated array of tokens.
pub fn tokens(args: &[Value]) -> Value {
    let Some(arg) = args.first() else {
        return Value::Null;
    };
    if arg.is_missing() {
        return Value::Missing;
    }
    let options = match options_arg(args, 1) {
        Ok(options) => options,
        Err(v) => return v,
    };
    let mut set = BTreeSet::new();
    collect_tokens(arg, &options, &mut set);
    Value::Array(set.into_iter().collect())
}

/// `contains_token(source, token[, options])`.
pub fn contains_token(args: &[Value]) -> Value {
    let (Some(source), Some(token)) = (args.first(), args.get(1)) else {
        return Value::Null;
    };
    if source.is_missing() || token.is_missing() {
        return Value::Missing;
    }
    if source.is_null() || token.is_null() {
        return Value::Null;
    }
    let options = match options_arg(args, 2) {
        Ok(options) => options,
        Err(v) => return v,
    };
    let mut set = BTreeSet::new();
    collect_tokens(source, &options, &mut set);
    Value::Bool(set.contains(token))
}

/// `contains_token_like(source, pattern[, options])`.
pub fn contains_token_like(args: &[Value]) -> Value {
    matching_token(args, |pattern| like_regex(pattern))
}

/// `contains_token_regexp(source, regexp[, options])`; the regexp must match a
/// whole token.
pub fn contains_token_regexp(args: &[Value]) -> Value {
    matching_token(args, |pattern| Regex::new(&format!("^(?:{pattern})$")))
}

fn matching_token<F>(args: &[Value], compile: F) -> Value
where
    F: FnOnce(&str) -> Result<Regex, regex::Error>,
{
    let (Some(source), Some(pattern)) = (args.first(), args.get(1)) else {
        return Value::Null;
    };
    if source.is_missing() || pattern.is_missing() {
        return Value::Missing;
    }
    let Some(pattern) = pattern.as_str() else {
        return Value::Null;
    };
    if source.is_null() {
        return Value::Null;
    }
    let options = match options_arg(args, 2) {
        Ok(options) => options,
        Err(v) => return v,
    };
    let Ok(re) = compile(pattern) else {
        tracing::debug!(pattern = %format!("<ud>{pattern}</ud>"), "expr.token.bad_pattern");
        return Value::Null;
    };
    let mut set = BTreeSet::new();
    collect_tokens(source, &options, &mut set);
    Value::Bool(set.iter().any(|t| t.as_str().is_some_and(|s| re.is_match(s))))
}

/// Compiles a LIKE pattern (`%` any run, `_` any char, `\` escapes) into an
/// anchored regular expression.
pub fn like_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => re.push_str(&regex::escape(&escaped.to_string())),
                None => re.push_str(&regex::escape("\\")),
            },
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}

/// Literal prefix of a LIKE pattern and whether the pattern is exactly
/// `prefix%` (or exactly `prefix` with no wildcard at all).
pub fn like_prefix(pattern: &str) -> (String, LikeShape) {
    let mut prefix = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '%' => {
                let shape = if chars.peek().is_none() {
                    LikeShape::PrefixOnly
                } else {
                    LikeShape::Complex
                };
                return (prefix, shape);
            }
            '_' => return (prefix, LikeShape::Complex),
            '\\' => match chars.next() {
                Some(escaped) => prefix.push(escaped),
                None => prefix.push('\\'),
            },
            other => prefix.push(other),
        }
    }
    (prefix, LikeShape::Exact)
}

/// Classification of a LIKE pattern for span building.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LikeShape {
    /// No wildcards: equality.
    Exact,
    /// `prefix%`
    PrefixOnly,
    /// Anything else.
    Complex,
}
