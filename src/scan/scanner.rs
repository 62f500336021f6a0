//! Hand-written tokenizer for the expression language subset the engine
//! recognizes: function calls, bracketed references, literals and boolean
//! connectives. Scanning never fails; characters outside the subset become
//! opaque tokens the matchers simply step over.

use crate::analysis::diagnostics::{Diagnostic, DiagnosticKind};

/// Parenthesis nesting cap for scanning and shape matching. Exceeding it
/// truncates descent and records `RecursionLimitExceeded`.
pub const MAX_NESTING_DEPTH: usize = 12;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Bare identifier: function names, keywords, unquoted table names.
    Ident(String),
    /// `'quoted table name'`.
    Quoted(String),
    /// `[bracketed name]` — a column or measure, depending on what precedes it.
    Bracket(String),
    /// `"string literal"`.
    Str(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
    /// Infix disjunction `||`.
    OrOp,
    /// Infix conjunction `&&`.
    AndOp,
    Eq,
    /// Any other punctuation, carried through opaquely.
    Op(char),
}

impl Token {
    pub fn is_ident(&self, name: &str) -> bool {
        matches!(self, Token::Ident(s) if s.eq_ignore_ascii_case(name))
    }
}

/// Tokenizes expression text. Comments (`//`, `--`, `/* */`) are skipped;
/// unterminated quotes or brackets consume to end of input rather than
/// erroring, so a garbled tail never aborts the scan.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::OrOp);
                i += 2;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::AndOp);
                i += 2;
            }
            '/' if chars.get(i + 1) == Some(&'/') => i = skip_line(&chars, i),
            '-' if chars.get(i + 1) == Some(&'-') => i = skip_line(&chars, i),
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            '\'' => {
                let (s, next) = take_until(&chars, i + 1, '\'');
                tokens.push(Token::Quoted(s));
                i = next;
            }
            '[' => {
                let (s, next) = take_until(&chars, i + 1, ']');
                tokens.push(Token::Bracket(s));
                i = next;
            }
            '"' => {
                let (s, next) = take_until(&chars, i + 1, '"');
                tokens.push(Token::Str(s));
                i = next;
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                match text.parse::<f64>() {
                    Ok(n) => tokens.push(Token::Number(n)),
                    Err(_) => tokens.push(Token::Op(c)),
                }
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                tokens.push(Token::Op(c));
                i += 1;
            }
        }
    }
    tokens
}

fn skip_line(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i] != '\n' {
        i += 1;
    }
    i
}

/// Collects characters up to (not including) `close`, returning the next
/// scan position past the closer. Missing closer consumes the remainder.
fn take_until(chars: &[char], start: usize, close: char) -> (String, usize) {
    let mut i = start;
    while i < chars.len() && chars[i] != close {
        i += 1;
    }
    let s: String = chars[start..i].iter().collect();
    (s.trim().to_string(), (i + 1).min(chars.len()))
}

/// Index of the `RParen` matching the `LParen` at `open`, or `None` when
/// the expression is unbalanced.
pub fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    debug_assert!(matches!(tokens.get(open), Some(Token::LParen)));
    let mut depth = 0usize;
    for (i, tok) in tokens.iter().enumerate().skip(open) {
        match tok {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits a token slice on separators at the current nesting depth only.
/// Separators inside nested parentheses never split.
pub fn split_top_level<'a>(
    tokens: &'a [Token],
    is_sep: impl Fn(&Token) -> bool,
) -> Vec<&'a [Token]> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, tok) in tokens.iter().enumerate() {
        match tok {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            t if depth == 0 && is_sep(t) => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&tokens[start..]);
    parts
}

/// A recognized `NAME ( args… )` occurrence.
pub struct Call<'a> {
    pub name: &'a str,
    pub args: Vec<&'a [Token]>,
    /// Index of the closing parenthesis.
    pub close: usize,
}

/// Recognizes a function call starting at `idx` and isolates its top-level
/// comma-separated arguments via balanced-parenthesis walking. An empty
/// argument list (`TRUE()`) yields zero args rather than one empty slice.
pub fn call_at(tokens: &[Token], idx: usize) -> Option<Call<'_>> {
    let Token::Ident(name) = tokens.get(idx)? else {
        return None;
    };
    if !matches!(tokens.get(idx + 1), Some(Token::LParen)) {
        return None;
    }
    let close = matching_paren(tokens, idx + 1)?;
    let body = &tokens[idx + 2..close];
    let args = if body.is_empty() {
        Vec::new()
    } else {
        split_top_level(body, |t| matches!(t, Token::Comma))
    };
    Some(Call { name: name.as_str(), args, close })
}

/// Finds the first call to `name` (case-insensitive), at any nesting depth.
pub fn find_call<'a>(tokens: &'a [Token], name: &str) -> Option<Call<'a>> {
    (0..tokens.len())
        .filter(|&i| tokens[i].is_ident(name))
        .find_map(|i| call_at(tokens, i))
}

/// Nesting/call statistics for one expression, feeding the complexity
/// score and the depth-cap diagnostic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NestingProfile {
    pub max_depth: usize,
    pub call_count: usize,
    pub depth_capped: bool,
}

pub fn nesting_profile(tokens: &[Token]) -> NestingProfile {
    let mut profile = NestingProfile::default();
    let mut depth = 0usize;
    for (i, tok) in tokens.iter().enumerate() {
        match tok {
            Token::LParen => {
                depth += 1;
                if depth > MAX_NESTING_DEPTH {
                    profile.depth_capped = true;
                }
                profile.max_depth = profile.max_depth.max(depth.min(MAX_NESTING_DEPTH));
                if let Some(Token::Ident(_)) = i.checked_sub(1).and_then(|p| tokens.get(p)) {
                    profile.call_count += 1;
                }
            }
            Token::RParen => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    profile
}

pub(crate) fn depth_cap_diagnostic(subject: &str) -> Diagnostic {
    Diagnostic::new(
        DiagnosticKind::RecursionLimitExceeded,
        subject,
        format!("nesting depth exceeds the cap of {MAX_NESTING_DEPTH}; scan truncated"),
    )
}
