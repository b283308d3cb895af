//! Lexer for the emitted expression subset.
//!
//! One context-sensitive rule: `/` directly after a number literal is the
//! division operator (the `1/0` constant strategy); anywhere else it starts
//! a regular-expression literal.

use crate::error::{Result, VivicodeError};

/// One token of the expression subset.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// Number literal.
    Num(f64),
    /// BigInt literal (decimal digits, `n` suffix stripped).
    BigInt(String),
    /// String literal, unescaped.
    Str(String),
    /// Regular-expression literal.
    Regex {
        /// Pattern between the slashes.
        source: String,
        /// Flag letters.
        flags: String,
    },
    /// Identifier or keyword.
    Ident(String),
    /// Punctuator / operator.
    Punct(&'static str),
}

fn err(msg: impl Into<String>) -> VivicodeError {
    VivicodeError::Eval(msg.into())
}

/// Tokenizes `source`.
pub fn lex(source: &str) -> Result<Vec<Tok>> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '(' | ')' | '[' | ']' | '{' | '}' | ',' | ':' | ';' | '.' | '!' => {
                out.push(Tok::Punct(punct_of(c)));
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'>') {
                    out.push(Tok::Punct("=>"));
                    i += 2;
                } else {
                    out.push(Tok::Punct("="));
                    i += 1;
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    out.push(Tok::Punct("||"));
                    i += 2;
                } else {
                    return Err(err("unexpected '|'"));
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    out.push(Tok::Punct(">="));
                    i += 2;
                } else {
                    return Err(err("unexpected '>'"));
                }
            }
            '+' => {
                if chars.get(i + 1) == Some(&'+') {
                    out.push(Tok::Punct("++"));
                    i += 2;
                } else {
                    out.push(Tok::Punct("+"));
                    i += 1;
                }
            }
            '-' => {
                out.push(Tok::Punct("-"));
                i += 1;
            }
            '/' => {
                if matches!(out.last(), Some(Tok::Num(_))) {
                    out.push(Tok::Punct("/"));
                    i += 1;
                } else {
                    let (tok, next) = lex_regex(&chars, i)?;
                    out.push(tok);
                    i = next;
                }
            }
            '"' => {
                let (tok, next) = lex_string(&chars, i)?;
                out.push(tok);
                i = next;
            }
            c if c.is_ascii_digit() => {
                let (tok, next) = lex_number(&chars, i)?;
                out.push(tok);
                i = next;
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                out.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(err(format!("unexpected character {other:?}"))),
        }
    }
    Ok(out)
}

fn punct_of(c: char) -> &'static str {
    match c {
        '(' => "(",
        ')' => ")",
        '[' => "[",
        ']' => "]",
        '{' => "{",
        '}' => "}",
        ',' => ",",
        ':' => ":",
        ';' => ";",
        '.' => ".",
        '!' => "!",
        _ => "?",
    }
}

fn lex_number(chars: &[char], mut i: usize) -> Result<(Tok, usize)> {
    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    // BigInt suffix ends the literal immediately.
    if chars.get(i) == Some(&'n') {
        let digits: String = chars[start..i].iter().collect();
        return Ok((Tok::BigInt(digits), i + 1));
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if matches!(chars.get(i), Some('e') | Some('E')) {
        let mut j = i + 1;
        if matches!(chars.get(j), Some('+') | Some('-')) {
            j += 1;
        }
        if chars.get(j).is_some_and(|c| c.is_ascii_digit()) {
            i = j;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    let text: String = chars[start..i].iter().collect();
    let value: f64 = text
        .parse()
        .map_err(|_| err(format!("bad number literal {text:?}")))?;
    Ok((Tok::Num(value), i))
}

fn lex_string(chars: &[char], mut i: usize) -> Result<(Tok, usize)> {
    i += 1; // opening quote
    let mut out = String::new();
    let mut pending_surrogate: Option<u16> = None;

    let mut push_unit = |out: &mut String, pending: &mut Option<u16>, unit: u32| {
        if let Some(high) = pending.take() {
            if (0xDC00..=0xDFFF).contains(&unit) {
                let combined =
                    0x10000 + ((u32::from(high) - 0xD800) << 10) + (unit - 0xDC00);
                out.push(char::from_u32(combined).unwrap_or('\u{FFFD}'));
                return;
            }
            out.push('\u{FFFD}');
        }
        if (0xD800..=0xDBFF).contains(&unit) {
            *pending = Some(unit as u16);
        } else if (0xDC00..=0xDFFF).contains(&unit) {
            out.push('\u{FFFD}');
        } else {
            out.push(char::from_u32(unit).unwrap_or('\u{FFFD}'));
        }
    };

    while i < chars.len() {
        match chars[i] {
            '"' => {
                if pending_surrogate.take().is_some() {
                    out.push('\u{FFFD}');
                }
                return Ok((Tok::Str(out), i + 1));
            }
            '\\' => {
                let escape = chars.get(i + 1).ok_or_else(|| err("unterminated escape"))?;
                i += 2;
                match escape {
                    '"' => push_unit(&mut out, &mut pending_surrogate, '"' as u32),
                    '\\' => push_unit(&mut out, &mut pending_surrogate, '\\' as u32),
                    '/' => push_unit(&mut out, &mut pending_surrogate, '/' as u32),
                    'n' => push_unit(&mut out, &mut pending_surrogate, '\n' as u32),
                    'r' => push_unit(&mut out, &mut pending_surrogate, '\r' as u32),
                    't' => push_unit(&mut out, &mut pending_surrogate, '\t' as u32),
                    'b' => push_unit(&mut out, &mut pending_surrogate, 0x08),
                    'f' => push_unit(&mut out, &mut pending_surrogate, 0x0C),
                    'v' => push_unit(&mut out, &mut pending_surrogate, 0x0B),
                    '0' => push_unit(&mut out, &mut pending_surrogate, 0),
                    'x' => {
                        let hex: String = chars.get(i..i + 2).unwrap_or(&[]).iter().collect();
                        let unit = u32::from_str_radix(&hex, 16)
                            .map_err(|_| err("bad \\x escape"))?;
                        i += 2;
                        push_unit(&mut out, &mut pending_surrogate, unit);
                    }
                    'u' => {
                        let hex: String = chars.get(i..i + 4).unwrap_or(&[]).iter().collect();
                        let unit = u32::from_str_radix(&hex, 16)
                            .map_err(|_| err("bad \\u escape"))?;
                        i += 4;
                        push_unit(&mut out, &mut pending_surrogate, unit);
                    }
                    other => return Err(err(format!("unknown escape \\{other}"))),
                }
            }
            c => {
                if pending_surrogate.take().is_some() {
                    out.push('\u{FFFD}');
                }
                out.push(c);
                i += 1;
            }
        }
    }
    Err(err("unterminated string literal"))
}

fn lex_regex(chars: &[char], mut i: usize) -> Result<(Tok, usize)> {
    i += 1; // opening slash
    let mut source = String::new();
    let mut in_class = false;
    loop {
        let c = *chars.get(i).ok_or_else(|| err("unterminated regex literal"))?;
        match c {
            '\\' => {
                source.push(c);
                let next = chars
                    .get(i + 1)
                    .ok_or_else(|| err("unterminated regex escape"))?;
                source.push(*next);
                i += 2;
            }
            '[' => {
                in_class = true;
                source.push(c);
                i += 1;
            }
            ']' => {
                in_class = false;
                source.push(c);
                i += 1;
            }
            '/' if !in_class => {
                i += 1;
                break;
            }
            c => {
                source.push(c);
                i += 1;
            }
        }
    }
    let mut flags = String::new();
    while i < chars.len() && chars[i].is_ascii_alphabetic() {
        flags.push(chars[i]);
        i += 1;
    }
    Ok((Tok::Regex { source, flags }, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_after_number_regex_elsewhere() {
        let toks = lex("1/0").unwrap();
        assert_eq!(toks, vec![Tok::Num(1.0), Tok::Punct("/"), Tok::Num(0.0)]);

        let toks = lex("/ab/gi").unwrap();
        assert_eq!(
            toks,
            vec![Tok::Regex {
                source: "ab".into(),
                flags: "gi".into()
            }]
        );
    }

    #[test]
    fn strings_unescape() {
        let toks = lex("\"a\\x3Cb\\u2028c\"").unwrap();
        assert_eq!(toks, vec![Tok::Str("a<b\u{2028}c".into())]);
    }

    #[test]
    fn bigint_suffix() {
        let toks = lex("42n").unwrap();
        assert_eq!(toks, vec![Tok::BigInt("42".into())]);
    }

    #[test]
    fn arrows_and_sequences() {
        let toks = lex("(a,b)=>a||b").unwrap();
        assert_eq!(
            toks,
            vec![
                Tok::Punct("("),
                Tok::Ident("a".into()),
                Tok::Punct(","),
                Tok::Ident("b".into()),
                Tok::Punct(")"),
                Tok::Punct("=>"),
                Tok::Ident("a".into()),
                Tok::Punct("||"),
                Tok::Ident("b".into()),
            ]
        );
    }
}
