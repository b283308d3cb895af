//! Canonical string escaping for emitted source.
//!
//! Produces a backslash-escaped representation that is safe to embed between
//! double quotes in the output expression, including inside an HTML
//! `<script>` context (`<` is escaped so `</script>` can never appear in a
//! payload).

/// Escapes `raw` so the result can be placed between double quotes in
/// emitted source.
///
/// Escaped: backslash, double quote, `<` (as `\x3C`), U+2028/U+2029 (line
/// terminators in source but not in JSON), and the C0 control range. Rust
/// strings are guaranteed well-formed UTF-8, so lone surrogate halves cannot
/// occur on this path; they are handled where IR arrives via JSON transport.
pub fn escape_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '<' => out.push_str("\\x3C"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            '\u{000B}' => out.push_str("\\v"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\x{:02X}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Convenience wrapper: `escape_string` plus surrounding double quotes.
pub fn quote(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    out.push_str(&escape_string(raw));
    out.push('"');
    out
}

// --- application/x-www-form-urlencoded ---
//
// URLSearchParams round-trips through its serialized query-string form; the
// two helpers below implement the subset of form-urlencoding the pairs need.

/// Serializes name/value pairs as a query string (`a=1&b=2`).
pub(crate) fn form_urlencode(pairs: &[(String, String)]) -> String {
    fn push_component(out: &mut String, raw: &str) {
        for byte in raw.as_bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'*' => {
                    out.push(*byte as char);
                }
                b' ' => out.push('+'),
                other => {
                    out.push('%');
                    out.push_str(&format!("{other:02X}"));
                }
            }
        }
    }

    let mut out = String::new();
    for (index, (key, value)) in pairs.iter().enumerate() {
        if index > 0 {
            out.push('&');
        }
        push_component(&mut out, key);
        out.push('=');
        push_component(&mut out, value);
    }
    out
}

/// Parses a query string back into name/value pairs.
pub(crate) fn form_urldecode(init: &str) -> Vec<(String, String)> {
    fn pop_component(raw: &str) -> String {
        let bytes = raw.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'+' => out.push(b' '),
                b'%' if i + 3 <= bytes.len() => {
                    let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                    match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                        Some(byte) => {
                            out.push(byte);
                            i += 2;
                        }
                        None => out.push(b'%'),
                    }
                }
                other => out.push(other),
            }
            i += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    if init.is_empty() {
        return Vec::new();
    }
    init.split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (pop_component(key), pop_component(value)),
            None => (pop_component(pair), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_encoding_round_trips() {
        let pairs = vec![
            ("q".to_string(), "a b&c=d".to_string()),
            ("lang".to_string(), "en".to_string()),
        ];
        let encoded = form_urlencode(&pairs);
        assert_eq!(encoded, "q=a+b%26c%3Dd&lang=en");
        assert_eq!(form_urldecode(&encoded), pairs);
    }

    #[test]
    fn escapes_quotes_and_backslashes() {
        assert_eq!(escape_string(r#"a"b\c"#), r#"a\"b\\c"#);
    }

    #[test]
    fn escapes_script_closers() {
        assert_eq!(escape_string("</script>"), "\\x3C/script>");
    }

    #[test]
    fn escapes_line_separators() {
        assert_eq!(escape_string("a\u{2028}b\u{2029}c"), "a\\u2028b\\u2029c");
    }

    #[test]
    fn escapes_control_range() {
        assert_eq!(escape_string("\u{0000}\u{001F}"), "\\x00\\x1F");
        assert_eq!(escape_string("line\nbreak"), "line\\nbreak");
    }

    #[test]
    fn quote_wraps() {
        assert_eq!(quote("hi"), "\"hi\"");
    }
}
