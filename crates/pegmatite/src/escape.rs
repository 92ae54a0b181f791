//! Escaping and unescaping for literals and character classes.
//!
//! The grammar syntax allows the usual C-style escapes plus octal and
//! hexadecimal code points in literals and classes. [`escape`] produces text
//! that re-reads as the original; [`unescape`] interprets escape sequences
//! in text taken from grammar source.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[\t\n\x0B\x0C\r"'\-\[\]\\]"#).expect("escape table pattern is valid")
});

static UNESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\\(?:[tnvfr"'\-\[\]\\]|[0-7]{1,3}|x[0-9a-fA-F]{2}|u[0-9a-fA-F]{4}|U[0-9a-fA-F]{8})"#,
    )
    .expect("unescape table pattern is valid")
});

fn escape_char(c: char) -> Option<&'static str> {
    Some(match c {
        '\t' => "\\t",
        '\n' => "\\n",
        '\x0B' => "\\v",
        '\x0C' => "\\f",
        '\r' => "\\r",
        '"' => "\\\"",
        '\'' => "\\'",
        '-' => "\\-",
        '[' => "\\[",
        '\\' => "\\\\",
        ']' => "\\]",
        _ => return None,
    })
}

/// Escapes special characters for literals and character classes.
#[must_use]
pub fn escape(text: &str) -> String {
    ESCAPE_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let c = caps[0].chars().next().expect("match is one character");
            escape_char(c).unwrap_or(&caps[0]).to_owned()
        })
        .into_owned()
}

fn unescape_sequence(seq: &str) -> char {
    // seq is the text after the backslash
    match seq {
        "t" => '\t',
        "n" => '\n',
        "v" => '\x0B',
        "f" => '\x0C',
        "r" => '\r',
        "\"" => '"',
        "'" => '\'',
        "-" => '-',
        "[" => '[',
        "\\" => '\\',
        "]" => ']',
        _ => {
            let code = if seq.starts_with(['x', 'u', 'U']) {
                u32::from_str_radix(&seq[1..], 16)
            } else {
                u32::from_str_radix(seq, 8)
            };
            code.ok()
                .and_then(char::from_u32)
                .unwrap_or(char::REPLACEMENT_CHARACTER)
        }
    }
}

/// Interprets escape sequences in literal or character-class text.
#[must_use]
pub fn unescape(text: &str) -> String {
    UNESCAPE_RE
        .replace_all(text, |caps: &Captures<'_>| {
            unescape_sequence(&caps[0][1..]).to_string()
        })
        .into_owned()
}
