//! Logical lines and comment removal
use crate::error::{Location, ParseError};
use std::sync::Arc;

/// The character that starts a comment
pub const COMMENT_CHAR: char = '#';

/// A logical line of a rule file, with continuations already joined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// The text of the line, without the trailing newline
    pub text: String,
    /// Where the line starts
    pub location: Location,
}

impl Line {
    /// Create a new line
    pub fn new(text: impl Into<String>, location: Location) -> Self {
        Line {
            text: text.into(),
            location,
        }
    }
}

/// Split `content` into logical lines.
///
/// A backslash directly before a newline joins the two physical lines with a
/// single space. Any other backslash is kept as is, together with the
/// character it escapes.
pub fn logical_lines(content: &str, file: &str) -> Vec<Line> {
    let file: Arc<str> = Arc::from(file);
    let mut result = Vec::new();
    let mut buf = String::new();
    let mut escaped = false;
    let mut line_no = 1;
    let mut start_line = 1;

    for c in content.chars() {
        match c {
            '\\' if !escaped => escaped = true,
            '\n' if escaped => {
                buf.push(' ');
                escaped = false;
                line_no += 1;
            }
            '\n' => {
                result.push(Line::new(
                    std::mem::take(&mut buf),
                    Location::new(file.clone(), start_line),
                ));
                line_no += 1;
                start_line = line_no;
            }
            c if escaped => {
                buf.push('\\');
                buf.push(c);
                escaped = false;
            }
            c => buf.push(c),
        }
    }

    if escaped {
        buf.push('\\');
    }
    // A final newline does not start another line.
    if !buf.is_empty() || !content.ends_with('\n') {
        result.push(Line::new(buf, Location::new(file, start_line)));
    }
    result
}

/// Remove a trailing comment from `line`.
///
/// A `#` inside single or double quotes, inside `(...)`/`{...}`, or after a
/// backslash does not start a comment. A closing bracket with no matching
/// opener is an error.
pub fn strip_comment(line: &str) -> Result<&str, ParseError> {
    let mut quote: Option<char> = None;
    let mut parens = 0usize;
    let mut braces = 0usize;
    let mut escaped = false;

    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' | '\'' => match quote {
                None => quote = Some(c),
                Some(open) if open == c => quote = None,
                Some(_) => {}
            },
            _ if quote.is_some() => {}
            '(' => parens += 1,
            '{' => braces += 1,
            ')' | '}' => {
                let depth = if c == ')' { &mut parens } else { &mut braces };
                if *depth == 0 {
                    return Err(ParseError::new(
                        "Parentheses mismatch on line",
                        line.to_string(),
                    ));
                }
                *depth -= 1;
            }
            COMMENT_CHAR if parens == 0 && braces == 0 => return Ok(&line[..i]),
            _ => {}
        }
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(lines: &[Line]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn test_logical_lines_simple() {
        let lines = logical_lines("a\nb\n", "Makefile");
        assert_eq!(texts(&lines), vec!["a", "b"]);
        assert_eq!(lines[1].location, Location::new("Makefile", 2));
    }

    #[test]
    fn test_logical_lines_continuation() {
        let lines = logical_lines("SRC = a.c \\\n\tb.c\nall:\n", "Makefile");
        assert_eq!(texts(&lines), vec!["SRC = a.c  \tb.c", "all:"]);
        assert_eq!(lines[1].location.line, 3);
    }

    #[test]
    fn test_logical_lines_keeps_other_escapes() {
        let lines = logical_lines("echo a\\ b\\\\\n", "Makefile");
        assert_eq!(texts(&lines), vec!["echo a\\ b\\\\"]);
    }

    #[test]
    fn test_logical_lines_no_trailing_newline() {
        let lines = logical_lines("a\nb", "Makefile");
        assert_eq!(texts(&lines), vec!["a", "b"]);
        assert!(logical_lines("", "Makefile").len() == 1);
    }

    #[test]
    fn test_strip_comment() {
        assert_eq!(strip_comment("X = 1 # one").unwrap(), "X = 1 ");
        assert_eq!(strip_comment("# all comment").unwrap(), "");
        assert_eq!(strip_comment("echo '#not'").unwrap(), "echo '#not'");
        assert_eq!(strip_comment("echo \"#\" # yes").unwrap(), "echo \"#\" ");
        assert_eq!(strip_comment("a \\# b").unwrap(), "a \\# b");
        assert_eq!(
            strip_comment("X = $(subst #,x,a#b)").unwrap(),
            "X = $(subst #,x,a#b)"
        );
    }

    #[test]
    fn test_strip_comment_mismatch() {
        let err = strip_comment("X = a)").unwrap_err();
        assert!(err.message.contains("mismatch"));
        assert!(strip_comment("X = '('").is_ok());
    }
}
