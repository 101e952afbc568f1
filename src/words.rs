//! Quote-aware word splitting for target and include lines

/// Split `text` at whitespace and `;`, ignoring separators inside quotes.
///
/// Quotes and backslash escapes are kept in the words. Empty words are
/// dropped.
pub(crate) fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                current.push(c);
                escaped = true;
            }
            '"' | '\'' => {
                match quote {
                    None => quote = Some(c),
                    Some(open) if open == c => quote = None,
                    Some(_) => {}
                }
                current.push(c);
            }
            c if quote.is_none() && (c.is_whitespace() || c == ';') => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Whether `word` contains a quote character
pub(crate) fn is_quoted(word: &str) -> bool {
    word.contains(['"', '\''])
}

/// Remove quote characters from `word`, keeping the text they enclose.
pub(crate) fn strip_quotes(word: &str) -> String {
    let mut result = String::with_capacity(word.len());
    let mut quote: Option<char> = None;
    for c in word.chars() {
        match (c, quote) {
            ('"' | '\'', None) => quote = Some(c),
            (c, Some(open)) if c == open => quote = None,
            (c, _) => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words() {
        assert_eq!(split_words("  a b\tc  "), vec!["a", "b", "c"]);
        assert_eq!(split_words("a;b ; c"), vec!["a", "b", "c"]);
        assert!(split_words(" ;; ").is_empty());
    }

    #[test]
    fn test_split_words_quoted() {
        assert_eq!(
            split_words("'a b' \"c;d\" e"),
            vec!["'a b'", "\"c;d\"", "e"]
        );
        assert_eq!(split_words("a\\ b c"), vec!["a\\ b", "c"]);
    }

    #[test]
    fn test_strip_quotes() {
        assert!(is_quoted("'a b'"));
        assert!(!is_quoted("ab"));
        assert_eq!(strip_quotes("'a b'"), "a b");
        assert_eq!(strip_quotes("\"it's\""), "it's");
        assert_eq!(strip_quotes("x'y'z"), "xyz");
    }
}
