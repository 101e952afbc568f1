/// The substitution wildcard in pattern rules and `patsubst`
pub(crate) const WILDCARD: char = '%';

/// Find the byte offset of the first `%` not preceded by a backslash.
pub(crate) fn find_wildcard(pattern: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in pattern.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            WILDCARD if !escaped => return Some(i),
            _ => escaped = false,
        }
    }
    None
}

/// Whether `pattern` contains an unescaped `%`
pub(crate) fn has_wildcard(pattern: &str) -> bool {
    find_wildcard(pattern).is_some()
}

/// Turn `\%` into `%`.
pub(crate) fn unescape(text: &str) -> String {
    text.replace("\\%", "%")
}

/// Split a pattern at its wildcard, unescaping both halves.
///
/// Only the first unescaped `%` is a wildcard. Any later one is literal.
pub(crate) fn split_pattern(pattern: &str) -> Option<(String, String)> {
    let i = find_wildcard(pattern)?;
    Some((
        unescape(&pattern[..i]),
        unescape(&pattern[i + WILDCARD.len_utf8()..]),
    ))
}

fn match_stem<'a>(prefix: &str, suffix: &str, target: &'a str, min_stem: usize) -> Option<&'a str> {
    if target.len() < prefix.len() + suffix.len() + min_stem {
        return None;
    }
    if target.starts_with(prefix) && target.ends_with(suffix) {
        Some(&target[prefix.len()..target.len() - suffix.len()])
    } else {
        None
    }
}

/// The part of `target` matched by the wildcard of `pattern`.
///
/// The stem is never empty, so `%.o` does not match `.o`.
pub(crate) fn stem<'a>(pattern: &str, target: &'a str) -> Option<&'a str> {
    let (prefix, suffix) = split_pattern(pattern)?;
    match_stem(&prefix, &suffix, target, 1)
}

/// Replace every unescaped `%` in `template` with `stem`.
pub(crate) fn substitute(template: &str, stem: &str) -> String {
    let mut result = String::with_capacity(template.len() + stem.len());
    let mut escaped = false;
    for c in template.chars() {
        match c {
            '\\' if !escaped => escaped = true,
            WILDCARD if escaped => {
                result.push(WILDCARD);
                escaped = false;
            }
            WILDCARD => result.push_str(stem),
            c => {
                if escaped {
                    result.push('\\');
                    escaped = false;
                }
                result.push(c);
            }
        }
    }
    if escaped {
        result.push('\\');
    }
    result
}

/// Apply `patsubst` to a single word.
///
/// Without a wildcard the whole word has to equal `pattern`. With one, the
/// stem may be empty and replaces the first `%` of `replacement`. Returns
/// `None` if the word does not match.
pub(crate) fn patsubst_word(pattern: &str, replacement: &str, word: &str) -> Option<String> {
    let Some((prefix, suffix)) = split_pattern(pattern) else {
        return (unescape(pattern) == word).then(|| unescape(replacement));
    };
    let stem = match_stem(&prefix, &suffix, word, 0)?;
    Some(match split_pattern(replacement) {
        Some((before, after)) => format!("{}{}{}", before, stem, after),
        None => unescape(replacement),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem() {
        assert_eq!(stem("%.o", "foo.o"), Some("foo"));
        assert_eq!(stem("%.o", "foo.c"), None);
        assert_eq!(stem("test_%", "test_foo"), Some("foo"));
        assert_eq!(stem("test_%", "other_foo"), None);
        assert_eq!(stem("foo%bar", "foo123bar"), Some("123"));
        assert_eq!(stem("%", "anything"), Some("anything"));
        assert_eq!(stem("foo.o", "foo.o"), None);
    }

    #[test]
    fn test_stem_is_never_empty() {
        assert_eq!(stem("%", ""), None);
        assert_eq!(stem("%.o", ".o"), None);
        assert_eq!(stem("test_%", "test_"), None);
        assert_eq!(stem("foo%bar", "foobar"), None);
    }

    #[test]
    fn test_only_first_wildcard_matches() {
        assert_eq!(stem("%.%.o", "foo.%.o"), Some("foo"));
        assert_eq!(stem("%.%.o", "foo.bar.o"), None);
    }

    #[test]
    fn test_escaped_wildcard() {
        assert!(!has_wildcard("100\\%"));
        assert_eq!(patsubst_word("100\\%", "x", "100%"), Some("x".to_string()));
        assert_eq!(stem("\\%x%.c", "%xfoo.c"), Some("foo"));
        assert_eq!(
            split_pattern("a\\%b%c"),
            Some(("a%b".to_string(), "c".to_string()))
        );
    }

    #[test]
    fn test_substitute() {
        assert_eq!(substitute("%.c", "foo"), "foo.c");
        assert_eq!(substitute("src/%.c %.h", "foo"), "src/foo.c foo.h");
        assert_eq!(substitute("\\%.c", "foo"), "%.c");
        assert_eq!(substitute("a\\b", "foo"), "a\\b");
    }

    #[test]
    fn test_patsubst_word() {
        assert_eq!(patsubst_word("%.c", "%.o", "foo.c"), Some("foo.o".to_string()));
        assert_eq!(patsubst_word("%.c", "%.o", "foo.h"), None);
        assert_eq!(patsubst_word("%.c", "%.o", ".c"), Some(".o".to_string()));
        assert_eq!(patsubst_word("foo", "bar", "foo"), Some("bar".to_string()));
        assert_eq!(patsubst_word("foo", "bar", "foobar"), None);
        assert_eq!(patsubst_word("%", "x", "abc"), Some("x".to_string()));
    }
}
