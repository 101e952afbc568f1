//! `include`, `-include` and `sinclude` directives
use crate::error::Error;
use crate::lines::{logical_lines, Line};
use crate::search::{expand_words, Search};
use crate::words::split_words;
use std::io;

/// How deeply included files may include further files
pub(crate) const MAX_INCLUDE_DEPTH: usize = 64;

/// A parsed include directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Include<'a> {
    /// Missing files are skipped silently (`-include`, `sinclude`)
    pub(crate) optional: bool,
    /// The unexpanded list of files
    pub(crate) arguments: &'a str,
}

impl<'a> Include<'a> {
    /// Recognise `include`, `.include`, `-include` or `sinclude` followed by
    /// whitespace.
    pub(crate) fn parse(text: &'a str) -> Option<Self> {
        let trimmed = text.trim_start();
        let end = trimmed.find(char::is_whitespace)?;
        let optional = match &trimmed[..end] {
            "include" | ".include" => false,
            "-include" | "sinclude" => true,
            _ => return None,
        };
        Some(Include {
            optional,
            arguments: trimmed[end..].trim(),
        })
    }

    /// The file names listed in already expanded argument text.
    ///
    /// Unquoted words with glob characters are globbed; quotes are removed.
    pub(crate) fn file_names(expanded: &str, search: &Search) -> Vec<String> {
        expand_words(search, &split_words(expanded))
    }
}

/// Find `name` directly or along `VPATH` and read it into logical lines.
pub(crate) fn read_lines(search: &Search, name: &str) -> Result<Vec<Line>, Error> {
    let path = search.find(name).ok_or_else(|| Error::Io {
        path: search.directory().join(name),
        source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
    })?;
    if !path.is_file() {
        return Err(Error::Io {
            path,
            source: io::Error::new(io::ErrorKind::InvalidInput, "Not a regular file"),
        });
    }
    let content = std::fs::read_to_string(&path).map_err(|source| Error::Io {
        path: path.clone(),
        source,
    })?;
    log::debug!("including {}", path.display());
    Ok(logical_lines(&content, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(
            Include::parse("include a.mk b.mk"),
            Some(Include {
                optional: false,
                arguments: "a.mk b.mk"
            })
        );
        assert!(Include::parse("  .include x").is_some());
        assert!(Include::parse("-include x").unwrap().optional);
        assert!(Include::parse("sinclude\tx").unwrap().optional);
        assert_eq!(Include::parse("include"), None);
        assert_eq!(Include::parse("included: x"), None);
        assert_eq!(Include::parse("all: include"), None);
    }

    #[test]
    fn test_file_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mk"), "").unwrap();
        std::fs::write(dir.path().join("b.mk"), "").unwrap();
        let search = Search::new(dir.path(), "");
        assert_eq!(
            Include::file_names("*.mk 'odd *.mk' c.mk", &search),
            vec!["a.mk", "b.mk", "odd *.mk", "c.mk"]
        );
    }

    #[test]
    fn test_read_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("inc")).unwrap();
        std::fs::write(dir.path().join("inc/rules.mk"), "A = 1\nB = \\\n 2\n").unwrap();
        let search = Search::new(dir.path(), "inc");
        let lines = read_lines(&search, "rules.mk").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "B =   2");
        assert_eq!(&*lines[1].location.file, "rules.mk");

        assert!(matches!(
            read_lines(&search, "missing.mk"),
            Err(Error::Io { .. })
        ));
        assert!(matches!(read_lines(&search, "inc"), Err(Error::Io { .. })));
    }
}
