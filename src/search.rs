//! Locating files: the engine directory, `VPATH` and glob patterns
use crate::words::{is_quoted, strip_quotes};
use globset::GlobBuilder;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Looks files up relative to a directory, falling back to `VPATH` entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Search {
    directory: PathBuf,
    vpath: Vec<PathBuf>,
}

impl Search {
    /// Create a search rooted at `directory`, using the raw value of `VPATH`
    pub fn new(directory: impl Into<PathBuf>, vpath: &str) -> Self {
        Search {
            directory: directory.into(),
            vpath: split_vpath(vpath).into_iter().map(PathBuf::from).collect(),
        }
    }

    /// The directory relative names are resolved against
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Find `name` in the directory or along `VPATH`
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        std::iter::once(self.directory.join(name))
            .chain(self.vpath.iter().map(|dir| self.directory.join(dir).join(name)))
            .find(|path| path.exists())
    }

    /// The name under which `name` was found, relative to the directory
    /// when possible
    pub fn locate(&self, name: &str) -> Option<String> {
        let path = self.find(name)?;
        let shown = path.strip_prefix(&self.directory).unwrap_or(&path);
        Some(shown.to_string_lossy().into_owned())
    }

    /// Whether `name` exists in the directory or along `VPATH`
    pub fn exists(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Whether `name` is a regular file in the directory or along `VPATH`
    pub fn find_file(&self, name: &str) -> Option<PathBuf> {
        self.find(name).filter(|path| path.is_file())
    }

    /// Modification time of `name`, if it can be found
    pub fn modified(&self, name: &str) -> Option<SystemTime> {
        let path = self.find(name)?;
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    /// Expand a word that may hold glob characters.
    ///
    /// A word without glob characters, or a pattern that matches nothing, is
    /// returned unchanged.
    pub fn glob(&self, word: &str) -> Vec<String> {
        if !has_glob_chars(word) {
            return vec![word.to_string()];
        }
        let mut matches = glob_in(&self.directory, word);
        for dir in &self.vpath {
            let pattern = format!("{}/{}", dir.display(), word);
            matches.extend(glob_in(&self.directory, &pattern));
        }
        if matches.is_empty() {
            vec![word.to_string()]
        } else {
            matches
        }
    }
}

/// Expand a list of words the way prerequisites are expanded.
///
/// Quoted words lose their quotes and are never globbed.
pub(crate) fn expand_words(search: &Search, words: &[String]) -> Vec<String> {
    words
        .iter()
        .filter(|word| !word.is_empty())
        .flat_map(|word| {
            if is_quoted(word) {
                vec![strip_quotes(word)]
            } else {
                search.glob(word)
            }
        })
        .collect()
}

/// Split a `VPATH` value by `;`, else `:`, else whitespace.
///
/// The first separator that yields more than one entry wins.
pub(crate) fn split_vpath(value: &str) -> Vec<String> {
    let entries = |parts: Vec<&str>| -> Vec<String> {
        parts
            .into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    };
    for separator in [';', ':'] {
        let parts = entries(value.split(separator).collect());
        if parts.len() > 1 {
            return parts;
        }
    }
    entries(value.split_whitespace().collect())
}

/// Whether `word` contains `*`, `?` or `[`
pub(crate) fn has_glob_chars(word: &str) -> bool {
    word.contains(['*', '?', '['])
}

/// All paths matching `pattern`, sorted, relative to `directory` unless the
/// pattern is absolute.
pub(crate) fn glob_in(directory: &Path, pattern: &str) -> Vec<String> {
    let matcher = match GlobBuilder::new(pattern).literal_separator(true).build() {
        Ok(glob) => glob.compile_matcher(),
        Err(e) => {
            log::debug!("invalid glob pattern {:?}: {}", pattern, e);
            return Vec::new();
        }
    };

    let components: Vec<&str> = pattern.split('/').collect();
    let fixed = components
        .iter()
        .take_while(|c| !has_glob_chars(c))
        .count();
    let mut base = components[..fixed].join("/");
    if base.is_empty() && pattern.starts_with('/') {
        base.push('/');
    }
    let recursive = components[fixed..].iter().any(|c| c.contains("**"));
    let depth = components.len() - fixed;

    let root = if base.is_empty() {
        directory.to_path_buf()
    } else {
        directory.join(&base)
    };

    let mut walker = WalkDir::new(&root).min_depth(1).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(depth);
    }

    let mut result = Vec::new();
    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        let Ok(relative) = entry.path().strip_prefix(&root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let candidate = if base.is_empty() {
            relative
        } else {
            format!("{}/{}", base.trim_end_matches('/'), relative)
        };
        if matcher.is_match(&candidate) {
            result.push(candidate);
        }
    }
    result.sort();
    result
}

/// Normalise a path lexically: drop `.` components and resolve `..` where
/// possible.
pub(crate) fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." if parts.last().is_some_and(|p| *p != "..") => {
                parts.pop();
            }
            ".." if absolute => {}
            part => parts.push(part),
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
