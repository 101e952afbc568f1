//! Options controlling how a rule file is read and built
use crate::error::Reporter;
use indexmap::IndexMap;
use std::path::PathBuf;

/// Settings for reading rule files and running builds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Most recipes run at the same time; `1` builds everything on one thread
    pub jobs: usize,
    /// Do not echo recipe lines or log recoverable errors
    pub silent: bool,
    /// Stop at the first error instead of carrying on with other targets
    pub stop_on_error: bool,
    /// Print recipe lines instead of running them
    pub just_print: bool,
    /// The character that starts a recipe line
    pub recipe_prefix: char,
    /// What an undefined macro expands to; `None` makes it an error
    pub undefined_expansion: Option<String>,
    /// Whether `ifeq`/`ifneq`/`ifdef`/`ifndef` are processed
    pub conditionals: bool,
    /// Whether the process environment seeds the macro table
    pub environment: bool,
    /// Macros defined before the rule file is read
    pub defaults: IndexMap<String, String>,
    /// Macros forced after the rule file is read
    pub overrides: IndexMap<String, String>,
    /// Directory file names are resolved against and recipes run in
    pub directory: PathBuf,
    /// Name of the rule file, used in messages
    pub file: String,
}

impl Default for Options {
    fn default() -> Self {
        let mut defaults = IndexMap::new();
        defaults.insert("MAKE".to_string(), env!("CARGO_PKG_NAME").to_string());
        Options {
            jobs: 1,
            silent: false,
            stop_on_error: true,
            just_print: false,
            recipe_prefix: '\t',
            undefined_expansion: Some(String::new()),
            conditionals: true,
            environment: true,
            defaults,
            overrides: IndexMap::new(),
            directory: PathBuf::from("."),
            file: "Makefile".to_string(),
        }
    }
}

impl Options {
    /// The error policy these options describe
    pub fn reporter(&self) -> Reporter {
        Reporter::new(self.silent, self.stop_on_error)
    }

    /// The job budget, never less than one
    pub fn job_limit(&self) -> usize {
        self.jobs.max(1)
    }
}
