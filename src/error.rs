//! Errors, source locations and the reporting sink
use std::path::PathBuf;
use std::sync::Arc;

/// A position in a rule file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    /// The file the line was read from
    pub file: Arc<str>,
    /// The 1-based line number of the first physical line
    pub line: usize,
}

impl Location {
    /// Create a new location
    pub fn new(file: impl Into<Arc<str>>, line: usize) -> Self {
        Location {
            file: file.into(),
            line,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// An error that occurred while parsing a rule file or a macro expression
pub struct ParseError {
    /// The error message
    pub message: String,
    /// Where the error occurred, if known
    pub location: Option<Location>,
    /// The text around the error
    pub context: String,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, context: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
            location: None,
            context: context.into(),
        }
    }

    pub(crate) fn at(mut self, location: Option<&Location>) -> Self {
        if self.location.is_none() {
            self.location = location.cloned();
        }
        self
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if let Some(location) = &self.location {
            write!(f, "{}: ", location)?;
        }
        write!(f, "{}", self.message)?;
        if !self.context.is_empty() {
            write!(f, ". Context: {}", self.context)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// An error that can occur while reading rules or building targets
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The rule file or a macro expression is malformed
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A macro was referenced that has no value and no default expansion is configured
    #[error("Undefined macro {name}. Context: {context}")]
    UndefinedMacro {
        /// Name of the macro
        name: String,
        /// Text being expanded
        context: String,
    },

    /// A macro kept expanding into itself
    #[error("Recursive macro `{name}' references itself (eventually)")]
    RecursiveMacro {
        /// Name of the macro
        name: String,
    },

    /// A target has to be built but nothing says how
    #[error("No rule to make target `{target}'")]
    MissingRule {
        /// The target
        target: String,
    },

    /// A recipe line exited with a non-zero status
    #[error("Command `{command}' exited with non-zero exit status, {status}")]
    CommandFailed {
        /// The expanded command
        command: String,
        /// The exit status
        status: i32,
    },

    /// A recipe line could not be started
    #[error("Unable to run command `{command}': {source}")]
    CommandSpawn {
        /// The expanded command
        command: String,
        /// The underlying error
        source: std::io::Error,
    },

    /// Raised by `$(error ...)`
    #[error("{location}*** {message}.  Stop.")]
    Explicit {
        /// `file:line: ` prefix, possibly empty
        location: String,
        /// The expanded message
        message: String,
    },

    /// An I/O error on a named file
    #[error("{}: {source}", path.display())]
    Io {
        /// The file being accessed
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// The build was stopped because another job failed
    #[error("Build cancelled after an earlier failure")]
    Cancelled,
}

impl Error {
    /// The process exit status this error should produce
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Explicit { .. } => 2,
            _ => 1,
        }
    }
}

/// Decides what happens to errors that do not have to stop the build.
///
/// With `stop_on_error` set, `report` hands the error back so the caller
/// propagates it with `?`. Otherwise the error is logged (unless `silent`) and
/// the caller carries on with its best-effort fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reporter {
    silent: bool,
    stop_on_error: bool,
}

impl Reporter {
    /// Create a reporter with the given policy
    pub fn new(silent: bool, stop_on_error: bool) -> Self {
        Reporter {
            silent,
            stop_on_error,
        }
    }

    /// Whether errors halt the build
    pub fn stops_on_error(&self) -> bool {
        self.stop_on_error
    }

    /// Report an error, returning it if the build should stop
    pub fn report(&self, err: Error) -> Result<(), Error> {
        if self.stop_on_error {
            return Err(err);
        }
        if !self.silent {
            log::error!("{}", err);
        }
        Ok(())
    }

    /// Log a warning
    pub fn warn(&self, message: &str) {
        if !self.silent {
            log::warn!("{}", message);
        }
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Reporter::new(false, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_halts() {
        let reporter = Reporter::new(false, true);
        let err = reporter
            .report(Error::MissingRule {
                target: "foo".to_string(),
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "No rule to make target `foo'");
    }

    #[test]
    fn test_reporter_keeps_going() {
        let reporter = Reporter::new(true, false);
        assert!(reporter.report(Error::Cancelled).is_ok());
    }

    #[test]
    fn test_exit_codes() {
        let explicit = Error::Explicit {
            location: "Makefile:3: ".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(explicit.exit_code(), 2);
        assert_eq!(explicit.to_string(), "Makefile:3: *** boom.  Stop.");
        assert_eq!(Error::Cancelled.exit_code(), 1);
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new("Unclosed parenthesis", "$(foo")
            .at(Some(&Location::new("Makefile", 7)));
        assert_eq!(
            err.to_string(),
            "Makefile:7: Unclosed parenthesis. Context: $(foo"
        );
    }
}
