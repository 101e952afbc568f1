//! The top-level interface: read a rule file, then build goals
use crate::config::Options;
use crate::directives::Processor;
use crate::error::{Error, ParseError};
use crate::expand::Expander;
use crate::lines::logical_lines;
use crate::macros::{Flavor, MacroTable, Origin};
use crate::rules::RuleDatabase;
use crate::schedule::Scheduler;
use crate::search::Search;

/// A parsed rule file, ready to build targets.
///
/// ```no_run
/// let options = rmake::Options::default();
/// let make = rmake::Make::load(options).unwrap();
/// make.build(&[]).unwrap();
/// ```
#[derive(Debug)]
pub struct Make {
    options: Options,
    table: MacroTable,
    rules: RuleDatabase,
    expander: Expander,
}

impl Make {
    /// Read `options.file` from `options.directory` and parse it
    pub fn load(options: Options) -> Result<Self, Error> {
        let path = options.directory.join(&options.file);
        let contents = std::fs::read_to_string(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        Make::parse(&contents, options)
    }

    /// Parse the contents of a rule file
    pub fn parse(contents: &str, options: Options) -> Result<Self, Error> {
        Make::parse_with(contents, options, Expander::new())
    }

    /// Parse the contents of a rule file, running commands and writing
    /// output through `expander`'s runner and console
    pub fn parse_with(contents: &str, options: Options, expander: Expander) -> Result<Self, Error> {
        let mut table = if options.environment {
            MacroTable::from_environment()
        } else {
            MacroTable::new()
        };
        let environment: Vec<String> = table.iter().map(|(name, _)| name.to_string()).collect();
        for (name, value) in &options.defaults {
            table.define(name.as_str(), value.as_str(), Flavor::Recursive, Origin::Default);
        }

        let expander = expander
            .with_directory(&options.directory)
            .with_undefined_expansion(options.undefined_expansion.clone())
            .with_origins(options.defaults.keys().cloned(), environment);

        let lines = Processor::new(&mut table, &expander, &options)
            .process(logical_lines(contents, &options.file))?;
        let rules = RuleDatabase::build(&lines, options.recipe_prefix)?;
        log::debug!(
            "{}: {} macros, {} rules, {} pattern rules",
            options.file,
            table.len(),
            rules.goals().len(),
            rules.patterns().len()
        );

        for (name, value) in &options.overrides {
            table.define(name.as_str(), value.as_str(), Flavor::Recursive, Origin::CommandLine);
        }

        Ok(Make {
            options,
            table,
            rules,
            expander,
        })
    }

    /// The macros defined once the rule file has been read
    pub fn macros(&self) -> &MacroTable {
        &self.table
    }

    /// The rules of the file
    pub fn rules(&self) -> &RuleDatabase {
        &self.rules
    }

    /// The options this engine was created with
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Expand `text` against the final macro table
    pub fn expand(&self, text: &str) -> Result<String, Error> {
        self.expander.expand(text, &self.table)
    }

    /// Build `targets`, or the default goal if none are given.
    ///
    /// Returns whether any recipe ran. Goals that were already up to date
    /// are reported on the console unless silent.
    pub fn build(&self, targets: &[&str]) -> Result<bool, Error> {
        let goals: Vec<&str> = if targets.is_empty() {
            match self.rules.default_goal() {
                Some(goal) => vec![goal],
                None => return Err(ParseError::new("No targets", "").into()),
            }
        } else {
            targets.to_vec()
        };

        let vpath = self.expander.expand("$(VPATH)", &self.table)?;
        let search = Search::new(&self.options.directory, &vpath);
        let scheduler = Scheduler::new(
            &self.rules,
            &self.table,
            &self.expander,
            &self.options,
            search,
        );

        let mut any = false;
        for goal in goals {
            let built = scheduler.build(goal)?;
            if !built && !self.options.silent {
                self.expander.console().println(&format!(
                    "{}: Nothing to be done for '{}'.",
                    env!("CARGO_PKG_NAME"),
                    goal
                ));
            }
            any |= built;
        }
        Ok(any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::testing::{captured_console, output, Recorder};
    use maplit::hashmap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    fn options(dir: &Path) -> Options {
        Options {
            environment: false,
            directory: dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn parse(
        contents: &str,
        options: Options,
        recorder: Recorder,
    ) -> (Make, Arc<Recorder>, Arc<Mutex<Vec<u8>>>) {
        let recorder = Arc::new(recorder);
        let (console, buffer) = captured_console();
        let expander = Expander::new()
            .with_runner(recorder.clone())
            .with_console(console);
        let make = Make::parse_with(contents, options, expander).unwrap();
        (make, recorder, buffer)
    }

    #[test]
    fn test_default_goal() {
        let dir = tempfile::tempdir().unwrap();
        let (make, recorder, _) = parse(
            concat!(
                "CC = cc\n",
                "OBJS = main.o util.o\n",
                "app: $(OBJS)\n",
                "\t$(CC) -o $@ $^\n",
                "%.o: %.c\n",
                "\t$(CC) -c $< -o $@\n",
            ),
            options(dir.path()),
            Recorder::new(),
        );
        std::fs::write(dir.path().join("main.c"), "").unwrap();
        std::fs::write(dir.path().join("util.c"), "").unwrap();
        assert!(make.build(&[]).unwrap());
        assert_eq!(
            recorder.lines(),
            vec![
                "cc -c main.c -o main.o",
                "cc -c util.c -o util.o",
                "cc -o app main.o util.o",
            ]
        );
    }

    #[test]
    fn test_nothing_to_be_done() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("done"), "").unwrap();
        let (make, recorder, console) =
            parse("done:\n\ttouch done\n", options(dir.path()), Recorder::new());
        assert!(!make.build(&["done"]).unwrap());
        assert!(recorder.lines().is_empty());
        assert_eq!(output(&console), "rmake: Nothing to be done for 'done'.\n");
    }

    #[test]
    fn test_no_targets() {
        let dir = tempfile::tempdir().unwrap();
        let (make, _, _) = parse("X = 1\n", options(dir.path()), Recorder::new());
        assert!(matches!(make.build(&[]), Err(Error::Parse(_))));
    }

    #[test]
    fn test_defaults_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options(dir.path());
        options.defaults.insert("CFLAGS".to_string(), "-O0".to_string());
        options.overrides.insert("MODE".to_string(), "release".to_string());
        let (make, recorder, _) = parse(
            concat!(
                "MODE = debug\n",
                "PARSED := $(MODE)\n",
                ".PHONY: all\n",
                "all:\n",
                "\t@echo $(MODE) $(PARSED) $(CFLAGS) $(origin CFLAGS) $(origin MODE)\n",
            ),
            options,
            Recorder::new(),
        );
        assert_eq!(make.macros().value("PARSED"), Some("debug"));
        assert_eq!(make.expand("$(MAKE)").unwrap(), "rmake");
        make.build(&["all"]).unwrap();
        assert_eq!(
            recorder.lines(),
            vec!["echo release debug -O0 default command line"]
        );
    }

    #[test]
    fn test_origin_of_defaulted_name() {
        let dir = tempfile::tempdir().unwrap();
        let (make, _, _) = parse("MAKE = other\n", options(dir.path()), Recorder::new());
        assert_eq!(make.expand("$(MAKE) $(origin MAKE)").unwrap(), "other default");
    }

    #[test]
    fn test_shell_during_parse() {
        let dir = tempfile::tempdir().unwrap();
        let (make, _, console) = parse(
            concat!(
                "FILES := $(shell ls)\n",
                "$(info found $(FILES))\n",
            ),
            options(dir.path()),
            Recorder::new().with_output("ls", "a.c\nb.c\n"),
        );
        assert_eq!(make.macros().value("FILES"), Some("a.c b.c"));
        assert_eq!(output(&console), "found a.c b.c\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_exported_macro_in_shell() {
        let dir = tempfile::tempdir().unwrap();
        let make = Make::parse(
            concat!(
                "export RMAKE_GREETING = bar\n",
                "X := $(shell echo $$RMAKE_GREETING)\n",
            ),
            options(dir.path()),
        )
        .unwrap();
        assert_eq!(make.macros().value("X"), Some("bar"));
    }

    #[test]
    fn test_error_function() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::new());
        let expander = Expander::new().with_runner(recorder);
        let err = Make::parse_with(
            "ifndef NEEDED\n$(error NEEDED is not set)\nendif\n",
            options(dir.path()),
            expander,
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(
            err.to_string(),
            "Makefile:2: *** NEEDED is not set.  Stop."
        );
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("build.mk"), "A = 1\nall:\n").unwrap();
        let make = Make::load(Options {
            file: "build.mk".to_string(),
            ..options(dir.path())
        })
        .unwrap();
        assert_eq!(make.rules().default_goal(), Some("all"));
        assert_eq!(make.options().file, "build.mk");

        let missing = Make::load(options(dir.path())).unwrap_err();
        assert!(matches!(missing, Error::Io { .. }));
    }

    #[test]
    fn test_vpath_and_includes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.c"), "").unwrap();
        std::fs::write(
            dir.path().join("rules.mk"),
            "%.o: %.c\n\tcc -c $< -o $@\n",
        )
        .unwrap();
        let (make, recorder, _) = parse(
            "VPATH = src\ninclude rules.mk\n",
            options(dir.path()),
            Recorder::new(),
        );
        make.build(&["lib.o"]).unwrap();
        assert_eq!(recorder.lines(), vec!["cc -c src/lib.c -o lib.o"]);
    }

    #[test]
    fn test_environment_seeds_macros() {
        let dir = tempfile::tempdir().unwrap();
        let (make, _, _) = parse(
            "X ?= fallback\n",
            Options {
                environment: true,
                ..options(dir.path())
            },
            Recorder::new(),
        );
        if let Ok(path) = std::env::var("PATH") {
            assert_eq!(make.expand("$(PATH)").unwrap(), path);
            assert_eq!(make.expand("$(origin PATH)").unwrap(), "environment");
        }
        let expected = hashmap! {
            "X" => "file",
            "MAKE" => "default",
            "RMAKE_TEST_UNSET" => "undefined",
        };
        for (name, origin) in expected {
            assert_eq!(make.expand(&format!("$(origin {})", name)).unwrap(), origin);
        }
    }
}
