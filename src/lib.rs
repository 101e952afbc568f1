#![allow(clippy::tabs_in_doc_comments)] // Makefile uses tabs
#![warn(missing_docs)]

//! A POSIX/GNU compatible make engine
//!
//! Rule files are read into logical lines, macro definitions and conditionals
//! are evaluated while reading, and the remaining lines are turned into a rule
//! database. Targets are then brought up to date, running recipes in parallel
//! up to a job budget.
//!
//! Example:
//!
//! ```rust
//! use rmake::{Expander, Flavor, MacroTable, Origin};
//!
//! let mut table = MacroTable::new();
//! table.define("OBJS", "main.o util.o", Flavor::Recursive, Origin::File);
//!
//! let expander = Expander::new();
//! assert_eq!(
//!     expander.expand("$(OBJS:.o=.c)", &table).unwrap(),
//!     "main.c util.c"
//! );
//! ```
//!
//! Building a rule file:
//!
//! ```rust,no_run
//! let contents = r#"CC = cc
//!
//! hello: hello.c
//! 	$(CC) -o $@ $<
//! "#;
//! let make = rmake::Make::parse(contents, rmake::Options::default()).unwrap();
//! make.build(&["hello"]).unwrap();
//! ```

mod config;
mod directives;
mod engine;
mod error;
mod expand;
mod expr;
mod functions;
mod implicit;
mod include;
mod lex;
mod lines;
mod macros;
mod pattern;
mod resolve;
mod rules;
mod schedule;
mod search;
mod shell;
mod words;

pub use config::Options;
pub use directives::Processor;
pub use engine::Make;
pub use error::{Error, Location, ParseError, Reporter};
pub use expand::{Expander, Invocation, MAX_EXPANSION_DEPTH};
pub use expr::{Expression, Reference};
pub use functions::{Function, Functions, Handler};
pub use lines::{logical_lines, strip_comment, Line};
pub use macros::{Flavor, Macro, MacroTable, Origin, Overlay, Scope};
pub use resolve::Resolver;
pub use rules::{PatternRule, RecipeLine, Rule, RuleDatabase};
pub use schedule::Scheduler;
pub use search::Search;
pub use shell::{CommandRunner, Console, HostShell, ShellCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(non_camel_case_types)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum SyntaxKind {
    DOLLAR = 0,
    LPAREN,
    RPAREN,
    LBRACE,
    RBRACE,
    COMMA,
    WHITESPACE,
    TEXT,

    // composite nodes
    ROOT, // A whole expression
    ESCAPE, // `$$`
    REFERENCE, // A macro reference or function call
    NAME,
    ARGS,
}

/// Convert our `SyntaxKind` into the rowan `SyntaxKind`.
impl From<SyntaxKind> for rowan::SyntaxKind {
    fn from(kind: SyntaxKind) -> Self {
        Self(kind as u16)
    }
}
