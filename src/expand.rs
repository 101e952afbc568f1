//! Evaluating macro expressions against a scope
use crate::error::{Error, Location};
use crate::expr::{Expression, Reference, SyntaxElement};
use crate::functions::Functions;
use crate::macros::{Flavor, Origin, Scope};
use crate::pattern;
use crate::shell::{CommandRunner, Console, HostShell};
use crate::SyntaxKind::*;
use rowan::ast::AstNode;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How many recursive macro expansions may be nested before giving up
pub const MAX_EXPANSION_DEPTH: usize = 200;

/// Expands macro references and function calls.
///
/// An expander is immutable once configured and can be shared between
/// threads; the macros themselves are passed in as a [`Scope`] on every call.
pub struct Expander {
    functions: Functions,
    undefined_expansion: Option<String>,
    directory: PathBuf,
    runner: Arc<dyn CommandRunner>,
    console: Console,
    default_names: HashSet<String>,
    environment_names: HashSet<String>,
}

impl Expander {
    /// Create an expander with the built-in functions, running `$(shell ...)`
    /// through the host shell in the current directory
    pub fn new() -> Self {
        Expander {
            functions: Functions::builtin(),
            undefined_expansion: Some(String::new()),
            directory: PathBuf::from("."),
            runner: Arc::new(HostShell),
            console: Console::stdout(),
            default_names: HashSet::new(),
            environment_names: HashSet::new(),
        }
    }

    /// Use `runner` for `$(shell ...)`
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Send `$(info ...)` output to `console`
    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    /// Resolve file names relative to `directory`
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    /// What an undefined macro expands to; `None` makes it an error
    pub fn with_undefined_expansion(mut self, value: Option<String>) -> Self {
        self.undefined_expansion = value;
        self
    }

    /// Names `$(origin ...)` reports as `default` and as `environment`
    pub fn with_origins(
        mut self,
        defaults: impl IntoIterator<Item = String>,
        environment: impl IntoIterator<Item = String>,
    ) -> Self {
        self.default_names = defaults.into_iter().collect();
        self.environment_names = environment.into_iter().collect();
        self
    }

    /// The function registry
    pub fn functions(&self) -> &Functions {
        &self.functions
    }

    /// The function registry, for registering extra functions
    pub fn functions_mut(&mut self) -> &mut Functions {
        &mut self.functions
    }

    /// The runner used for `$(shell ...)`
    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// The console `$(info ...)` writes to
    pub fn console(&self) -> &Console {
        &self.console
    }

    /// The directory file names are resolved against
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Where the value of `name` came from, as reported by `$(origin ...)`
    pub fn origin_of(&self, name: &str, scope: &dyn Scope) -> &'static str {
        match scope.lookup(name) {
            None => "undefined",
            Some(_) if self.default_names.contains(name) => "default",
            Some(_) if self.environment_names.contains(name) => "environment",
            Some(m) => m.origin.as_str(),
        }
    }

    /// Expand `text` in `scope`
    pub fn expand(&self, text: &str, scope: &dyn Scope) -> Result<String, Error> {
        self.expand_at(text, scope, None)
    }

    /// Expand `text` in `scope`, attributing errors to `location`
    pub fn expand_at(
        &self,
        text: &str,
        scope: &dyn Scope,
        location: Option<&Location>,
    ) -> Result<String, Error> {
        Invocation::root(self, scope, location).expand(text)
    }

    /// The exported macros of `scope` as `NAME=value` pairs for a child
    /// process.
    ///
    /// Recursive values are expanded in `scope`, except those taken over from
    /// the environment, which are passed as they are.
    pub fn exported_env(&self, scope: &dyn Scope) -> Result<Vec<(String, String)>, Error> {
        Invocation::root(self, scope, None).exported_env()
    }
}

impl Default for Expander {
    fn default() -> Self {
        Expander::new()
    }
}

impl std::fmt::Debug for Expander {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Expander")
            .field("undefined_expansion", &self.undefined_expansion)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

/// One expansion in progress: the expander, the scope macros are looked up
/// in, the location errors are attributed to, and the current nesting depth.
///
/// Function handlers receive an invocation and use it to expand their
/// arguments.
#[derive(Clone, Copy)]
pub struct Invocation<'a> {
    expander: &'a Expander,
    scope: &'a dyn Scope,
    location: Option<&'a Location>,
    depth: usize,
    exporting: bool,
}

impl<'a> Invocation<'a> {
    fn root(expander: &'a Expander, scope: &'a dyn Scope, location: Option<&'a Location>) -> Self {
        Invocation {
            expander,
            scope,
            location,
            depth: 0,
            exporting: false,
        }
    }

    /// The expander running this invocation
    pub fn expander(&self) -> &'a Expander {
        self.expander
    }

    /// The scope macros are looked up in
    pub fn scope(&self) -> &'a dyn Scope {
        self.scope
    }

    /// Where the expanded text came from, if known
    pub fn location(&self) -> Option<&'a Location> {
        self.location
    }

    /// `file:line: ` for messages, or nothing if the location is unknown
    pub fn location_prefix(&self) -> String {
        self.location
            .map(|l| format!("{}: ", l))
            .unwrap_or_default()
    }

    /// The same invocation looking macros up in `scope` instead
    pub fn with_scope<'b>(&self, scope: &'b dyn Scope) -> Invocation<'b>
    where
        'a: 'b,
    {
        Invocation {
            expander: self.expander,
            scope,
            location: self.location,
            depth: self.depth,
            exporting: self.exporting,
        }
    }

    /// Expand `text`
    pub fn expand(&self, text: &str) -> Result<String, Error> {
        if !text.contains('$') {
            return Ok(text.to_string());
        }
        let expr = Expression::parse(text).map_err(|e| e.at(self.location))?;
        let mut out = String::with_capacity(text.len());
        self.evaluate_into(expr.syntax().children_with_tokens(), &mut out)?;
        Ok(out)
    }

    /// Expand a reference to the macro `name`.
    ///
    /// Recursive values are expanded again in the current scope, simple ones
    /// are returned as stored.
    pub fn expand_macro(&self, name: &str) -> Result<String, Error> {
        match self.scope.lookup(name) {
            Some(m) => match m.flavor {
                Flavor::Recursive => self.descend(name)?.expand(&m.value),
                Flavor::Simple => Ok(m.value.clone()),
            },
            None => {
                if let Some(value) = self.substitution_reference(name)? {
                    return Ok(value);
                }
                match &self.expander.undefined_expansion {
                    Some(value) => Ok(value.clone()),
                    None => Err(Error::UndefinedMacro {
                        name: name.to_string(),
                        context: self.location_prefix() + name,
                    }),
                }
            }
        }
    }

    /// The environment exported macros give a child process started from
    /// this invocation.
    ///
    /// While the values themselves are being expanded, a `$(shell ...)` in
    /// one of them gets no exported variables, so `export X = $(shell ...)`
    /// does not expand itself forever.
    pub fn exported_env(&self) -> Result<Vec<(String, String)>, Error> {
        if self.exporting {
            return Ok(Vec::new());
        }
        let exporting = Invocation {
            exporting: true,
            ..*self
        };
        let mut env = Vec::new();
        for name in self.scope.exports() {
            let Some(exported) = self.scope.lookup(name) else {
                continue;
            };
            let value = match (exported.flavor, exported.origin) {
                (Flavor::Recursive, origin) if origin != Origin::Environment => {
                    exporting.descend(name)?.expand(&exported.value)?
                }
                _ => exported.value.clone(),
            };
            env.push((name.to_string(), value));
        }
        Ok(env)
    }

    /// One level deeper, failing once the nesting bound is reached
    pub(crate) fn descend(&self, name: &str) -> Result<Invocation<'a>, Error> {
        if self.depth >= MAX_EXPANSION_DEPTH {
            return Err(Error::RecursiveMacro {
                name: name.to_string(),
            });
        }
        Ok(Invocation {
            depth: self.depth + 1,
            ..*self
        })
    }

    fn evaluate_into(
        &self,
        elements: impl Iterator<Item = SyntaxElement>,
        out: &mut String,
    ) -> Result<(), Error> {
        for element in elements {
            match element {
                rowan::NodeOrToken::Token(token) => out.push_str(token.text()),
                rowan::NodeOrToken::Node(node) => match node.kind() {
                    ESCAPE => out.push('$'),
                    REFERENCE => {
                        if let Some(reference) = Reference::cast(node) {
                            out.push_str(&self.evaluate_reference(&reference)?);
                        }
                    }
                    _ => self.evaluate_into(node.children_with_tokens(), out)?,
                },
            }
        }
        Ok(())
    }

    fn evaluate_reference(&self, reference: &Reference) -> Result<String, Error> {
        if let Some(name) = reference.function_name() {
            if let Some(function) = self.expander.functions.get(&name) {
                let args = reference.arguments(function.max_args);
                return function.call(self, &name, args, &reference.to_string());
            }
        }

        let mut name = String::new();
        self.evaluate_into(reference.inner(), &mut name)?;
        self.expand_macro(name.trim_start())
    }

    /// `$(NAME:from=to)` applied to the words of `NAME`
    fn substitution_reference(&self, text: &str) -> Result<Option<String>, Error> {
        let Some((name, rest)) = text.split_once(':') else {
            return Ok(None);
        };
        let Some((from, to)) = rest.split_once('=') else {
            return Ok(None);
        };
        if name.is_empty() {
            return Ok(None);
        }

        let value = self.expand_macro(name)?;
        let (from, to) = if pattern::has_wildcard(from) {
            (from.to_string(), to.to_string())
        } else {
            (format!("%{}", from), format!("%{}", to))
        };
        let words: Vec<String> = value
            .split_whitespace()
            .map(|word| {
                pattern::patsubst_word(&from, &to, word).unwrap_or_else(|| word.to_string())
            })
            .collect();
        Ok(Some(words.join(" ")))
    }
}
