//! The macro table and scoped views over it
use indexmap::{IndexMap, IndexSet};

/// How a macro's value is treated when it is referenced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavor {
    /// Stored unexpanded and expanded again on every reference (`=`)
    Recursive,
    /// Stored already expanded (`:=`)
    Simple,
}

impl Flavor {
    /// The name `$(flavor ...)` reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::Recursive => "recursive",
            Flavor::Simple => "simple",
        }
    }
}

/// Where a macro's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Supplied by the caller as a default
    Default,
    /// Read from the process environment
    Environment,
    /// Defined in a rule file
    File,
    /// Supplied by the caller as an override
    CommandLine,
    /// Computed for the recipe being run
    Automatic,
}

impl Origin {
    /// The name `$(origin ...)` reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Default => "default",
            Origin::Environment => "environment",
            Origin::File => "file",
            Origin::CommandLine => "command line",
            Origin::Automatic => "automatic",
        }
    }
}

/// A single macro definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    /// The stored value
    pub value: String,
    /// How the value is expanded
    pub flavor: Flavor,
    /// Where the value came from
    pub origin: Origin,
}

impl Macro {
    /// Create a new macro
    pub fn new(value: impl Into<String>, flavor: Flavor, origin: Origin) -> Self {
        Macro {
            value: value.into(),
            flavor,
            origin,
        }
    }
}

/// Something macros can be looked up in
pub trait Scope {
    /// Look up a macro by name
    fn lookup(&self, name: &str) -> Option<&Macro>;

    /// Check whether a macro is defined
    fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Names of the macros passed to child processes
    fn exports(&self) -> Vec<&str> {
        Vec::new()
    }
}

/// Insertion-ordered mapping from macro names to definitions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroTable {
    entries: IndexMap<String, Macro>,
    exported: IndexSet<String>,
}

impl MacroTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table holding every variable of the process environment
    pub fn from_environment() -> Self {
        let mut table = Self::new();
        for (name, value) in std::env::vars() {
            table.define(name, value, Flavor::Recursive, Origin::Environment);
        }
        table
    }

    /// Define (or redefine) a macro
    pub fn define(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        flavor: Flavor,
        origin: Origin,
    ) {
        self.entries
            .insert(name.into(), Macro::new(value, flavor, origin));
    }

    /// Get a macro's definition
    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.entries.get(name)
    }

    /// Get a macro's raw value
    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|m| m.value.as_str())
    }

    /// Remove a macro, returning its definition
    pub fn remove(&mut self, name: &str) -> Option<Macro> {
        self.exported.shift_remove(name);
        self.entries.shift_remove(name)
    }

    /// Mark a macro as exported to recipe environments
    pub fn export(&mut self, name: impl Into<String>) {
        self.exported.insert(name.into());
    }

    /// Names of exported macros, in export order
    pub fn exported(&self) -> impl Iterator<Item = &str> {
        self.exported.iter().map(|s| s.as_str())
    }

    /// Iterate over all definitions in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Macro)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of defined macros
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Scope for MacroTable {
    fn lookup(&self, name: &str) -> Option<&Macro> {
        self.entries.get(name)
    }

    fn exports(&self) -> Vec<&str> {
        self.exported().collect()
    }
}

/// A private layer of bindings on top of another scope.
///
/// Used for `foreach` and `call` bindings and for automatic variables, so
/// nothing written here is visible through the parent.
pub struct Overlay<'a> {
    parent: &'a dyn Scope,
    locals: IndexMap<String, Macro>,
}

impl<'a> Overlay<'a> {
    /// Create an empty overlay over `parent`
    pub fn new(parent: &'a dyn Scope) -> Self {
        Overlay {
            parent,
            locals: IndexMap::new(),
        }
    }

    /// Bind `name` to an already expanded value
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<String>, origin: Origin) {
        self.locals
            .insert(name.into(), Macro::new(value, Flavor::Simple, origin));
    }
}

impl Scope for Overlay<'_> {
    fn lookup(&self, name: &str) -> Option<&Macro> {
        self.locals
            .get(name)
            .or_else(|| self.parent.lookup(name))
    }

    fn exports(&self) -> Vec<&str> {
        self.parent.exports()
    }
}
