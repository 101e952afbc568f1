//! Built-in functions such as `$(subst ...)` and `$(foreach ...)`
use crate::error::{Error, ParseError};
use crate::expand::{Expander, Invocation};
use crate::macros::{Origin, Overlay, Scope};
use crate::pattern;
use crate::search::{glob_in, has_glob_chars, normalize_path};
use crate::shell::ShellCommand;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

/// Signature of a function implementation.
///
/// Arguments are passed unexpanded; the handler expands what it needs
/// through the invocation.
pub type Handler = fn(&Invocation, Vec<String>) -> Result<String, Error>;

/// A registered function
#[derive(Debug, Clone, Copy)]
pub struct Function {
    /// Fewest arguments the function accepts
    pub min_args: usize,
    /// Most arguments the function accepts; later commas belong to the last one
    pub max_args: Option<usize>,
    /// The implementation
    pub handler: Handler,
}

impl Function {
    pub(crate) fn call(
        &self,
        invocation: &Invocation,
        name: &str,
        args: Vec<String>,
        context: &str,
    ) -> Result<String, Error> {
        if args.len() < self.min_args {
            return Err(ParseError::new(
                format!(
                    "Insufficient number of arguments ({}) to function `{}'",
                    args.len(),
                    name
                ),
                context,
            )
            .at(invocation.location())
            .into());
        }
        (self.handler)(invocation, args)
    }
}

/// The registry of functions available to `$(name args)`
#[derive(Debug, Clone, Default)]
pub struct Functions {
    table: HashMap<String, Function>,
}

impl Functions {
    /// A registry with no functions
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with every built-in function
    pub fn builtin() -> Self {
        let mut functions = Self::empty();
        let builtins: &[(&str, usize, Option<usize>, Handler)] = &[
            ("subst", 3, Some(3), subst),
            ("patsubst", 3, Some(3), patsubst),
            ("strip", 1, Some(1), strip),
            ("findstring", 2, Some(2), findstring),
            ("filter", 2, Some(2), filter),
            ("filter-out", 2, Some(2), filter_out),
            ("sort", 1, Some(1), sort),
            ("word", 2, Some(2), word),
            ("wordlist", 3, Some(3), wordlist),
            ("words", 1, Some(1), words),
            ("firstword", 1, Some(1), firstword),
            ("lastword", 1, Some(1), lastword),
            ("dir", 1, Some(1), dir),
            ("notdir", 1, Some(1), notdir),
            ("suffix", 1, Some(1), suffix),
            ("basename", 1, Some(1), basename),
            ("addsuffix", 2, Some(2), addsuffix),
            ("addprefix", 2, Some(2), addprefix),
            ("join", 2, Some(2), join),
            ("wildcard", 1, Some(1), wildcard),
            ("realpath", 1, Some(1), realpath),
            ("abspath", 1, Some(1), abspath),
            ("if", 2, Some(3), if_),
            ("or", 1, None, or),
            ("and", 1, None, and),
            ("foreach", 3, Some(3), foreach),
            ("call", 1, None, call),
            ("error", 1, Some(1), error),
            ("warning", 1, Some(1), warning),
            ("info", 1, Some(1), info),
            ("origin", 1, Some(1), origin),
            ("flavor", 1, Some(1), flavor),
            ("value", 1, Some(1), value),
            ("shell", 1, Some(1), shell),
        ];
        for (name, min, max, handler) in builtins {
            functions.register(*name, *min, *max, *handler);
        }
        functions
    }

    /// Register `name`, replacing any function of the same name
    pub fn register(
        &mut self,
        name: impl Into<String>,
        min_args: usize,
        max_args: Option<usize>,
        handler: Handler,
    ) {
        self.table.insert(
            name.into(),
            Function {
                min_args,
                max_args,
                handler,
            },
        );
    }

    /// Look up a function
    pub fn get(&self, name: &str) -> Option<&Function> {
        self.table.get(name)
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }
}

fn expand_all(inv: &Invocation, args: &[String]) -> Result<Vec<String>, Error> {
    args.iter().map(|arg| inv.expand(arg)).collect()
}

fn join_words<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut result = String::new();
    for word in words {
        if !result.is_empty() {
            result.push(' ');
        }
        result.push_str(word.as_ref());
    }
    result
}

fn subst(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let [from, to, text] = <[String; 3]>::try_from(expand_all(inv, &args)?)
        .map_err(|_| arity_error(inv, "subst"))?;
    if from.is_empty() {
        return Ok(text + &to);
    }
    Ok(text.replace(&from, &to))
}

fn patsubst(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let [pat, rep, text] = <[String; 3]>::try_from(expand_all(inv, &args)?)
        .map_err(|_| arity_error(inv, "patsubst"))?;
    let pat = pat.trim();
    let rep = rep.trim();
    Ok(join_words(text.split_whitespace().map(|word| {
        pattern::patsubst_word(pat, rep, word).unwrap_or_else(|| word.to_string())
    })))
}

fn arity_error(inv: &Invocation, name: &str) -> Error {
    ParseError::new(format!("Wrong number of arguments to function `{}'", name), name)
        .at(inv.location())
        .into()
}

fn strip(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    Ok(join_words(inv.expand(&args[0])?.split_whitespace()))
}

fn findstring(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let find = inv.expand(&args[0])?;
    let text = inv.expand(&args[1])?;
    if text.split_whitespace().any(|word| word == find) {
        Ok(find)
    } else {
        Ok(String::new())
    }
}

fn filter_words(inv: &Invocation, args: &[String], keep: bool) -> Result<String, Error> {
    let words = inv.expand(&args[0])?;
    let text = inv.expand(&args[1])?;
    let words: HashSet<&str> = words.split_whitespace().collect();
    Ok(join_words(
        text.split_whitespace()
            .filter(|word| words.contains(word) == keep),
    ))
}

fn filter(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    filter_words(inv, &args, true)
}

fn filter_out(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    filter_words(inv, &args, false)
}

fn sort(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let text = inv.expand(&args[0])?;
    Ok(join_words(text.split_whitespace().collect::<BTreeSet<_>>()))
}

fn parse_index(inv: &Invocation, text: &str, which: &str, function: &str) -> Result<usize, Error> {
    text.trim().parse::<usize>().map_err(|_| {
        ParseError::new(
            format!("non-numeric {} argument to `{}' function", which, function),
            text,
        )
        .at(inv.location())
        .into()
    })
}

fn word(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let n = inv.expand(&args[0])?;
    let n = parse_index(inv, &n, "first", "word")?;
    if n == 0 {
        return Err(ParseError::new(
            "first argument to `word' function must be greater than 0",
            args[0].as_str(),
        )
        .at(inv.location())
        .into());
    }
    let text = inv.expand(&args[1])?;
    Ok(text
        .split_whitespace()
        .nth(n - 1)
        .unwrap_or_default()
        .to_string())
}

fn wordlist(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let start = inv.expand(&args[0])?;
    let start = parse_index(inv, &start, "first", "wordlist")?;
    if start == 0 {
        return Err(ParseError::new(
            "invalid first argument to `wordlist' function",
            args[0].as_str(),
        )
        .at(inv.location())
        .into());
    }
    let end = inv.expand(&args[1])?;
    let end = parse_index(inv, &end, "second", "wordlist")?;
    if end < start {
        return Ok(String::new());
    }
    let text = inv.expand(&args[2])?;
    Ok(join_words(
        text.split_whitespace()
            .skip(start - 1)
            .take(end - start + 1),
    ))
}

fn words(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    Ok(inv.expand(&args[0])?.split_whitespace().count().to_string())
}

fn firstword(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let text = inv.expand(&args[0])?;
    Ok(text.split_whitespace().next().unwrap_or_default().to_string())
}

fn lastword(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let text = inv.expand(&args[0])?;
    Ok(text.split_whitespace().last().unwrap_or_default().to_string())
}

fn map_words(
    inv: &Invocation,
    text: &str,
    f: impl Fn(&str) -> Option<String>,
) -> Result<String, Error> {
    let text = inv.expand(text)?;
    Ok(join_words(text.split_whitespace().filter_map(f)))
}

/// Byte offset of the `.` starting the suffix of the last path component
fn suffix_start(word: &str) -> Option<usize> {
    let name_start = word.rfind('/').map_or(0, |i| i + 1);
    word[name_start..].rfind('.').map(|i| name_start + i)
}

fn dir(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    map_words(inv, &args[0], |word| {
        Some(match word.rfind('/') {
            Some(i) => word[..=i].to_string(),
            None => "./".to_string(),
        })
    })
}

fn notdir(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    map_words(inv, &args[0], |word| {
        Some(match word.rfind('/') {
            Some(i) => word[i + 1..].to_string(),
            None => word.to_string(),
        })
    })
}

fn suffix(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    map_words(inv, &args[0], |word| {
        suffix_start(word).map(|i| word[i..].to_string())
    })
}

fn basename(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    map_words(inv, &args[0], |word| {
        Some(match suffix_start(word) {
            Some(i) => word[..i].to_string(),
            None => word.to_string(),
        })
    })
}

fn addsuffix(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let suffix = inv.expand(&args[0])?;
    map_words(inv, &args[1], |word| Some(format!("{}{}", word, suffix)))
}

fn addprefix(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let prefix = inv.expand(&args[0])?;
    map_words(inv, &args[1], |word| Some(format!("{}{}", prefix, word)))
}

fn join(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let first = inv.expand(&args[0])?;
    let second = inv.expand(&args[1])?;
    let mut first = first.split_whitespace();
    let mut second = second.split_whitespace();
    let mut result = Vec::new();
    loop {
        match (first.next(), second.next()) {
            (None, None) => break,
            (a, b) => result.push(format!("{}{}", a.unwrap_or_default(), b.unwrap_or_default())),
        }
    }
    Ok(join_words(result))
}

fn wildcard(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let directory = inv.expander().directory();
    let text = inv.expand(&args[0])?;
    let mut result = Vec::new();
    for word in text.split_whitespace() {
        if has_glob_chars(word) {
            result.extend(glob_in(directory, word));
        } else if directory.join(word).exists() {
            result.push(word.to_string());
        }
    }
    Ok(join_words(result))
}

fn realpath(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let directory = inv.expander().directory().to_path_buf();
    map_words(inv, &args[0], |word| {
        directory
            .join(word)
            .canonicalize()
            .ok()
            .map(|path| path.display().to_string())
    })
}

fn absolute_directory(inv: &Invocation) -> Result<PathBuf, Error> {
    let directory = inv.expander().directory();
    if directory.is_absolute() {
        return Ok(directory.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|source| Error::Io {
        path: directory.to_path_buf(),
        source,
    })?;
    Ok(cwd.join(directory))
}

fn abspath(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let base = absolute_directory(inv)?;
    map_words(inv, &args[0], |word| {
        Some(normalize_path(&base.join(word).to_string_lossy()))
    })
}

fn truthy(inv: &Invocation, text: &str) -> Result<Option<String>, Error> {
    let value = inv.expand(text)?;
    Ok(if value.trim().is_empty() {
        None
    } else {
        Some(value)
    })
}

fn if_(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    if truthy(inv, &args[0])?.is_some() {
        inv.expand(&args[1])
    } else {
        match args.get(2) {
            Some(otherwise) => inv.expand(otherwise),
            None => Ok(String::new()),
        }
    }
}

fn or(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    for arg in &args {
        if let Some(value) = truthy(inv, arg)? {
            return Ok(value);
        }
    }
    Ok(String::new())
}

fn and(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let mut last = String::new();
    for arg in &args {
        match truthy(inv, arg)? {
            Some(value) => last = value,
            None => return Ok(String::new()),
        }
    }
    Ok(last)
}

fn foreach(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let name = inv.expand(&args[0])?.trim().to_string();
    let list = inv.expand(&args[1])?;
    let mut result = Vec::new();
    for word in list.split_whitespace() {
        let mut overlay = Overlay::new(inv.scope());
        overlay.bind(name.as_str(), word, Origin::Automatic);
        result.push(inv.with_scope(&overlay).expand(&args[2])?);
    }
    Ok(join_words(result))
}

fn call(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let name = inv.expand(&args[0])?.trim().to_string();
    let values = expand_all(inv, &args[1..])?;

    let mut overlay = Overlay::new(inv.scope());
    overlay.bind("0", name.as_str(), Origin::Automatic);
    for (i, value) in values.iter().enumerate() {
        overlay.bind((i + 1).to_string(), value.as_str(), Origin::Automatic);
    }
    let inner = inv.with_scope(&overlay).descend(&name)?;

    if let Some(function) = inv.expander().functions().get(&name) {
        let mut values = values;
        if let Some(max) = function.max_args {
            if max > 0 && values.len() > max {
                let rest = values.split_off(max - 1).join(",");
                values.push(rest);
            }
        }
        return function.call(&inner, &name, values, &args.join(","));
    }
    if !overlay.contains(&name) {
        return Ok(String::new());
    }
    inner.expand_macro(&name)
}

fn error(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    Err(Error::Explicit {
        location: inv.location_prefix(),
        message: inv.expand(&args[0])?,
    })
}

fn warning(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let message = inv.expand(&args[0])?;
    log::warn!("{}{}", inv.location_prefix(), message);
    Ok(String::new())
}

fn info(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let message = inv.expand(&args[0])?;
    inv.expander().console().println(&message);
    Ok(String::new())
}

fn origin(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let name = inv.expand(&args[0])?;
    Ok(inv.expander().origin_of(name.trim(), inv.scope()).to_string())
}

fn flavor(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let name = inv.expand(&args[0])?;
    Ok(match inv.scope().lookup(name.trim()) {
        Some(m) => m.flavor.as_str().to_string(),
        None => "undefined".to_string(),
    })
}

fn value(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let name = inv.expand(&args[0])?;
    Ok(inv
        .scope()
        .lookup(name.trim())
        .map(|m| m.value.clone())
        .unwrap_or_default())
}

/// Run `command` through the expander's runner with `env` added to its
/// environment, turning its output into a single line
pub(crate) fn run_shell(
    expander: &Expander,
    command: &str,
    env: Vec<(String, String)>,
) -> Result<String, Error> {
    let mut shell = ShellCommand::new(command, expander.directory());
    shell.env = env;
    let output = expander
        .runner()
        .capture(&shell)
        .map_err(|source| Error::CommandSpawn {
            command: command.to_string(),
            source,
        })?;
    Ok(output
        .trim_end_matches(['\n', '\r'])
        .replace("\r\n", " ")
        .replace('\n', " "))
}

fn shell(inv: &Invocation, args: Vec<String>) -> Result<String, Error> {
    let command = inv.expand(&args[0])?;
    run_shell(inv.expander(), &command, inv.exported_env()?)
}
