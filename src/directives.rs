//! Macro definitions, conditionals and other directives
use crate::config::Options;
use crate::error::{Error, Location, ParseError, Reporter};
use crate::expand::Expander;
use crate::functions::run_shell;
use crate::include::{read_lines, Include, MAX_INCLUDE_DEPTH};
use crate::lines::{strip_comment, Line};
use crate::macros::{Flavor, MacroTable, Origin, Scope};
use crate::search::Search;
use crate::words::{split_words, strip_quotes};

/// Assignment operators, longest first
const OPERATORS: &[&str] = &[":::=", "::=", ":=", "+=", "?=", "!=", "="];

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '@' | '^' | '<')
}

/// Strip `word` from the start of `text` if it is followed by whitespace or
/// the end of the text.
fn strip_word<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(word)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Keyword {
    Define,
    Endef,
    If,
    Else(String),
    Endif,
    Other,
}

impl Keyword {
    fn of(text: &str) -> Keyword {
        let trimmed = text.trim_start();
        let end = trimmed
            .find(|c: char| c.is_whitespace() || c == '(')
            .unwrap_or(trimmed.len());
        let (word, rest) = trimmed.split_at(end);
        match word {
            "define" => Keyword::Define,
            "export" | "override" if strip_word(rest.trim_start(), "define").is_some() => {
                Keyword::Define
            }
            "endef" => Keyword::Endef,
            "ifeq" | "ifneq" | "ifdef" | "ifndef" => Keyword::If,
            "else" => Keyword::Else(rest.trim().to_string()),
            "endif" => Keyword::Endif,
            _ => Keyword::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Assignment<'a> {
    export: bool,
    name: &'a str,
    operator: &'a str,
    value: &'a str,
}

/// Recognise `[export ]NAME op value`.
fn parse_assignment(text: &str) -> Option<Assignment<'_>> {
    let mut rest = text.trim_start();
    let export = match strip_word(rest, "export") {
        Some(after) => {
            rest = after;
            true
        }
        None => false,
    };
    let name_end = rest.find(|c: char| !is_name_char(c)).unwrap_or(rest.len());
    if name_end == 0 {
        return None;
    }
    let name = &rest[..name_end];
    let after = rest[name_end..].trim_start();
    let operator = OPERATORS.iter().find(|op| after.starts_with(*op))?;
    Some(Assignment {
        export,
        name,
        operator,
        value: after[operator.len()..].trim(),
    })
}

/// Recognise `[export ]define NAME [op]`.
fn parse_define(text: &str) -> Option<(bool, String, String)> {
    let mut rest = text.trim();
    let mut export = false;
    if let Some(after) = strip_word(rest, "export") {
        export = true;
        rest = after;
    } else if let Some(after) = strip_word(rest, "override") {
        rest = after;
    }
    let rest = strip_word(rest, "define")?;
    let name_end = rest
        .find(|c: char| c.is_whitespace() || matches!(c, '=' | ':' | '+' | '?' | '!'))
        .unwrap_or(rest.len());
    let name = &rest[..name_end];
    if name.is_empty() {
        return None;
    }
    let operator = match rest[name_end..].trim() {
        "" => "=",
        op if OPERATORS.contains(&op) => op,
        _ => return None,
    };
    Some((export, name.to_string(), operator.to_string()))
}

/// A `define` block being collected
#[derive(Debug)]
struct Definition {
    export: bool,
    name: String,
    operator: String,
    depth: usize,
    body: Vec<String>,
    location: Location,
}

impl Definition {
    /// Take the next raw line; returns true at the closing `endef`
    fn feed(&mut self, line: &Line) -> bool {
        match Keyword::of(&line.text) {
            Keyword::Endef if self.depth == 0 => return true,
            Keyword::Endef => self.depth -= 1,
            Keyword::Define => self.depth += 1,
            _ => {}
        }
        self.body.push(line.text.clone());
        false
    }
}

/// An open conditional: both branches are collected raw, and the selected
/// one is processed once the matching `endif` arrives.
#[derive(Debug)]
struct Conditional {
    taken: bool,
    weight: usize,
    in_else: bool,
    chain: bool,
    define_depth: usize,
    then: Vec<Line>,
    otherwise: Vec<Line>,
    location: Location,
}

impl Conditional {
    fn new(taken: bool, location: Location) -> Self {
        Conditional {
            taken,
            weight: 0,
            in_else: false,
            chain: false,
            define_depth: 0,
            then: Vec::new(),
            otherwise: Vec::new(),
            location,
        }
    }

    fn branch(&mut self) -> &mut Vec<Line> {
        if self.in_else {
            &mut self.otherwise
        } else {
            &mut self.then
        }
    }

    /// Take the next line; returns true once the conditional is closed
    fn feed(&mut self, line: Line, recipe_prefix: char) -> Result<bool, Error> {
        if line.text.starts_with(recipe_prefix) {
            self.branch().push(line);
            return Ok(false);
        }

        let keyword = if self.define_depth > 0 {
            match Keyword::of(&line.text) {
                k @ (Keyword::Define | Keyword::Endef) => k,
                _ => Keyword::Other,
            }
        } else {
            let text = strip_comment(&line.text).map_err(|e| e.at(Some(&line.location)))?;
            Keyword::of(text)
        };

        match keyword {
            Keyword::Define => self.define_depth += 1,
            Keyword::Endef => self.define_depth = self.define_depth.saturating_sub(1),
            Keyword::If => self.weight += 1,
            Keyword::Endif if self.weight == 0 => {
                if self.chain {
                    self.otherwise.push(Line::new("endif", line.location));
                }
                return Ok(true);
            }
            Keyword::Endif => self.weight -= 1,
            Keyword::Else(rest) if self.weight == 0 => {
                if !self.in_else {
                    self.in_else = true;
                    if rest.is_empty() {
                        return Ok(false);
                    }
                    if Keyword::of(&rest) != Keyword::If {
                        return Err(ParseError::new(
                            "Extraneous text after `else' directive",
                            line.text,
                        )
                        .at(Some(&line.location))
                        .into());
                    }
                    self.chain = true;
                    self.otherwise.push(Line::new(rest, line.location));
                    return Ok(false);
                }
                if !self.chain {
                    return Err(ParseError::new("Only one `else' per conditional", line.text)
                        .at(Some(&line.location))
                        .into());
                }
            }
            _ => {}
        }
        self.branch().push(line);
        Ok(false)
    }

    fn into_selected(self) -> Vec<Line> {
        if self.taken {
            self.then
        } else {
            self.otherwise
        }
    }
}

enum Block {
    Define(Definition),
    Conditional(Conditional),
}

/// Evaluates definitions, conditionals and includes while reading a rule
/// file, leaving the lines that describe rules.
///
/// Recipe lines are passed through unexpanded. Other lines holding a `$` are
/// expanded against the macros defined so far.
pub struct Processor<'a> {
    table: &'a mut MacroTable,
    expander: &'a Expander,
    options: &'a Options,
    reporter: Reporter,
    include_depth: usize,
}

impl<'a> Processor<'a> {
    /// Create a processor defining macros in `table`
    pub fn new(table: &'a mut MacroTable, expander: &'a Expander, options: &'a Options) -> Self {
        Processor {
            table,
            expander,
            options,
            reporter: options.reporter(),
            include_depth: 0,
        }
    }

    /// Process logical lines, returning the effective lines
    pub fn process(&mut self, lines: Vec<Line>) -> Result<Vec<Line>, Error> {
        let mut output = Vec::new();
        let mut definition: Option<Definition> = None;
        let mut conditional: Option<Conditional> = None;

        for line in lines {
            if let Some(open) = definition.as_mut() {
                if open.feed(&line) {
                    if let Some(done) = definition.take() {
                        self.finish_definition(done)?;
                    }
                }
                continue;
            }

            if let Some(open) = conditional.as_mut() {
                if open.feed(line, self.options.recipe_prefix)? {
                    if let Some(done) = conditional.take() {
                        let selected = done.into_selected();
                        output.extend(self.process(selected)?);
                    }
                }
                continue;
            }

            match self.process_line(line, &mut output)? {
                Some(Block::Define(open)) => definition = Some(open),
                Some(Block::Conditional(open)) => conditional = Some(open),
                None => {}
            }
        }

        if let Some(open) = definition {
            return Err(ParseError::new("Missing `endef', unterminated `define'", open.name)
                .at(Some(&open.location))
                .into());
        }
        if let Some(open) = conditional {
            return Err(ParseError::new("Missing `endif'", "")
                .at(Some(&open.location))
                .into());
        }
        Ok(output)
    }

    fn process_line(&mut self, line: Line, output: &mut Vec<Line>) -> Result<Option<Block>, Error> {
        if line.text.starts_with(self.options.recipe_prefix) {
            output.push(line);
            return Ok(None);
        }

        let location = &line.location;
        let text = strip_comment(&line.text).map_err(|e| e.at(Some(location)))?;

        if let Some((export, name, operator)) = parse_define(text) {
            return Ok(Some(Block::Define(Definition {
                export,
                name,
                operator,
                depth: 0,
                body: Vec::new(),
                location: location.clone(),
            })));
        }

        match Keyword::of(text) {
            Keyword::If if self.options.conditionals => {
                let taken = self.evaluate_if(text, location)?;
                return Ok(Some(Block::Conditional(Conditional::new(taken, location.clone()))));
            }
            Keyword::Else(_) | Keyword::Endif if self.options.conditionals => {
                return Err(ParseError::new("Unexpected directive outside a conditional", text)
                    .at(Some(location))
                    .into());
            }
            Keyword::Endef => {
                return Err(ParseError::new("Extraneous `endef'", text)
                    .at(Some(location))
                    .into());
            }
            _ => {}
        }

        if let Some(assignment) = parse_assignment(text) {
            self.assign(
                assignment.name,
                assignment.operator,
                assignment.value,
                assignment.export,
                location,
            )?;
            return Ok(None);
        }

        let trimmed = text.trim_start();
        if let Some(rest) = strip_word(trimmed, "export") {
            let names = self.expander.expand_at(rest, &*self.table, Some(location))?;
            for name in names.split_whitespace() {
                self.table.export(name);
            }
            return Ok(None);
        }
        if let Some(rest) = strip_word(trimmed, "undefine") {
            let names = self.expander.expand_at(rest, &*self.table, Some(location))?;
            for name in names.split_whitespace() {
                self.table.remove(name);
            }
            return Ok(None);
        }

        if let Some(include) = Include::parse(text) {
            self.include(include, location, output)?;
            return Ok(None);
        }

        let text = if text.contains('$') {
            self.expander.expand_at(text, &*self.table, Some(location))?
        } else {
            text.to_string()
        };
        output.push(Line::new(text, location.clone()));
        Ok(None)
    }

    /// Define `name` according to `operator`
    fn assign(
        &mut self,
        name: &str,
        operator: &str,
        value: &str,
        export: bool,
        location: &Location,
    ) -> Result<(), Error> {
        let expand = |value: &str, table: &MacroTable| {
            self.expander.expand_at(value, table, Some(location))
        };

        match operator {
            "=" => self.table.define(name, value, Flavor::Recursive, Origin::File),
            ":=" | "::=" => {
                let value = expand(value, &*self.table)?;
                self.table.define(name, value, Flavor::Simple, Origin::File);
            }
            ":::=" => {
                let value = expand(value, &*self.table)?.replace('$', "$$");
                self.table.define(name, value, Flavor::Recursive, Origin::File);
            }
            "?=" => {
                if !self.table.contains(name) {
                    self.table.define(name, value, Flavor::Recursive, Origin::File);
                }
            }
            "+=" => {
                let addition = expand(value, &*self.table)?;
                match self.table.get(name).cloned() {
                    Some(existing) => {
                        let mut combined = existing.value;
                        if !combined.is_empty() && !addition.is_empty() {
                            combined.push(' ');
                        }
                        combined.push_str(&addition);
                        self.table.define(name, combined, existing.flavor, Origin::File);
                    }
                    None => self.table.define(name, addition, Flavor::Simple, Origin::File),
                }
            }
            "!=" => {
                let command = expand(value, &*self.table)?;
                let env = self.expander.exported_env(&*self.table)?;
                let output = run_shell(self.expander, &command, env)?;
                self.table.define(name, output, Flavor::Simple, Origin::File);
            }
            _ => {
                let message = format!("Unknown assignment operator `{}'", operator);
                return Err(ParseError::new(message, name).at(Some(location)).into());
            }
        }

        if export {
            self.table.export(name);
        }
        log::trace!("{}: {} {} {:?}", location, name, operator, self.table.value(name));
        Ok(())
    }

    fn finish_definition(&mut self, definition: Definition) -> Result<(), Error> {
        let value = definition.body.join("\n");
        self.assign(
            &definition.name,
            &definition.operator,
            &value,
            definition.export,
            &definition.location,
        )
    }

    /// Decide which branch of `ifeq`/`ifneq`/`ifdef`/`ifndef` is taken
    fn evaluate_if(&self, text: &str, location: &Location) -> Result<bool, Error> {
        let trimmed = text.trim_start();
        let end = trimmed
            .find(|c: char| c.is_whitespace() || c == '(')
            .unwrap_or(trimmed.len());
        let (keyword, arguments) = trimmed.split_at(end);
        let arguments = arguments.trim();
        let expand = |value: &str| -> Result<String, Error> {
            Ok(self
                .expander
                .expand_at(value, &*self.table, Some(location))?
                .trim()
                .to_string())
        };

        match keyword {
            "ifdef" | "ifndef" => {
                let name = expand(arguments)?;
                Ok(self.table.contains(&name) == (keyword == "ifdef"))
            }
            _ => {
                let operands = split_condition(arguments).ok_or_else(|| {
                    Error::from(
                        ParseError::new("Malformed conditional", text).at(Some(location)),
                    )
                })?;
                let equal = expand(&operands.0)? == expand(&operands.1)?;
                Ok(equal == (keyword == "ifeq"))
            }
        }
    }

    fn include(
        &mut self,
        include: Include,
        location: &Location,
        output: &mut Vec<Line>,
    ) -> Result<(), Error> {
        let expanded = self
            .expander
            .expand_at(include.arguments, &*self.table, Some(location))?;
        let vpath = self.expander.expand("$(VPATH)", &*self.table)?;
        let search = Search::new(self.expander.directory(), &vpath);

        for name in Include::file_names(&expanded, &search) {
            let lines = match read_lines(&search, &name) {
                Ok(lines) => lines,
                Err(e) if include.optional => {
                    log::debug!("{}: skipping {}: {}", location, name, e);
                    continue;
                }
                Err(e) => {
                    self.reporter.report(e)?;
                    continue;
                }
            };
            if self.include_depth >= MAX_INCLUDE_DEPTH {
                return Err(ParseError::new("Includes nested too deeply", name)
                    .at(Some(location))
                    .into());
            }
            self.include_depth += 1;
            let processed = self.process(lines);
            self.include_depth -= 1;
            output.extend(processed?);
        }
        Ok(())
    }
}

/// Split the operands of `ifeq`/`ifneq`: `(A,B)`, `'A' 'B'` or `A,B`.
fn split_condition(arguments: &str) -> Option<(String, String)> {
    if arguments.starts_with(['"', '\'']) {
        let words = split_words(arguments);
        return match words.as_slice() {
            [a, b] => Some((strip_quotes(a), strip_quotes(b))),
            _ => None,
        };
    }

    let inner = match arguments.strip_prefix('(') {
        Some(rest) => rest.strip_suffix(')')?,
        None => arguments,
    };

    let mut depth = 0usize;
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '(' | '{' => depth += 1,
            ')' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&inner[start..]);

    match parts.as_slice() {
        [a, b] => Some((a.to_string(), b.to_string())),
        _ => None,
    }
}
