//! Running recipes in dependency order with a bounded number of jobs
use crate::config::Options;
use crate::error::{Error, Reporter};
use crate::expand::Expander;
use crate::macros::{MacroTable, Origin, Overlay, Scope};
use crate::resolve::Resolver;
use crate::rules::{Rule, RuleDatabase};
use crate::search::Search;
use crate::shell::ShellCommand;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    InProgress,
    Built(bool),
    Failed,
}

#[derive(Debug)]
struct Jobs {
    running: usize,
    states: HashMap<String, State>,
}

enum Claim {
    Mine,
    Done(bool),
}

/// Flags written in front of a recipe line
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct LineFlags {
    /// `@`: do not echo
    silent: bool,
    /// `-`: ignore failure
    tolerant: bool,
    /// `+`: run even when only printing
    force: bool,
}

fn split_flags(mut command: &str) -> (&str, LineFlags) {
    let mut flags = LineFlags::default();
    loop {
        match command.chars().next() {
            Some('@') => flags.silent = true,
            Some('-') => flags.tolerant = true,
            Some('+') => flags.force = true,
            _ => return (command, flags),
        }
        command = command[1..].trim_start();
    }
}

fn dir_part(word: &str) -> &str {
    match word.rfind('/') {
        Some(0) => "/",
        Some(i) => &word[..i],
        None => ".",
    }
}

fn file_part(word: &str) -> &str {
    word.rsplit('/').next().unwrap_or(word)
}

/// Bind `name`, `nameD` and `nameF` for a list of words
fn bind_automatic(overlay: &mut Overlay, name: &str, words: &[String]) {
    let join = |f: fn(&str) -> &str| words.iter().map(|w| f(w)).collect::<Vec<_>>().join(" ");
    overlay.bind(name, words.join(" "), Origin::Automatic);
    overlay.bind(format!("{}D", name), join(dir_part), Origin::Automatic);
    overlay.bind(format!("{}F", name), join(file_part), Origin::Automatic);
}

/// Builds targets, running independent prerequisites on scoped threads while
/// the job budget allows.
///
/// Each target is built at most once. The first fatal error cancels the
/// remaining work.
pub struct Scheduler<'a> {
    db: &'a RuleDatabase,
    table: &'a MacroTable,
    expander: &'a Expander,
    options: &'a Options,
    resolver: Resolver<'a>,
    reporter: Reporter,
    jobs: Mutex<Jobs>,
    finished: Condvar,
    cancelled: AtomicBool,
}

impl<'a> Scheduler<'a> {
    /// Create a scheduler for the rules in `db`, expanding recipes against
    /// `table`
    pub fn new(
        db: &'a RuleDatabase,
        table: &'a MacroTable,
        expander: &'a Expander,
        options: &'a Options,
        search: Search,
    ) -> Self {
        let reporter = options.reporter();
        Scheduler {
            db,
            table,
            expander,
            options,
            resolver: Resolver::new(db, search, reporter),
            reporter,
            jobs: Mutex::new(Jobs {
                running: 1,
                states: HashMap::new(),
            }),
            finished: Condvar::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Build `target` if it is out of date; returns whether anything ran
    pub fn build(&self, target: &str) -> Result<bool, Error> {
        self.build_in(target, &[])
    }

    /// Whether a fatal error has stopped the build
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Jobs> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build_in(&self, target: &str, chain: &[String]) -> Result<bool, Error> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Claim::Done(built) = self.claim(target, chain)? {
            return Ok(built);
        }

        let result = self.make(target, chain);
        {
            let mut jobs = self.lock();
            let state = match &result {
                Ok(built) => State::Built(*built),
                Err(_) => State::Failed,
            };
            jobs.states.insert(target.to_string(), state);
        }
        if result.is_err() {
            self.cancelled.store(true, Ordering::SeqCst);
        }
        self.finished.notify_all();
        result
    }

    /// Mark `target` as ours to build, or wait for whoever is building it
    fn claim(&self, target: &str, chain: &[String]) -> Result<Claim, Error> {
        let mut checked = false;
        let mut jobs = self.lock();
        loop {
            match jobs.states.get(target).copied() {
                None => {
                    jobs.states.insert(target.to_string(), State::InProgress);
                    return Ok(Claim::Mine);
                }
                Some(State::Built(built)) => return Ok(Claim::Done(built)),
                Some(State::Failed) => return Err(Error::Cancelled),
                Some(State::InProgress) if !checked => {
                    drop(jobs);
                    if self.reaches(target, chain) {
                        self.resolver.warn_cycle(target);
                        return Ok(Claim::Done(false));
                    }
                    checked = true;
                    jobs = self.lock();
                }
                Some(State::InProgress) => {
                    log::trace!("waiting for {}", target);
                    jobs = self
                        .finished
                        .wait(jobs)
                        .unwrap_or_else(PoisonError::into_inner);
                    if self.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                }
            }
        }
    }

    /// Whether `from` depends, directly or not, on a target of `chain`
    fn reaches(&self, from: &str, chain: &[String]) -> bool {
        let mut stack = vec![from.to_string()];
        let mut seen = HashSet::new();
        while let Some(name) = stack.pop() {
            if chain.contains(&name) {
                return true;
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(rule) = self.db.lookup(&name, self.resolver.search()) {
                stack.extend(self.resolver.prerequisites(&rule));
            }
        }
        false
    }

    /// Take a job slot if the budget allows
    fn take_slot(&self) -> bool {
        let mut jobs = self.lock();
        if jobs.running < self.options.job_limit() {
            jobs.running += 1;
            true
        } else {
            false
        }
    }

    fn release_slot(&self) {
        self.lock().running -= 1;
    }

    fn make(&self, target: &str, chain: &[String]) -> Result<bool, Error> {
        if !self.resolver.needs_build(target, &mut Vec::new())? {
            return Ok(false);
        }
        let Some(rule) = self.db.lookup(target, self.resolver.search()) else {
            return Ok(false);
        };
        let prerequisites = self.resolver.prerequisites(&rule);

        let mut chain = chain.to_vec();
        chain.push(target.to_string());
        self.build_prerequisites(&prerequisites, &chain)?;

        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.run_recipe(target, &rule, &prerequisites)?;
        Ok(true)
    }

    fn build_prerequisites(&self, prerequisites: &[String], chain: &[String]) -> Result<(), Error> {
        std::thread::scope(|scope| {
            let mut first_error: Option<Error> = None;
            let record = |err: Error, first: &mut Option<Error>| {
                self.cancelled.store(true, Ordering::SeqCst);
                if first.as_ref().map_or(true, |e| matches!(e, Error::Cancelled)) {
                    *first = Some(err);
                }
            };

            let mut children = Vec::new();
            for prerequisite in prerequisites {
                if chain.contains(prerequisite) {
                    self.resolver.warn_cycle(prerequisite);
                    continue;
                }
                if self.is_cancelled() {
                    record(Error::Cancelled, &mut first_error);
                    break;
                }
                match self.resolver.needs_build(prerequisite, &mut Vec::new()) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        record(e, &mut first_error);
                        break;
                    }
                }

                if self.take_slot() {
                    log::debug!("starting job for {}", prerequisite);
                    children.push(scope.spawn(move || {
                        let result = self.build_in(prerequisite, chain);
                        self.release_slot();
                        result
                    }));
                } else if let Err(e) = self.build_in(prerequisite, chain) {
                    record(e, &mut first_error);
                    break;
                }
            }

            for child in children {
                let result = child
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload));
                if let Err(e) = result {
                    record(e, &mut first_error);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }

    /// The scope recipes of `rule` are expanded in
    fn automatic<'s>(
        &self,
        target: &str,
        rule: &Rule,
        prerequisites: &[String],
        parent: &'s dyn Scope,
    ) -> Overlay<'s> {
        let search = self.resolver.search();
        let target_path = search.locate(target).unwrap_or_else(|| target.to_string());
        let target_time = search.modified(target);

        let mut paths: Vec<String> = Vec::new();
        let mut newer: Vec<String> = Vec::new();
        for prerequisite in prerequisites {
            let path = if self.db.is_phony(prerequisite) {
                prerequisite.clone()
            } else {
                search
                    .locate(prerequisite)
                    .unwrap_or_else(|| prerequisite.clone())
            };
            if paths.contains(&path) {
                continue;
            }
            let is_newer = match (target_time, search.modified(prerequisite)) {
                (Some(target), Some(time)) => time > target,
                _ => true,
            };
            if is_newer {
                newer.push(path.clone());
            }
            paths.push(path);
        }

        let mut overlay = Overlay::new(parent);
        bind_automatic(&mut overlay, "@", &[target_path]);
        bind_automatic(&mut overlay, "^", &paths);
        bind_automatic(&mut overlay, "<", &paths[..paths.len().min(1)]);
        bind_automatic(&mut overlay, "?", &newer);
        let stem: Vec<String> = rule.stem.iter().cloned().collect();
        bind_automatic(&mut overlay, "*", &stem);
        overlay
    }

    fn run_recipe(&self, target: &str, rule: &Rule, prerequisites: &[String]) -> Result<(), Error> {
        if rule.recipe.is_empty() {
            return Ok(());
        }
        let scope = self.automatic(target, rule, prerequisites, self.table);

        let env = self.expander.exported_env(&scope)?;

        let console = self.expander.console();
        for line in &rule.recipe {
            if self.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let expanded = self
                .expander
                .expand_at(&line.text, &scope, Some(&line.location))?;
            let (command, flags) = split_flags(expanded.trim());
            if command.is_empty() {
                continue;
            }

            if self.options.just_print && !flags.force {
                console.println(command);
                continue;
            }
            if !flags.silent && !self.options.silent {
                console.println(command);
            }

            let mut shell = ShellCommand::new(command, self.expander.directory());
            shell.env = env.clone();
            match self.expander.runner().run(&shell) {
                Ok(0) => {}
                Ok(status) if flags.tolerant => self.reporter.warn(&format!(
                    "{}: [{}] Error {} (ignored)",
                    line.location, target, status
                )),
                Ok(status) => self.reporter.report(Error::CommandFailed {
                    command: command.to_string(),
                    status,
                })?,
                Err(e) if flags.tolerant => self.reporter.warn(&format!(
                    "{}: [{}] {} (ignored)",
                    line.location, target, e
                )),
                Err(source) => self.reporter.report(Error::CommandSpawn {
                    command: command.to_string(),
                    source,
                })?,
            }
        }
        Ok(())
    }
}
