//! Deciding which targets are out of date
use crate::error::{Error, Reporter};
use crate::rules::{Rule, RuleDatabase};
use crate::search::{expand_words, Search};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Decides whether targets have to be rebuilt, based on modification times.
pub struct Resolver<'a> {
    db: &'a RuleDatabase,
    search: Search,
    reporter: Reporter,
    warned: Mutex<HashSet<String>>,
}

impl<'a> Resolver<'a> {
    /// Create a resolver over `db`, finding files through `search`
    pub fn new(db: &'a RuleDatabase, search: Search, reporter: Reporter) -> Self {
        Resolver {
            db,
            search,
            reporter,
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// How files are found
    pub fn search(&self) -> &Search {
        &self.search
    }

    /// The prerequisites of `rule` with globs expanded
    pub fn prerequisites(&self, rule: &Rule) -> Vec<String> {
        expand_words(&self.search, &rule.prerequisites)
    }

    /// Warn about a dependency cycle through `target`, once per target
    pub fn warn_cycle(&self, target: &str) {
        let first = self
            .warned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.to_string());
        if first {
            self.reporter
                .warn(&format!("Circular dependency involving `{}' dropped", target));
        }
    }

    /// Whether `target` has to be built.
    ///
    /// `visiting` holds the targets whose staleness is being decided further
    /// up; meeting one of them again is a cycle.
    pub fn needs_build(&self, target: &str, visiting: &mut Vec<String>) -> Result<bool, Error> {
        if visiting.iter().any(|v| v == target) {
            self.warn_cycle(target);
            return Ok(!self.search.exists(target));
        }

        let Some(rule) = self.db.lookup(target, &self.search) else {
            if self.search.exists(target) {
                return Ok(false);
            }
            self.reporter.report(Error::MissingRule {
                target: target.to_string(),
            })?;
            return Ok(false);
        };

        if self.db.is_phony(target) {
            return Ok(true);
        }
        let Some(modified) = self.search.modified(target) else {
            return Ok(true);
        };

        for prerequisite in self.prerequisites(&rule) {
            if self.db.is_phony(&prerequisite) {
                return Ok(true);
            }
            match self.search.modified(&prerequisite) {
                None => return Ok(true),
                Some(time) if time > modified => return Ok(true),
                Some(_) => {}
            }

            visiting.push(target.to_string());
            let stale = self.needs_build(&prerequisite, visiting);
            visiting.pop();
            if stale? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::logical_lines;
    use std::fs::{self, File};
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    fn build(content: &str) -> RuleDatabase {
        RuleDatabase::build(&logical_lines(content, "Makefile"), '\t').unwrap()
    }

    /// Create `name` with a modification time `age` seconds before a fixed
    /// instant
    fn touch(dir: &Path, name: &str, age: u64) {
        let path = dir.join(name);
        fs::write(&path, "").unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 - age))
            .unwrap();
    }

    fn stale(db: &RuleDatabase, dir: &Path, target: &str) -> Result<bool, Error> {
        Resolver::new(db, Search::new(dir, ""), Reporter::default())
            .needs_build(target, &mut Vec::new())
    }

    #[test]
    fn test_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let db = build("app: main.o\n");
        touch(dir.path(), "main.o", 10);
        assert!(stale(&db, dir.path(), "app").unwrap());
    }

    #[test]
    fn test_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let db = build("app: main.o\n");
        touch(dir.path(), "main.o", 100);
        touch(dir.path(), "app", 10);
        assert!(!stale(&db, dir.path(), "app").unwrap());
    }

    #[test]
    fn test_newer_prerequisite() {
        let dir = tempfile::tempdir().unwrap();
        let db = build("app: main.o\n");
        touch(dir.path(), "main.o", 10);
        touch(dir.path(), "app", 100);
        assert!(stale(&db, dir.path(), "app").unwrap());
    }

    #[test]
    fn test_stale_grandchild() {
        let dir = tempfile::tempdir().unwrap();
        let db = build("app: main.o\nmain.o: main.c\n");
        touch(dir.path(), "main.c", 10);
        touch(dir.path(), "main.o", 100);
        touch(dir.path(), "app", 50);
        assert!(stale(&db, dir.path(), "app").unwrap());
    }

    #[test]
    fn test_phony() {
        let dir = tempfile::tempdir().unwrap();
        let db = build(".PHONY: clean\nclean:\nall: clean\n");
        touch(dir.path(), "clean", 10);
        touch(dir.path(), "all", 10);
        assert!(stale(&db, dir.path(), "clean").unwrap());
        assert!(stale(&db, dir.path(), "all").unwrap());
    }

    #[test]
    fn test_existing_file_without_rule() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "README", 10);
        let db = build("");
        assert!(!stale(&db, dir.path(), "README").unwrap());
    }

    #[test]
    fn test_missing_rule() {
        let dir = tempfile::tempdir().unwrap();
        let db = build("");
        assert!(matches!(
            stale(&db, dir.path(), "nothing"),
            Err(Error::MissingRule { .. })
        ));
        let resolver = Resolver::new(&db, Search::new(dir.path(), ""), Reporter::new(true, false));
        assert!(!resolver.needs_build("nothing", &mut Vec::new()).unwrap());
    }

    #[test]
    fn test_cycle_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let db = build("a: b\nb: a\n");
        touch(dir.path(), "a", 10);
        touch(dir.path(), "b", 10);
        let resolver = Resolver::new(&db, Search::new(dir.path(), ""), Reporter::default());
        assert!(!resolver.needs_build("a", &mut Vec::new()).unwrap());
        assert_eq!(resolver.warned.lock().unwrap().len(), 1);
        resolver.needs_build("a", &mut Vec::new()).unwrap();
        assert_eq!(resolver.warned.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_globbed_prerequisites() {
        let dir = tempfile::tempdir().unwrap();
        let db = build("lib.a: *.o\n");
        touch(dir.path(), "a.o", 100);
        touch(dir.path(), "b.o", 5);
        touch(dir.path(), "lib.a", 50);
        assert!(stale(&db, dir.path(), "lib.a").unwrap());
    }
}
