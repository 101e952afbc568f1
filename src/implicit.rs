//! Inferring rules for targets without an explicit one
use crate::rules::{Rule, RuleDatabase};
use crate::search::{expand_words, normalize_path, Search};
use std::collections::HashMap;
use std::sync::{Arc, MutexGuard, PoisonError};

/// Split a suffix rule name like `.c.o` into `(".c", ".o")`.
fn suffix_pair(key: &str) -> Option<(String, String)> {
    let rest = key.strip_prefix('.')?;
    let (from, to) = rest.split_once('.')?;
    if from.is_empty() || to.is_empty() || to.contains('.') {
        return None;
    }
    Some((format!(".{}", from), format!(".{}", to)))
}

impl RuleDatabase {
    /// Find the rule that builds `target`.
    ///
    /// An explicit rule wins. Otherwise a rule is inferred from pattern
    /// rules, suffix rules and rules written under a differently spelled
    /// path. The inferred rule (or the lack of one) is remembered.
    pub fn lookup(&self, target: &str, search: &Search) -> Option<Arc<Rule>> {
        if let Some(rule) = self.rules.get(target) {
            return Some(rule.clone());
        }
        if let Some(known) = self.cache().get(target) {
            return known.clone();
        }

        let found = self.synthesize(target, search).map(Arc::new);
        self.cache()
            .entry(target.to_string())
            .or_insert(found)
            .clone()
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Option<Arc<Rule>>>> {
        self.synthesized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Every rule that could build `target`, in preference order
    fn candidates(&self, target: &str) -> Vec<Rule> {
        let mut candidates: Vec<Rule> = self
            .patterns
            .iter()
            .filter_map(|pattern| pattern.instantiate(target))
            .collect();

        let suffixes = self.suffixes();
        let normalized = normalize_path(target);
        for (key, rule) in &self.rules {
            if let Some((from, to)) = suffix_pair(key) {
                if !suffixes.contains(&from) || !suffixes.contains(&to) {
                    continue;
                }
                let Some(stem) = target.strip_suffix(to.as_str()).filter(|s| !s.is_empty()) else {
                    continue;
                };
                let mut prerequisites: Vec<String> = rule
                    .prerequisites
                    .iter()
                    .filter(|p| !p.is_empty())
                    .cloned()
                    .collect();
                prerequisites.push(format!("{}{}", stem, from));
                candidates.push(Rule {
                    targets: vec![target.to_string()],
                    prerequisites,
                    recipe: rule.recipe.clone(),
                    stem: Some(stem.to_string()),
                    location: rule.location.clone(),
                });
            } else if normalize_path(key) == normalized {
                candidates.push(Rule {
                    targets: vec![target.to_string()],
                    ..Rule::clone(rule)
                });
            }
        }
        candidates
    }

    /// Pick the candidate with the fewest prerequisites that are neither
    /// phony nor present on disk.
    fn synthesize(&self, target: &str, search: &Search) -> Option<Rule> {
        let mut best: Option<(usize, Rule)> = None;
        for candidate in self.candidates(target) {
            let missing = expand_words(search, &candidate.prerequisites)
                .iter()
                .filter(|p| !self.is_phony(p) && !search.exists(p))
                .count();
            log::trace!(
                "{}: candidate from {} has {} missing prerequisites",
                target,
                candidate.location,
                missing
            );
            if best.as_ref().map_or(true, |(fewest, _)| missing < *fewest) {
                best = Some((missing, candidate));
            }
        }
        best.map(|(_, rule)| rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::logical_lines;
    use std::fs;

    fn build(content: &str) -> RuleDatabase {
        RuleDatabase::build(&logical_lines(content, "Makefile"), '\t').unwrap()
    }

    #[test]
    fn test_suffix_pair() {
        assert_eq!(
            suffix_pair(".c.o"),
            Some((".c".to_string(), ".o".to_string()))
        );
        assert_eq!(suffix_pair(".PHONY"), None);
        assert_eq!(suffix_pair(".a.b.c"), None);
        assert_eq!(suffix_pair("a.b"), None);
    }

    #[test]
    fn test_explicit_rule_wins() {
        let dir = tempfile::tempdir().unwrap();
        let db = build("%.o: %.c\n\tcc\nfoo.o: special.c\n");
        let search = Search::new(dir.path(), "");
        let rule = db.lookup("foo.o", &search).unwrap();
        assert_eq!(rule.prerequisites, vec!["special.c"]);
    }

    #[test]
    fn test_pattern_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let db = build("%.o: %.c\n\tcc -c $<\n");
        let search = Search::new(dir.path(), "");
        let rule = db.lookup("src/main.o", &search).unwrap();
        assert_eq!(rule.prerequisites, vec!["src/main.c"]);
        assert_eq!(rule.stem.as_deref(), Some("src/main"));
        assert_eq!(rule.recipe[0].text, "cc -c $<");
        assert!(db.lookup("main.c", &search).is_none());
    }

    #[test]
    fn test_fewest_missing_prerequisites() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("foo.y"), "").unwrap();
        let db = build(concat!(
            "%.o: %.c\n",
            "\tcc\n",
            "%.o: %.y\n",
            "\tyacc\n",
            "%.o: %.c %.y\n",
            "\tboth\n",
        ));
        let search = Search::new(dir.path(), "");
        let rule = db.lookup("foo.o", &search).unwrap();
        assert_eq!(rule.recipe[0].text, "yacc");

        // Ties keep the first candidate.
        let rule = db.lookup("bar.o", &search).unwrap();
        assert_eq!(rule.recipe[0].text, "cc");
    }

    #[test]
    fn test_phony_prerequisites_count_as_satisfied() {
        let dir = tempfile::tempdir().unwrap();
        let db = build(".PHONY: gen\n%.x: missing\n\tone\n%.x: gen\n\ttwo\n");
        let search = Search::new(dir.path(), "");
        assert_eq!(db.lookup("a.x", &search).unwrap().recipe[0].text, "two");
    }

    #[test]
    fn test_suffix_rule() {
        let dir = tempfile::tempdir().unwrap();
        let db = build(".SUFFIXES: .c .o\n.c.o: extra.h\n\tcc -c $<\n");
        let search = Search::new(dir.path(), "");
        let rule = db.lookup("util.o", &search).unwrap();
        assert_eq!(rule.prerequisites, vec!["extra.h", "util.c"]);
        assert_eq!(rule.stem.as_deref(), Some("util"));

        let undeclared = build(".SUFFIXES: .c\n.c.o:\n\tcc -c $<\n");
        assert!(undeclared.lookup("util.o", &search).is_none());
    }

    #[test]
    fn test_normalized_path() {
        let dir = tempfile::tempdir().unwrap();
        let db = build("./out/app: main.o\n\tld\n");
        let search = Search::new(dir.path(), "");
        let rule = db.lookup("out/app", &search).unwrap();
        assert_eq!(rule.prerequisites, vec!["main.o"]);
        assert_eq!(rule.targets, vec!["out/app"]);
    }

    #[test]
    fn test_lookup_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let db = build("%.o: %.c\n");
        let search = Search::new(dir.path(), "");
        let first = db.lookup("a.o", &search).unwrap();
        let second = db.lookup("a.o", &search).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(db.lookup("a.c", &search).is_none());
        assert_eq!(db.synthesized.lock().unwrap().len(), 2);
    }
}
