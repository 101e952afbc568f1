//! The rule database: explicit rules, pattern rules and goals
use crate::error::{Error, Location, ParseError};
use crate::lines::Line;
use crate::pattern::{self, has_wildcard};
use crate::words::split_words;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Registry of targets that are never files
pub const PHONY: &str = ".PHONY";

/// Registry of suffixes usable in suffix rules
pub const SUFFIXES: &str = ".SUFFIXES";

/// Targets that are treated as phony even when not listed in `.PHONY`
const MAGIC_TARGETS: &[&str] = &[".POSIX", SUFFIXES];

/// One line of a recipe, without the recipe prefix and still unexpanded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeLine {
    /// The command text
    pub text: String,
    /// Where the line was written
    pub location: Location,
}

/// A rule for building one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// The target names
    pub targets: Vec<String>,
    /// Prerequisite tokens, possibly holding glob characters
    pub prerequisites: Vec<String>,
    /// The recipe, in file order
    pub recipe: Vec<RecipeLine>,
    /// The text matched by `%`, for rules made from a pattern
    pub stem: Option<String>,
    /// Where the rule was first written
    pub location: Location,
}

/// A rule with at least one `%` target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternRule {
    /// Target patterns; tokens without `%` are matched literally
    pub targets: Vec<String>,
    /// Prerequisite patterns
    pub prerequisites: Vec<String>,
    /// The recipe, in file order
    pub recipe: Vec<RecipeLine>,
    /// Where the rule was written
    pub location: Location,
    key: String,
}

impl PatternRule {
    /// Make a rule for `target` from this pattern, if one of the target
    /// tokens matches it.
    ///
    /// A literal token that equals `target` turns every `%` of the
    /// prerequisites into a `*` glob. A `%` token substitutes the stem.
    pub fn instantiate(&self, target: &str) -> Option<Rule> {
        self.targets.iter().find_map(|token| {
            if !has_wildcard(token) {
                if pattern::unescape(token) != target {
                    return None;
                }
                return Some(self.rule_for(target, None, |p| pattern::substitute(p, "*")));
            }
            let stem = pattern::stem(token, target)?;
            Some(self.rule_for(target, Some(stem), |p| pattern::substitute(p, stem)))
        })
    }

    fn rule_for(&self, target: &str, stem: Option<&str>, map: impl Fn(&str) -> String) -> Rule {
        Rule {
            targets: vec![target.to_string()],
            prerequisites: self
                .prerequisites
                .iter()
                .map(|p| map(p))
                .filter(|p| !p.is_empty())
                .collect(),
            recipe: self.recipe.clone(),
            stem: stem.map(str::to_string),
            location: self.location.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Recipe,
    Target,
    Blank,
    Other,
}

fn classify(text: &str, recipe_prefix: char) -> LineKind {
    if let Some(rest) = text.strip_prefix(recipe_prefix) {
        if rest.trim().is_empty() {
            LineKind::Blank
        } else {
            LineKind::Recipe
        }
    } else if text.trim().is_empty() {
        LineKind::Blank
    } else if text.contains(':') {
        LineKind::Target
    } else {
        LineKind::Other
    }
}

/// A target line split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
struct TargetLine {
    targets: Vec<String>,
    prerequisites: Vec<String>,
    /// `targets: target-pattern: prerequisite-patterns`
    static_pattern: Option<(String, Vec<String>)>,
}

fn parse_target_line(text: &str) -> TargetLine {
    let Some(colon) = text.find(':') else {
        return TargetLine {
            targets: split_words(text),
            prerequisites: Vec::new(),
            static_pattern: None,
        };
    };
    let targets = split_words(&text[..colon]);
    let mut rest = &text[colon + 1..];
    if let Some(after) = rest.strip_prefix(':') {
        rest = after;
    }

    if let Some(second) = rest.find(':') {
        if !targets.iter().any(|t| has_wildcard(t)) {
            let target_pattern = rest[..second].trim().to_string();
            return TargetLine {
                targets,
                prerequisites: Vec::new(),
                static_pattern: Some((target_pattern, split_words(&rest[second + 1..]))),
            };
        }
    }

    TargetLine {
        targets,
        prerequisites: split_words(rest),
        static_pattern: None,
    }
}

/// All rules of a rule file.
///
/// Rules found by inference are added to an internal cache as they are
/// looked up, so the database can be shared between build threads.
#[derive(Debug, Default)]
pub struct RuleDatabase {
    pub(crate) rules: IndexMap<String, Arc<Rule>>,
    pub(crate) patterns: Vec<PatternRule>,
    goals: Vec<String>,
    pub(crate) synthesized: Mutex<HashMap<String, Option<Arc<Rule>>>>,
}

impl RuleDatabase {
    /// Build the database from the effective lines of a rule file
    pub fn build(lines: &[Line], recipe_prefix: char) -> Result<Self, Error> {
        let kinds: Vec<LineKind> = lines
            .iter()
            .map(|line| classify(&line.text, recipe_prefix))
            .collect();

        let mut db = RuleDatabase::default();
        let mut special = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let line = &lines[i];
            match kinds[i] {
                LineKind::Blank => {
                    i += 1;
                    continue;
                }
                LineKind::Recipe => {
                    let message = "Recipe commences before first target";
                    return Err(ParseError::new(message, line.text.clone())
                        .at(Some(&line.location))
                        .into());
                }
                LineKind::Target | LineKind::Other => {}
            }

            // Collect the recipe that follows, skipping blank lines.
            let mut recipe = Vec::new();
            let mut j = i + 1;
            while j < lines.len() && kinds[j] != LineKind::Target && kinds[j] != LineKind::Other {
                if kinds[j] == LineKind::Recipe {
                    let text = &lines[j].text[recipe_prefix.len_utf8()..];
                    recipe.push(RecipeLine {
                        text: text.to_string(),
                        location: lines[j].location.clone(),
                    });
                }
                j += 1;
            }

            if kinds[i] == LineKind::Other {
                if !recipe.is_empty() {
                    return Err(ParseError::new("Missing separator", line.text.clone())
                        .at(Some(&line.location))
                        .into());
                }
                log::debug!("{}: ignoring {:?}", line.location, line.text);
            } else {
                db.add(line, recipe, &mut special);
            }
            i = j;
        }

        db.goals.extend(special);
        Ok(db)
    }

    fn add(&mut self, line: &Line, recipe: Vec<RecipeLine>, special: &mut Vec<String>) {
        let parsed = parse_target_line(&line.text);

        if parsed.targets.iter().any(|t| has_wildcard(t)) {
            let key = line.text.trim().to_string();
            let rule = PatternRule {
                targets: parsed.targets,
                prerequisites: parsed.prerequisites,
                recipe,
                location: line.location.clone(),
                key,
            };
            match self.patterns.iter_mut().find(|p| p.key == rule.key) {
                Some(existing) => *existing = rule,
                None => self.patterns.push(rule),
            }
            return;
        }

        for target in &parsed.targets {
            let (prerequisites, stem) = match &parsed.static_pattern {
                Some((target_pattern, patterns)) => match pattern::stem(target_pattern, target) {
                    Some(stem) => (
                        patterns
                            .iter()
                            .map(|p| pattern::substitute(p, stem))
                            .collect(),
                        Some(stem.to_string()),
                    ),
                    None => {
                        log::warn!(
                            "{}: target `{}' doesn't match the target pattern",
                            line.location,
                            target
                        );
                        (Vec::new(), None)
                    }
                },
                None => (parsed.prerequisites.clone(), None),
            };

            if target == SUFFIXES && prerequisites.is_empty() {
                self.rules.shift_remove(SUFFIXES);
                continue;
            }

            let goals = if target.starts_with('.') {
                &mut *special
            } else {
                &mut self.goals
            };
            if !goals.contains(target) {
                goals.push(target.clone());
            }

            let entry = self.rules.entry(target.clone()).or_insert_with(|| {
                Arc::new(Rule {
                    targets: vec![target.clone()],
                    prerequisites: Vec::new(),
                    recipe: Vec::new(),
                    stem: None,
                    location: line.location.clone(),
                })
            });
            let rule = Arc::make_mut(entry);
            rule.prerequisites.extend(prerequisites);
            rule.recipe.extend(recipe.iter().cloned());
            if stem.is_some() {
                rule.stem = stem;
            }
        }
    }

    /// The explicit rule for `target`
    pub fn rule(&self, target: &str) -> Option<&Arc<Rule>> {
        self.rules.get(target)
    }

    /// The pattern rules, in file order
    pub fn patterns(&self) -> &[PatternRule] {
        &self.patterns
    }

    /// Targets that can be requested, ordinary targets first. The first one
    /// is the default goal.
    pub fn goals(&self) -> &[String] {
        &self.goals
    }

    /// The target built when none is requested
    pub fn default_goal(&self) -> Option<&str> {
        self.goals
            .first()
            .filter(|goal| !goal.starts_with('.'))
            .map(|goal| goal.as_str())
    }

    /// Whether `target` is declared phony
    pub fn is_phony(&self, target: &str) -> bool {
        MAGIC_TARGETS.contains(&target)
            || self
                .rules
                .get(PHONY)
                .is_some_and(|rule| rule.prerequisites.iter().any(|p| p == target))
    }

    /// The declared suffixes, in declaration order
    pub fn suffixes(&self) -> &[String] {
        self.rules
            .get(SUFFIXES)
            .map(|rule| rule.prerequisites.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::logical_lines;

    fn build(content: &str) -> RuleDatabase {
        RuleDatabase::build(&logical_lines(content, "Makefile"), '\t').unwrap()
    }

    fn recipe(rule: &Rule) -> Vec<&str> {
        rule.recipe.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn test_simple_rules() {
        let db = build(concat!(
            "all: main.o util.o\n",
            "\tcc -o app main.o util.o\n",
            "\n",
            "\techo done\n",
            "main.o util.o: common.h\n",
            "main.o: main.c\n",
            "\tcc -c main.c\n",
        ));
        let all = db.rule("all").unwrap();
        assert_eq!(all.prerequisites, vec!["main.o", "util.o"]);
        assert_eq!(recipe(all), vec!["cc -o app main.o util.o", "echo done"]);
        assert_eq!(all.location.line, 1);

        let main = db.rule("main.o").unwrap();
        assert_eq!(main.prerequisites, vec!["common.h", "main.c"]);
        assert_eq!(recipe(main), vec!["cc -c main.c"]);
        assert_eq!(db.rule("util.o").unwrap().prerequisites, vec!["common.h"]);
        assert_eq!(db.goals(), &["all", "main.o", "util.o"]);
        assert_eq!(db.default_goal(), Some("all"));
    }

    #[test]
    fn test_special_targets_last() {
        let db = build(".PHONY: clean all\nclean:\n\trm -f *.o\nall: app\n");
        assert_eq!(db.goals(), &["clean", "all", ".PHONY"]);
        assert_eq!(db.default_goal(), Some("clean"));
        assert!(db.is_phony("clean"));
        assert!(db.is_phony("all"));
        assert!(db.is_phony(".POSIX"));
        assert!(!db.is_phony("app"));
    }

    #[test]
    fn test_only_special_targets() {
        let db = build(".PHONY: x\n");
        assert_eq!(db.default_goal(), None);
    }

    #[test]
    fn test_separators_and_quotes() {
        let db = build("a;b : 'c d' e;f\n");
        assert_eq!(db.rule("a").unwrap().prerequisites, vec!["'c d'", "e", "f"]);
        assert!(db.rule("b").is_some());
    }

    #[test]
    fn test_double_colon() {
        let db = build("a:: b\n");
        assert_eq!(db.rule("a").unwrap().prerequisites, vec!["b"]);
    }

    #[test]
    fn test_pattern_rules() {
        let db = build(concat!(
            "%.o: %.c\n",
            "\tcc -c $<\n",
            "%.o: %.c\n",
            "\tclang -c $<\n",
            "lib%.a: %.o\n",
        ));
        assert_eq!(db.patterns().len(), 2);
        assert_eq!(recipe_of(&db.patterns()[0]), vec!["clang -c $<"]);

        let rule = db.patterns()[0].instantiate("foo.o").unwrap();
        assert_eq!(rule.prerequisites, vec!["foo.c"]);
        assert_eq!(rule.stem.as_deref(), Some("foo"));
        assert_eq!(rule.targets, vec!["foo.o"]);
        assert!(db.patterns()[0].instantiate(".o").is_none());
        assert!(db.patterns()[1].instantiate("libm.a").is_some());
        assert!(db.goals().is_empty());
    }

    fn recipe_of(rule: &PatternRule) -> Vec<&str> {
        rule.recipe.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn test_pattern_literal_target() {
        let db = build("gen %.x: %.in\n");
        let rule = db.patterns()[0].instantiate("gen").unwrap();
        assert_eq!(rule.prerequisites, vec!["*.in"]);
        assert_eq!(rule.stem, None);
    }

    #[test]
    fn test_escaped_percent_is_literal() {
        let db = build("100\\%: x\n");
        assert!(db.patterns().is_empty());
        assert!(db.rule("100\\%").is_some());
    }

    #[test]
    fn test_static_pattern_rule() {
        let db = build("a.o b.o: %.o: %.c %.h\n\tcc -c $<\nc.x: %.o: %.c\n");
        let a = db.rule("a.o").unwrap();
        assert_eq!(a.prerequisites, vec!["a.c", "a.h"]);
        assert_eq!(a.stem.as_deref(), Some("a"));
        assert_eq!(recipe(a), vec!["cc -c $<"]);
        assert_eq!(db.rule("b.o").unwrap().prerequisites, vec!["b.c", "b.h"]);
        assert!(db.rule("c.x").unwrap().prerequisites.is_empty());
        assert!(db.patterns().is_empty());
    }

    #[test]
    fn test_suffixes() {
        let db = build(".SUFFIXES: .c .o\n.SUFFIXES: .h\n");
        assert_eq!(db.suffixes(), &[".c", ".o", ".h"]);
        let db = build(".SUFFIXES: .c .o\n.SUFFIXES:\n.SUFFIXES: .y\n");
        assert_eq!(db.suffixes(), &[".y"]);
        assert_eq!(db.goals(), &[".SUFFIXES"]);
        assert!(build("").suffixes().is_empty());
    }

    #[test]
    fn test_recipe_before_target() {
        let err = RuleDatabase::build(&logical_lines("\techo hi\nall:\n", "Makefile"), '\t')
            .unwrap_err();
        match err {
            Error::Parse(e) => {
                assert_eq!(e.message, "Recipe commences before first target");
                assert_eq!(e.location.unwrap().line, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_separator() {
        let err = RuleDatabase::build(&logical_lines("all\n\techo hi\n", "Makefile"), '\t')
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        let db = build("stray words\nall:\n");
        assert_eq!(db.goals(), &["all"]);
    }

    #[test]
    fn test_custom_recipe_prefix() {
        let db = RuleDatabase::build(&logical_lines("all:\n>echo hi\n", "Makefile"), '>').unwrap();
        assert_eq!(recipe(db.rule("all").unwrap()), vec!["echo hi"]);
    }

    #[test]
    fn test_whitespace_only_recipe_line() {
        let db = build("\t\nall:\n");
        assert!(db.rule("all").unwrap().recipe.is_empty());
    }
}
