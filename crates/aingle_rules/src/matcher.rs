//! Pattern matching of rule conditions against a fact store.
//!
//! Positive patterns are joined left to right: each binds one distinct fact,
//! and later patterns may compare against fields of facts bound before them.
//! Negations are checked once every positive pattern is bound, against the
//! live store at the moment of the call. The matcher is pure: it never
//! mutates the store and never fails.

use log::trace;

use crate::fact::{Fact, FactId, FactStore};
use crate::rule::{Operand, Pattern, Rule, RuleSet};
use crate::value::Value;

/// One way a rule's conditions are satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Match {
    /// Registration index of the rule in its ruleset.
    pub rule_index: usize,
    /// Bound facts, one per positive condition, in declaration order.
    pub facts: Vec<FactId>,
}

impl Match {
    /// The most recently asserted fact of the binding: the one whose arrival
    /// completed the match.
    pub fn trigger(&self) -> FactId {
        self.facts
            .iter()
            .copied()
            .max()
            .unwrap_or_else(|| FactId::new(0))
    }
}

/// Facts bound so far during a join, with the alias each was bound under.
struct Bound<'r, 'a> {
    entries: Vec<(Option<&'r str>, &'a Fact)>,
}

impl<'r, 'a> Bound<'r, 'a> {
    fn lookup(&self, alias: &str) -> Option<&'a Fact> {
        self.entries
            .iter()
            .find(|(a, _)| *a == Some(alias))
            .map(|(_, f)| *f)
    }

    fn holds(&self, id: FactId) -> bool {
        self.entries.iter().any(|(_, f)| f.id() == id)
    }
}

/// Evaluates rules against a [`FactStore`] snapshot.
pub struct PatternMatcher<'a> {
    store: &'a FactStore,
    /// Negations only see facts up to this id when set.
    horizon: Option<FactId>,
}

impl<'a> PatternMatcher<'a> {
    /// Creates a matcher whose negations see the whole store.
    pub fn new(store: &'a FactStore) -> Self {
        Self {
            store,
            horizon: None,
        }
    }

    /// Restricts the facts negations can see to ids `<= horizon`.
    pub fn with_negation_horizon(mut self, horizon: FactId) -> Self {
        self.horizon = Some(horizon);
        self
    }

    /// Every binding of every rule in `rules`.
    pub fn match_all(&self, rules: &RuleSet) -> Vec<Match> {
        rules
            .iter()
            .enumerate()
            .flat_map(|(index, rule)| self.match_rule(index, rule))
            .collect()
    }

    /// Every binding for which all of `rule`'s conditions hold.
    pub fn match_rule(&self, rule_index: usize, rule: &Rule) -> Vec<Match> {
        let patterns: Vec<&Pattern> = rule.positive_patterns().collect();
        if patterns.is_empty() {
            return Vec::new();
        }
        let negations: Vec<&Pattern> = rule.negations().collect();

        let mut out = Vec::new();
        let mut bound = Bound {
            entries: Vec::with_capacity(patterns.len()),
        };
        self.join(&patterns, &negations, &mut bound, rule_index, &mut out);

        trace!("Rule {} matched {} binding(s)", rule.name, out.len());
        out
    }

    fn join<'r>(
        &self,
        patterns: &[&'r Pattern],
        negations: &[&'r Pattern],
        bound: &mut Bound<'r, 'a>,
        rule_index: usize,
        out: &mut Vec<Match>,
    ) {
        let Some((&pattern, rest)) = patterns.split_first() else {
            if negations.iter().all(|n| self.absent(n, bound)) {
                out.push(Match {
                    rule_index,
                    facts: bound.entries.iter().map(|(_, f)| f.id()).collect(),
                });
            }
            return;
        };

        let candidates: Vec<&'a Fact> = self.candidates(pattern).collect();
        for fact in candidates {
            if bound.holds(fact.id()) || !self.pattern_holds(pattern, fact, bound) {
                continue;
            }
            bound.entries.push((pattern.alias(), fact));
            self.join(rest, negations, bound, rule_index, out);
            bound.entries.pop();
        }
    }

    fn candidates(&self, pattern: &Pattern) -> Box<dyn Iterator<Item = &'a Fact> + 'a> {
        match pattern.anchor_field() {
            Some(field) => Box::new(self.store.with_field(field)),
            None => Box::new(self.store.iter()),
        }
    }

    /// Negation-as-absence: no visible live fact satisfies `pattern`.
    fn absent(&self, pattern: &Pattern, bound: &Bound<'_, 'a>) -> bool {
        !self
            .candidates(pattern)
            .filter(|f| self.horizon.map_or(true, |h| f.id() <= h))
            .any(|f| self.pattern_holds(pattern, f, bound))
    }

    fn pattern_holds(&self, pattern: &Pattern, fact: &Fact, bound: &Bound<'_, 'a>) -> bool {
        pattern.tests().iter().all(|test| {
            let Some(actual) = fact.get(test.field()) else {
                return false;
            };
            match resolve(test.operand(), bound) {
                Some(expected) => test.evaluate(actual, expected),
                None => false,
            }
        })
    }
}

fn resolve<'v>(operand: &'v Operand, bound: &Bound<'_, 'v>) -> Option<&'v Value> {
    match operand {
        Operand::Value(v) => Some(v),
        Operand::Field { alias, field } => bound.lookup(alias)?.get(field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use crate::rule::CompareOp;

    fn store_with(facts: Vec<crate::Fields>) -> FactStore {
        let mut store = FactStore::new("test");
        for f in facts {
            store.assert(f).unwrap();
        }
        store
    }

    #[test]
    fn test_single_pattern_conjunction() {
        let store = store_with(vec![
            fields! { "type" => "B", "role" => "DNS" },
            fields! { "type" => "B", "role" => "DDNS" },
            fields! { "type" => "A" },
        ]);
        let rule = Rule::named("b_dns")
            .when(Pattern::new().eq("type", "B").eq("role", "DNS"))
            .build();

        let matches = PatternMatcher::new(&store).match_rule(0, &rule);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].facts, vec![FactId::new(1)]);
    }

    #[test]
    fn test_negation_blocks_match() {
        let mut store = store_with(vec![fields! { "test_id" => 1 }]);
        let rule = Rule::named("test_1")
            .when(Pattern::new().eq("test_id", 1))
            .when_none(Pattern::new().gt("deadline", 0))
            .build();

        assert_eq!(PatternMatcher::new(&store).match_rule(0, &rule).len(), 1);

        store.assert(fields! { "deadline" => 3 }).unwrap();
        assert!(PatternMatcher::new(&store).match_rule(0, &rule).is_empty());
    }

    #[test]
    fn test_negation_horizon() {
        let store = store_with(vec![
            fields! { "test_id" => 1 },
            fields! { "deadline" => 3 },
        ]);
        let rule = Rule::named("test_1")
            .when(Pattern::new().eq("test_id", 1))
            .when_none(Pattern::new().gt("deadline", 0))
            .build();

        let early = PatternMatcher::new(&store).with_negation_horizon(FactId::new(1));
        assert_eq!(early.match_rule(0, &rule).len(), 1);

        let late = PatternMatcher::new(&store).with_negation_horizon(FactId::new(2));
        assert!(late.match_rule(0, &rule).is_empty());
    }

    #[test]
    fn test_zero_positive_conditions_never_match() {
        let store = store_with(vec![fields! { "x" => 1 }]);
        let rule = Rule::named("nothing")
            .when_none(Pattern::new().gt("deadline", 0))
            .build();
        assert!(PatternMatcher::new(&store).match_rule(0, &rule).is_empty());
    }

    #[test]
    fn test_join_with_alias_reference() {
        let store = store_with(vec![
            fields! { "order" => 1, "amount" => 10 },
            fields! { "order" => 2, "amount" => 30 },
            fields! { "order" => 3, "amount" => 20 },
        ]);
        let rule = Rule::named("bigger")
            .when(Pattern::new().gt("amount", 0).with_alias("first"))
            .when(Pattern::new().compare_to("amount", CompareOp::Gt, "first", "amount"))
            .build();

        let mut found: Vec<Vec<u64>> = PatternMatcher::new(&store)
            .match_rule(0, &rule)
            .into_iter()
            .map(|m| m.facts.iter().map(|f| f.as_u64()).collect())
            .collect();
        found.sort();
        assert_eq!(found, vec![vec![1, 2], vec![1, 3], vec![3, 2]]);
    }

    #[test]
    fn test_negation_referencing_bound_fact() {
        let store = store_with(vec![
            fields! { "order" => 1 },
            fields! { "order" => 2 },
            fields! { "shipped" => 1 },
        ]);
        let rule = Rule::named("unshipped")
            .when(Pattern::new().gt("order", 0).with_alias("o"))
            .when_none(Pattern::new().compare_to("shipped", CompareOp::Eq, "o", "order"))
            .build();

        let matches = PatternMatcher::new(&store).match_rule(0, &rule);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].facts, vec![FactId::new(2)]);
    }

    #[test]
    fn test_distinct_facts_per_pattern() {
        let store = store_with(vec![fields! { "kind" => "x" }]);
        let rule = Rule::named("pair")
            .when(Pattern::new().eq("kind", "x"))
            .when(Pattern::new().eq("kind", "x"))
            .build();
        assert!(PatternMatcher::new(&store).match_rule(0, &rule).is_empty());
    }

    #[test]
    fn test_missing_field_and_type_mismatch_evaluate_false() {
        let store = store_with(vec![
            fields! { "role" => "DNS" },
            fields! { "deadline" => "soon" },
        ]);
        let rule = Rule::named("d").when(Pattern::new().gt("deadline", 0)).build();
        assert!(PatternMatcher::new(&store).match_rule(0, &rule).is_empty());
    }

    #[test]
    fn test_match_trigger() {
        let m = Match {
            rule_index: 0,
            facts: vec![FactId::new(4), FactId::new(9), FactId::new(2)],
        };
        assert_eq!(m.trigger(), FactId::new(9));
    }
}
