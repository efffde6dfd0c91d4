//! Agenda and conflict resolution.
//!
//! The agenda turns matcher output into activations, drops the ones that
//! already fired (refraction) and orders the rest:
//!
//! 1. declared priority ascending, unprioritized rules last;
//! 2. triggering fact id ascending;
//! 3. rule registration order;
//! 4. bound fact ids, for a total order.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::fact::FactId;
use crate::matcher::Match;
use crate::rule::RuleSet;

/// A rule together with the facts that satisfy it, ready to fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    /// Registration index of the rule.
    pub rule_index: usize,
    /// Name of the rule.
    pub rule_name: String,
    /// Declared priority; `None` ranks after every prioritized rule.
    pub priority: Option<i32>,
    /// Bound facts in positive-condition order.
    pub facts: Vec<FactId>,
    /// Most recently asserted fact of the binding.
    pub trigger: FactId,
}

impl Activation {
    fn from_match(m: Match, rules: &RuleSet) -> Option<Self> {
        let rule = rules.at(m.rule_index)?;
        Some(Self {
            rule_index: m.rule_index,
            rule_name: rule.name.clone(),
            priority: rule.priority,
            trigger: m.trigger(),
            facts: m.facts,
        })
    }

    /// `(0, p)` for prioritized rules, `(1, 0)` otherwise.
    fn priority_rank(&self) -> (u8, i32) {
        match self.priority {
            Some(p) => (0, p),
            None => (1, 0),
        }
    }
}

impl Ord for Activation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority_rank()
            .cmp(&other.priority_rank())
            .then_with(|| self.trigger.cmp(&other.trigger))
            .then_with(|| self.rule_index.cmp(&other.rule_index))
            .then_with(|| self.facts.cmp(&other.facts))
    }
}

impl PartialOrd for Activation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Refraction memory plus ordering of eligible activations.
#[derive(Debug, Default)]
pub struct Agenda {
    fired: HashSet<(usize, Vec<FactId>)>,
}

impl Agenda {
    /// Creates an agenda with no refraction memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// All eligible activations in firing order. The engine uses it to
    /// consume what is still pending when an episode aborts.
    pub fn resolve(&self, matches: Vec<Match>, rules: &RuleSet) -> Vec<Activation> {
        let mut activations: Vec<Activation> = matches
            .into_iter()
            .filter(|m| !self.has_fired(m.rule_index, &m.facts))
            .filter_map(|m| Activation::from_match(m, rules))
            .collect();
        activations.sort();
        activations
    }

    /// The activation that fires next, if any.
    pub fn select(&self, matches: Vec<Match>, rules: &RuleSet) -> Option<Activation> {
        matches
            .into_iter()
            .filter(|m| !self.has_fired(m.rule_index, &m.facts))
            .filter_map(|m| Activation::from_match(m, rules))
            .min()
    }

    /// Marks an activation as consumed. Returns `false` if it already was.
    pub fn record(&mut self, activation: &Activation) -> bool {
        self.fired
            .insert((activation.rule_index, activation.facts.clone()))
    }

    /// Whether `rule_index` already fired on exactly these facts.
    pub fn has_fired(&self, rule_index: usize, facts: &[FactId]) -> bool {
        self.fired.contains(&(rule_index, facts.to_vec()))
    }

    /// Drops refraction entries that involve a retracted fact.
    pub fn forget_fact(&mut self, id: FactId) {
        self.fired.retain(|(_, facts)| !facts.contains(&id));
    }

    /// Forgets every recorded firing.
    pub fn clear(&mut self) {
        self.fired.clear();
    }

    /// Number of remembered firings.
    pub fn len(&self) -> usize {
        self.fired.len()
    }

    /// Returns `true` if nothing has fired.
    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}
