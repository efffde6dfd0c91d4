//! The view an action gets of its ruleset while it runs.
//!
//! Everything an action does (asserting, retracting, writing session state)
//! is staged in the context and committed by the engine only after the action
//! returns `Ok`. A failing action leaves no trace; earlier firings stay
//! committed.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::fact::{validate_fields, Fact, FactId, FactStore, Fields};
use crate::rule::{OrderingSchema, Rule};
use crate::session::SessionState;
use crate::value::Value;

/// Effects of one successful action, applied in this order: asserts,
/// retracts, state writes.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub(crate) asserts: Vec<Fields>,
    pub(crate) retracts: Vec<FactId>,
    /// `None` removes the key.
    pub(crate) state: IndexMap<String, Option<Value>>,
}

/// Passed to a rule's action when it fires.
pub struct ActionContext<'a> {
    ruleset: &'a str,
    rule: &'a Rule,
    store: &'a FactStore,
    state: &'a SessionState,
    schema: Option<&'a OrderingSchema>,
    matched: Vec<(Option<&'a str>, &'a Fact)>,
    staged: Effects,
}

impl<'a> ActionContext<'a> {
    pub(crate) fn new(
        ruleset: &'a str,
        rule: &'a Rule,
        facts: &[FactId],
        store: &'a FactStore,
        state: &'a SessionState,
        schema: Option<&'a OrderingSchema>,
    ) -> Self {
        let matched = rule
            .positive_patterns()
            .zip(facts)
            .filter_map(|(pattern, id)| store.get(*id).map(|fact| (pattern.alias(), fact)))
            .collect();

        Self {
            ruleset,
            rule,
            store,
            state,
            schema,
            matched,
            staged: Effects::default(),
        }
    }

    /// Name of the ruleset the firing rule belongs to.
    pub fn ruleset(&self) -> &str {
        self.ruleset
    }

    /// Name of the firing rule.
    pub fn rule_name(&self) -> &str {
        &self.rule.name
    }

    /// The fact bound by the first positive condition.
    pub fn fact(&self) -> Option<&'a Fact> {
        self.matched.first().map(|(_, f)| *f)
    }

    /// The fact bound under `alias`.
    pub fn bound(&self, alias: &str) -> Option<&'a Fact> {
        self.matched
            .iter()
            .find(|(a, _)| *a == Some(alias))
            .map(|(_, f)| *f)
    }

    /// All bound facts in positive-condition order.
    pub fn matched(&self) -> impl Iterator<Item = &'a Fact> + '_ {
        self.matched.iter().map(|(_, f)| *f)
    }

    /// Live facts as committed before this action started.
    pub fn facts(&self) -> impl Iterator<Item = &'a Fact> {
        self.store.iter()
    }

    /// Reads session state, including writes staged by this action.
    pub fn get_state(&self, key: &str) -> Option<&Value> {
        match self.staged.state.get(key) {
            Some(staged) => staged.as_ref(),
            None => self.state.get(key),
        }
    }

    /// Writes session state once the action succeeds.
    pub fn set_state(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.staged.state.insert(key.into(), Some(value.into()));
    }

    /// Removes a key, returning the value it held.
    pub fn remove_state(&mut self, key: &str) -> Option<Value> {
        let previous = self.get_state(key).cloned();
        self.staged.state.insert(key.to_string(), None);
        previous
    }

    /// `true` only if `key` holds `Boolean(true)`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get_state(key), Some(Value::Boolean(true)))
    }

    /// Asserts a fact into this ruleset once the action succeeds.
    ///
    /// The returned id is the one the fact will carry. The new fact is seen
    /// by the next match pass of the running episode; no nested episode is
    /// started.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedFact` if the fields are invalid.
    pub fn assert_fact(&mut self, fields: Fields) -> Result<FactId> {
        validate_fields(&fields)?;
        if let Some(schema) = self.schema {
            schema.check(&fields)?;
        }

        let id = FactId::new(self.store.next_id().as_u64() + self.staged.asserts.len() as u64);
        self.staged.asserts.push(fields);
        Ok(id)
    }

    /// Like [`assert_fact`](Self::assert_fact) with an explicit ruleset name.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRuleset` unless `ruleset` is the ruleset the
    /// action runs in.
    pub fn assert_fact_in(&mut self, ruleset: &str, fields: Fields) -> Result<FactId> {
        if ruleset != self.ruleset {
            return Err(Error::InvalidRuleset(format!(
                "{} (actions of '{}' can only assert into their own ruleset)",
                ruleset, self.ruleset
            )));
        }
        self.assert_fact(fields)
    }

    /// Retracts a fact once the action succeeds. Returns `false` if `id` is
    /// neither live nor asserted earlier by this action.
    pub fn retract_fact(&mut self, id: FactId) -> bool {
        let staged_range = self.store.next_id().as_u64()
            ..self.store.next_id().as_u64() + self.staged.asserts.len() as u64;
        let known = self.store.contains(id) || staged_range.contains(&id.as_u64());
        if known && !self.staged.retracts.contains(&id) {
            self.staged.retracts.push(id);
        }
        known
    }

    pub(crate) fn into_effects(self) -> Effects {
        self.staged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use crate::rule::Pattern;

    fn rule() -> Rule {
        Rule::named("test_1")
            .when(Pattern::new().eq("test_id", 1).with_alias("t"))
            .build()
    }

    #[test]
    fn test_bound_facts() {
        let mut store = FactStore::new("computers");
        let fact = store.assert(fields! { "test_id" => 1 }).unwrap();
        let state = SessionState::new();
        let rule = rule();
        let ctx = ActionContext::new("computers", &rule, &[fact.id()], &store, &state, None);

        assert_eq!(ctx.fact().map(|f| f.id()), Some(fact.id()));
        assert_eq!(ctx.bound("t").map(|f| f.id()), Some(fact.id()));
        assert!(ctx.bound("missing").is_none());
        assert_eq!(ctx.matched().count(), 1);
        assert_eq!(ctx.rule_name(), "test_1");
    }

    #[test]
    fn test_state_overlay() {
        let store = FactStore::new("computers");
        let mut state = SessionState::new();
        state.set("deadline_unset", true);
        let rule = rule();
        let mut ctx = ActionContext::new("computers", &rule, &[], &store, &state, None);

        assert!(ctx.flag("deadline_unset"));
        ctx.set_state("deadline_unset", false);
        assert!(!ctx.flag("deadline_unset"));
        assert_eq!(ctx.remove_state("deadline_unset"), Some(Value::boolean(false)));
        assert!(ctx.get_state("deadline_unset").is_none());

        // Nothing reaches the session until commit.
        assert!(state.flag("deadline_unset"));
        let effects = ctx.into_effects();
        assert_eq!(effects.state.get("deadline_unset"), Some(&None));
    }

    #[test]
    fn test_assert_returns_future_ids() {
        let mut store = FactStore::new("computers");
        store.assert(fields! { "type" => "A" }).unwrap();
        let state = SessionState::new();
        let rule = rule();
        let mut ctx = ActionContext::new("computers", &rule, &[], &store, &state, None);

        assert_eq!(ctx.assert_fact(fields! { "test_id" => 1 }).unwrap(), FactId::new(2));
        assert_eq!(ctx.assert_fact(fields! { "test_id" => 2 }).unwrap(), FactId::new(3));
        assert!(ctx.assert_fact(Fields::new()).is_err());
        assert_eq!(ctx.into_effects().asserts.len(), 2);
    }

    #[test]
    fn test_assert_into_other_ruleset_is_rejected() {
        let store = FactStore::new("computers");
        let state = SessionState::new();
        let rule = rule();
        let mut ctx = ActionContext::new("computers", &rule, &[], &store, &state, None);

        assert!(ctx
            .assert_fact_in("computers", fields! { "test_id" => 1 })
            .is_ok());
        assert!(matches!(
            ctx.assert_fact_in("printers", fields! { "test_id" => 1 }),
            Err(Error::InvalidRuleset(_))
        ));
    }

    #[test]
    fn test_retract_staging() {
        let mut store = FactStore::new("computers");
        let live = store.assert(fields! { "deadline" => 3 }).unwrap();
        let state = SessionState::new();
        let rule = rule();
        let mut ctx = ActionContext::new("computers", &rule, &[], &store, &state, None);

        let pending = ctx.assert_fact(fields! { "deadline" => 7 }).unwrap();
        assert!(ctx.retract_fact(live.id()));
        assert!(ctx.retract_fact(live.id()));
        assert!(ctx.retract_fact(pending));
        assert!(!ctx.retract_fact(FactId::new(99)));
        assert_eq!(ctx.into_effects().retracts, vec![live.id(), pending]);
    }
}
