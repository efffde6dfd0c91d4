//! Rule Engine driver loop
//!
//! One `RuleEngine` owns one ruleset: its rules, fact store, session state
//! and refraction memory. Posting a fact runs an episode:
//!
//! ```text
//!  Idle ──post──▶ Matching ──none eligible──▶ Fixpoint ──▶ Idle
//!                  ▲    │
//!                  │    └──head activation──▶ Firing
//!                  └───────────────────────────┘
//! ```
//!
//! Only the head of the agenda fires; the engine then matches again from
//! scratch, so a fact asserted by one firing can block (through a negation)
//! rules that were eligible a moment before.

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::agenda::{Activation, Agenda};
use crate::config::{EngineConfig, NegationMode};
use crate::context::{ActionContext, Effects};
use crate::error::{Error, Result};
use crate::fact::{Fact, FactId, FactStore, Fields};
use crate::matcher::{Match, PatternMatcher};
use crate::rule::{OrderingSchema, RuleSet};
use crate::session::SessionState;

/// Where the driver loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    /// Waiting for a post.
    Idle,
    /// Computing eligible activations.
    Matching,
    /// Running an action.
    Firing,
    /// No activation is eligible; the episode is over.
    Fixpoint,
}

/// Collects statistics about the operations performed by a `RuleEngine`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Episodes started by posts.
    pub episodes: usize,
    /// Rule firings, including failed ones.
    pub firings: usize,
    /// Full match passes over the rule set.
    pub match_passes: usize,
    /// Facts asserted by posts and by actions.
    pub facts_asserted: usize,
    /// Facts retracted by callers and by actions.
    pub facts_retracted: usize,
    /// Episodes aborted by the cycle guard.
    pub cycle_aborts: usize,
    /// Episodes aborted by a failing action.
    pub action_failures: usize,
}

/// One rule firing within an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firing {
    /// Name of the rule that fired.
    pub rule: String,
    /// Bound facts in positive-condition order.
    pub facts: Vec<FactId>,
}

/// What happened during one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeReport {
    /// The externally posted fact that started the episode.
    pub posted: FactId,
    /// Firings in the order they happened.
    pub firings: Vec<Firing>,
    /// Facts asserted by actions.
    pub asserted: Vec<FactId>,
    /// Facts retracted by actions.
    pub retracted: Vec<FactId>,
}

impl EpisodeReport {
    fn new(posted: FactId) -> Self {
        Self {
            posted,
            firings: Vec::new(),
            asserted: Vec::new(),
            retracted: Vec::new(),
        }
    }

    /// How many times `rule` fired.
    pub fn fired(&self, rule: &str) -> usize {
        self.firings.iter().filter(|f| f.rule == rule).count()
    }

    /// Rule names in firing order.
    pub fn fired_rules(&self) -> Vec<&str> {
        self.firings.iter().map(|f| f.rule.as_str()).collect()
    }
}

/// Forward-chaining engine for a single ruleset.
pub struct RuleEngine {
    name: String,
    rules: RuleSet,
    schema: OrderingSchema,
    config: EngineConfig,
    store: FactStore,
    state: SessionState,
    agenda: Agenda,
    phase: EngineState,
    stats: EngineStats,
}

impl RuleEngine {
    /// Creates an engine with the default `EngineConfig`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRule` if any rule fails validation.
    pub fn new(name: impl Into<String>, rules: RuleSet) -> Result<Self> {
        Self::with_config(name, rules, EngineConfig::default())
    }

    /// Creates an engine with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRuleset` for an empty name and
    /// `Error::InvalidRule` if any rule fails validation.
    pub fn with_config(
        name: impl Into<String>,
        rules: RuleSet,
        config: EngineConfig,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidRuleset("ruleset name is empty".to_string()));
        }
        rules.validate()?;

        for rule in rules.iter().filter(|r| !r.can_match()) {
            warn!(
                "Rule {}.{} has no positive condition and will never fire",
                name, rule.name
            );
        }

        Ok(Self {
            schema: OrderingSchema::from_rules(&rules),
            store: FactStore::new(name.clone()),
            name,
            rules,
            config,
            state: SessionState::new(),
            agenda: Agenda::new(),
            phase: EngineState::Idle,
            stats: EngineStats::default(),
        })
    }

    /// Name of the ruleset this engine runs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rules in registration order.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Configuration the engine was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current position of the driver loop.
    ///
    /// An episode runs to completion inside [`post`](Self::post), so callers
    /// holding the engine between posts always observe `EngineState::Idle`,
    /// including after a failed episode. The other states are only taken
    /// while an episode is in progress.
    pub fn phase(&self) -> EngineState {
        self.phase
    }

    /// Returns a snapshot of the engine's statistics.
    pub fn stats(&self) -> EngineStats {
        self.stats.clone()
    }

    /// Read access to the fact store.
    pub fn store(&self) -> &FactStore {
        &self.store
    }

    /// Read access to the session state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Snapshot of live facts in ascending id order.
    pub fn facts(&self) -> Vec<Fact> {
        self.store.query()
    }

    /// Asserts a fact and runs the episode to fixpoint. Returns the fact's id.
    ///
    /// # Errors
    ///
    /// `MalformedFact` leaves the engine untouched. `RuleCycleExceeded` and
    /// `ActionFailure` abort the episode after the posted fact and the effects
    /// of every earlier successful firing have been committed; nothing is
    /// rolled back. Activations still pending when the episode aborts are
    /// dropped, so later posts start from a clean agenda.
    pub fn post(&mut self, fields: Fields) -> Result<FactId> {
        self.post_with_report(fields).map(|report| report.posted)
    }

    /// Like [`post`](Self::post) but returns the full [`EpisodeReport`].
    pub fn post_with_report(&mut self, fields: Fields) -> Result<EpisodeReport> {
        if self.config.strict_types {
            self.schema.check(&fields)?;
        }
        let fact = self.store.assert(fields)?;
        self.stats.facts_asserted += 1;
        self.stats.episodes += 1;
        debug!("Episode started in {} by {}", self.name, fact);

        let mut report = EpisodeReport::new(fact.id());
        let outcome = self.run_episode(fact.id(), &mut report);
        self.phase = EngineState::Idle;

        outcome.map(|()| {
            debug!(
                "Episode in {} reached fixpoint after {} firing(s)",
                self.name,
                report.firings.len()
            );
            report
        })
    }

    fn run_episode(&mut self, posted: FactId, report: &mut EpisodeReport) -> Result<()> {
        let mut firings = 0;

        loop {
            self.phase = EngineState::Matching;
            self.stats.match_passes += 1;

            let Some(activation) = self.next_activation(posted) else {
                self.phase = EngineState::Fixpoint;
                return Ok(());
            };

            if firings >= self.config.max_firings_per_episode {
                self.stats.cycle_aborts += 1;
                warn!(
                    "Ruleset {} still had {} eligible after {} firings; aborting episode",
                    self.name, activation.rule_name, firings
                );
                self.drop_pending(posted);
                return Err(Error::RuleCycleExceeded {
                    ruleset: self.name.clone(),
                    limit: self.config.max_firings_per_episode,
                });
            }

            self.phase = EngineState::Firing;
            firings += 1;
            if let Err(e) = self.fire(activation, report) {
                self.drop_pending(posted);
                return Err(e);
            }
        }
    }

    fn matches(&self, posted: FactId) -> Vec<Match> {
        let matcher = match self.config.negation_mode {
            NegationMode::PerFiring => PatternMatcher::new(&self.store),
            NegationMode::PerEpisode => {
                PatternMatcher::new(&self.store).with_negation_horizon(posted)
            }
        };
        matcher.match_all(&self.rules)
    }

    fn next_activation(&self, posted: FactId) -> Option<Activation> {
        self.agenda.select(self.matches(posted), &self.rules)
    }

    /// Marks every activation still eligible in an aborted episode as
    /// consumed.
    fn drop_pending(&mut self, posted: FactId) {
        let pending = self.agenda.resolve(self.matches(posted), &self.rules);
        for activation in &pending {
            self.agenda.record(activation);
        }
        if !pending.is_empty() {
            debug!(
                "Dropped {} pending activation(s) of the aborted episode in {}",
                pending.len(),
                self.name
            );
        }
    }

    fn fire(&mut self, activation: Activation, report: &mut EpisodeReport) -> Result<()> {
        // Consumed before running: a failing activation is not retried.
        self.agenda.record(&activation);
        self.stats.firings += 1;
        report.firings.push(Firing {
            rule: activation.rule_name.clone(),
            facts: activation.facts.clone(),
        });
        trace!(
            "Firing {}.{} on {:?}",
            self.name,
            activation.rule_name,
            activation.facts
        );

        let Some(rule) = self.rules.at(activation.rule_index) else {
            return Ok(());
        };
        let schema = self.config.strict_types.then_some(&self.schema);
        let mut ctx = ActionContext::new(
            &self.name,
            rule,
            &activation.facts,
            &self.store,
            &self.state,
            schema,
        );
        let outcome = rule.run(&mut ctx);
        let effects = ctx.into_effects();

        if let Err(e) = outcome {
            self.stats.action_failures += 1;
            warn!("Action of {}.{} failed: {}", self.name, activation.rule_name, e);
            return Err(action_failure(&activation.rule_name, e));
        }

        self.commit(effects, report)
    }

    fn commit(&mut self, effects: Effects, report: &mut EpisodeReport) -> Result<()> {
        for fields in effects.asserts {
            let fact = self.store.assert(fields)?;
            self.stats.facts_asserted += 1;
            trace!("Asserted {} in {}", fact, self.name);
            report.asserted.push(fact.id());
        }

        for id in effects.retracts {
            if self.retract(id) {
                report.retracted.push(id);
            }
        }

        for (key, value) in effects.state {
            match value {
                Some(v) => self.state.set(key, v),
                None => self.state.remove(&key),
            };
        }

        Ok(())
    }

    /// Removes a fact from future matching without starting an episode.
    /// Idempotent: returns `false` if the fact was not live.
    pub fn retract(&mut self, id: FactId) -> bool {
        if !self.store.retract(id) {
            return false;
        }
        self.agenda.forget_fact(id);
        self.stats.facts_retracted += 1;
        trace!("Retracted {} from {}", id, self.name);
        true
    }

    /// Clears facts, session state and refraction memory; rules, statistics
    /// and the fact id sequence are kept.
    pub fn reset(&mut self) {
        self.store.clear();
        self.state.clear();
        self.agenda.clear();
        self.phase = EngineState::Idle;
        debug!("Ruleset {} reset", self.name);
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("name", &self.name)
            .field("rules", &self.rules.len())
            .field("facts", &self.store.len())
            .field("phase", &self.phase)
            .finish()
    }
}

/// Attributes an action's error to its rule.
fn action_failure(rule: &str, err: Error) -> Error {
    match err {
        Error::ActionFailure { rule: r, message } if r.is_empty() => Error::ActionFailure {
            rule: rule.to_string(),
            message,
        },
        e @ Error::ActionFailure { .. } => e,
        other => Error::ActionFailure {
            rule: rule.to_string(),
            message: other.to_string(),
        },
    }
}
