//! Named rulesets shared between threads.
//!
//! The registry maps ruleset names to engines. Each engine sits behind its
//! own mutex, so episodes of one ruleset are serialized while different
//! rulesets run in parallel. The map itself is only write-locked to define
//! or tear down a ruleset.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::debug;

use crate::config::EngineConfig;
use crate::engine::{EngineStats, EpisodeReport, RuleEngine};
use crate::error::{Error, Result};
use crate::fact::{fields_from_json, Fact, FactId, Fields};
use crate::rule::{Rule, RuleSet};
use crate::session::SessionState;

type SharedEngine = Arc<Mutex<RuleEngine>>;

/// Process-wide collection of rulesets.
pub struct RulesetRegistry {
    config: EngineConfig,
    rulesets: RwLock<HashMap<String, SharedEngine>>,
}

impl RulesetRegistry {
    /// Creates an empty registry whose rulesets use the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates an empty registry with the configuration given to every
    /// ruleset defined through [`define`](Self::define).
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            rulesets: RwLock::new(HashMap::new()),
        }
    }

    /// Default configuration for rulesets defined through `define`.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registers a ruleset built from `rules` in registration order.
    ///
    /// # Errors
    ///
    /// `DuplicateRuleset` if the name is taken, `InvalidRule` if a rule is
    /// malformed, `InvalidRuleset` if the name is empty.
    pub fn define(&self, name: &str, rules: impl IntoIterator<Item = Rule>) -> Result<()> {
        self.define_with_config(name, rules, self.config.clone())
    }

    /// Like [`define`](Self::define) with a per-ruleset configuration.
    pub fn define_with_config(
        &self,
        name: &str,
        rules: impl IntoIterator<Item = Rule>,
        config: EngineConfig,
    ) -> Result<()> {
        self.define_set(RuleSet::from_rules(name, rules), config)
    }

    /// Registers a prepared [`RuleSet`] under its own name.
    pub fn define_set(&self, rules: RuleSet, config: EngineConfig) -> Result<()> {
        let name = rules.name.clone();
        let count = rules.len();
        let engine = RuleEngine::with_config(name.clone(), rules, config)?;

        let mut map = self
            .rulesets
            .write()
            .map_err(|_| Error::LockPoisoned("ruleset registry".into()))?;
        if map.contains_key(&name) {
            return Err(Error::DuplicateRuleset(name));
        }
        map.insert(name.clone(), Arc::new(Mutex::new(engine)));
        debug!("Defined ruleset {} with {} rule(s)", name, count);
        Ok(())
    }

    fn engine(&self, name: &str) -> Result<SharedEngine> {
        let map = self
            .rulesets
            .read()
            .map_err(|_| Error::LockPoisoned("ruleset registry".into()))?;
        let engine = map.get(name).cloned();
        engine.ok_or_else(|| Error::InvalidRuleset(name.to_string()))
    }

    /// Runs `f` with exclusive access to the named engine.
    fn with_engine<T>(&self, name: &str, f: impl FnOnce(&mut RuleEngine) -> Result<T>) -> Result<T> {
        let engine = self.engine(name)?;
        let mut guard = engine
            .lock()
            .map_err(|_| Error::LockPoisoned(format!("ruleset '{}'", name)))?;
        f(&mut guard)
    }

    /// Asserts a fact into a ruleset and runs the episode to fixpoint.
    /// Returns once the episode is over.
    ///
    /// # Errors
    ///
    /// `InvalidRuleset` for an unknown name, `LockPoisoned` if an earlier
    /// action panicked, otherwise whatever [`RuleEngine::post`] returns.
    pub fn post(&self, name: &str, fields: Fields) -> Result<FactId> {
        self.with_engine(name, |engine| engine.post(fields))
    }

    /// Posts a JSON object, e.g. `{"type": "A"}`.
    ///
    /// # Errors
    ///
    /// `MalformedFact` if the value is not an object of scalar fields.
    pub fn post_json(&self, name: &str, json: &serde_json::Value) -> Result<FactId> {
        self.with_engine(name, |engine| engine.post(fields_from_json(json)?))
    }

    /// Like [`post`](Self::post), returning what the episode did.
    pub fn post_with_report(&self, name: &str, fields: Fields) -> Result<EpisodeReport> {
        self.with_engine(name, |engine| engine.post_with_report(fields))
    }

    /// Snapshot of the live facts of a ruleset in ascending id order.
    pub fn get_facts(&self, name: &str) -> Result<Vec<Fact>> {
        self.with_engine(name, |engine| Ok(engine.facts()))
    }

    /// Retracts a fact without starting an episode.
    pub fn retract(&self, name: &str, id: FactId) -> Result<bool> {
        self.with_engine(name, |engine| Ok(engine.retract(id)))
    }

    /// Snapshot of a ruleset's session state.
    pub fn get_state(&self, name: &str) -> Result<SessionState> {
        self.with_engine(name, |engine| Ok(engine.state().clone()))
    }

    /// Statistics of a ruleset's engine.
    pub fn stats(&self, name: &str) -> Result<EngineStats> {
        self.with_engine(name, |engine| Ok(engine.stats()))
    }

    /// Clears facts, state and refraction memory of a ruleset, keeping its
    /// rules.
    pub fn reset(&self, name: &str) -> Result<()> {
        self.with_engine(name, |engine| {
            engine.reset();
            Ok(())
        })
    }

    /// Removes a ruleset. An episode already running on it finishes first.
    ///
    /// # Errors
    ///
    /// `InvalidRuleset` if no ruleset has this name.
    pub fn teardown(&self, name: &str) -> Result<()> {
        let removed = self
            .rulesets
            .write()
            .map_err(|_| Error::LockPoisoned("ruleset registry".into()))?
            .remove(name);
        match removed {
            Some(_) => {
                debug!("Tore down ruleset {}", name);
                Ok(())
            }
            None => Err(Error::InvalidRuleset(name.to_string())),
        }
    }

    /// Whether a ruleset with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.rulesets
            .read()
            .map(|map| map.contains_key(name))
            .unwrap_or(false)
    }

    /// Registered ruleset names, sorted.
    pub fn names(&self) -> Result<Vec<String>> {
        let map = self
            .rulesets
            .read()
            .map_err(|_| Error::LockPoisoned("ruleset registry".into()))?;
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Number of registered rulesets.
    pub fn len(&self) -> usize {
        self.rulesets.read().map(|map| map.len()).unwrap_or(0)
    }

    /// Returns `true` if no ruleset is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RulesetRegistry {
    fn default() -> Self {
        Self::new()
    }
}
