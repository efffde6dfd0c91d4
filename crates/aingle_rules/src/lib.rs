//! AIngle Rules - Forward-Chaining Production Rule Engine
//!
//! Rules are condition patterns over flat facts plus an action. Posting a
//! fact into a ruleset starts an episode: the engine matches, picks one
//! activation by priority and recency, fires it, and repeats until no rule
//! is eligible. Each ruleset keeps its own facts, session state and memory
//! of what already fired.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Ruleset Registry                          │
//! │        name ──▶ Mutex<RuleEngine>   (one per ruleset)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │                   Rule Engine                         │   │
//! │  │   Idle ─▶ Matching ─▶ Firing ─▶ ... ─▶ Fixpoint       │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                           │                                  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐   │
//! │  │   Matcher    │  │    Agenda    │  │  Action Context  │   │
//! │  │ joins, none  │  │ priority,    │  │ staged asserts,  │   │
//! │  │              │  │ refraction   │  │ retracts, state  │   │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘   │
//! │                           │                                  │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │         Fact Store │ Session State                    │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                                                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use aingle_rules::{fields, Pattern, Rule, RulesetRegistry};
//!
//! let registry = RulesetRegistry::new();
//! registry
//!     .define(
//!         "computers",
//!         vec![Rule::named("computer_A")
//!             .when(Pattern::new().eq("type", "A"))
//!             .then(|ctx| {
//!                 ctx.set_state("deadline_unset", true);
//!                 ctx.assert_fact(fields! { "test_id" => 1 })?;
//!                 Ok(())
//!             })
//!             .build()],
//!     )
//!     .unwrap();
//!
//! registry.post("computers", fields! { "type" => "A" }).unwrap();
//!
//! assert_eq!(registry.get_facts("computers").unwrap().len(), 2);
//! assert!(registry.get_state("computers").unwrap().flag("deadline_unset"));
//! ```

#![warn(missing_docs)]

pub mod agenda;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fact;
pub mod matcher;
pub mod registry;
pub mod rule;
pub mod session;
pub mod value;

// Re-exports
pub use agenda::{Activation, Agenda};
pub use config::{EngineConfig, NegationMode};
pub use context::ActionContext;
pub use engine::{EngineState, EngineStats, EpisodeReport, Firing, RuleEngine};
pub use error::{Error, Result};
pub use fact::{fields_from_json, Fact, FactId, FactStore, Fields};
pub use matcher::{Match, PatternMatcher};
pub use registry::RulesetRegistry;
pub use rule::{Action, CompareOp, Condition, FieldTest, Operand, Pattern, Rule, RuleBuilder, RuleSet};
pub use session::SessionState;
pub use value::{Value, ValueKind};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
