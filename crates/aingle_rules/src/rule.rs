//! Rule definitions for the production rule engine
//!
//! A rule is an ordered list of conditions, an optional priority and an
//! action. Conditions are either positive patterns, each binding one fact, or
//! negations that hold only while no live fact matches their pattern.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::ActionContext;
use crate::error::{Error, Result};
use crate::fact::Fields;
use crate::value::{Value, ValueKind};

/// The behavior run when a rule fires.
pub type Action = Arc<dyn Fn(&mut ActionContext<'_>) -> Result<()> + Send + Sync>;

/// Comparison operator of a [`FieldTest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// The whole string value matches a regular expression.
    Matches,
}

impl CompareOp {
    /// Operator as written in rule displays, e.g. `>=`.
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Matches => "matches",
        }
    }

    /// Whether this operator needs both sides to be of the same kind.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            CompareOp::Gt | CompareOp::Lt | CompareOp::Ge | CompareOp::Le
        )
    }
}

/// Right-hand side of a [`FieldTest`].
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A constant.
    Value(Value),
    /// A field of the fact bound under `alias` by an earlier positive condition.
    Field {
        /// Alias of the bound fact.
        alias: String,
        /// Field read from that fact.
        field: String,
    },
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(v) => write!(f, "{}", v),
            Operand::Field { alias, field } => write!(f, "{}.{}", alias, field),
        }
    }
}

/// A single comparison of one fact field against an operand.
#[derive(Debug, Clone)]
pub struct FieldTest {
    field: String,
    op: CompareOp,
    operand: Operand,
    /// Compiled once for `Matches` against a constant.
    regex: Option<Regex>,
}

impl FieldTest {
    /// Creates a test comparing `field` with a constant.
    pub fn new(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        let value = value.into();
        let regex = match (op, &value) {
            (CompareOp::Matches, Value::String(p)) => compile_anchored(p),
            _ => None,
        };
        Self {
            field: field.into(),
            op,
            operand: Operand::Value(value),
            regex,
        }
    }

    /// Creates a test comparing `field` with `other_field` of the fact bound as `alias`.
    pub fn against(
        field: impl Into<String>,
        op: CompareOp,
        alias: impl Into<String>,
        other_field: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            op,
            operand: Operand::Field {
                alias: alias.into(),
                field: other_field.into(),
            },
            regex: None,
        }
    }

    /// Name of the tested field.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// The comparison operator.
    pub fn op(&self) -> CompareOp {
        self.op
    }

    /// The value or bound field compared against.
    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    /// Evaluates `actual <op> expected`. Incomparable values evaluate false,
    /// except for `!=`, which holds.
    pub(crate) fn evaluate(&self, actual: &Value, expected: &Value) -> bool {
        match self.op {
            CompareOp::Eq => actual.loosely_equals(expected),
            CompareOp::Ne => !actual.loosely_equals(expected),
            CompareOp::Gt => actual.compare(expected).is_some_and(|o| o.is_gt()),
            CompareOp::Lt => actual.compare(expected).is_some_and(|o| o.is_lt()),
            CompareOp::Ge => actual.compare(expected).is_some_and(|o| o.is_ge()),
            CompareOp::Le => actual.compare(expected).is_some_and(|o| o.is_le()),
            CompareOp::Matches => {
                let Some(text) = actual.as_string() else {
                    return false;
                };
                match &self.regex {
                    Some(re) => re.is_match(text),
                    None => expected
                        .as_string()
                        .and_then(compile_anchored)
                        .is_some_and(|re| re.is_match(text)),
                }
            }
        }
    }
}

impl fmt::Display for FieldTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op.symbol(), self.operand)
    }
}

fn compile_anchored(pattern: &str) -> Option<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).ok()
}

/// A conjunction of field tests evaluated against one fact.
#[derive(Debug, Clone, Default)]
pub struct Pattern {
    alias: Option<String>,
    tests: Vec<FieldTest>,
}

impl Pattern {
    /// Creates an empty pattern; add at least one test before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the fact bound by this pattern, for actions and later conditions.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Adds an arbitrary test.
    pub fn test(mut self, test: FieldTest) -> Self {
        self.tests.push(test);
        self
    }

    /// Adds a `field == value` test.
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.test(FieldTest::new(field, CompareOp::Eq, value))
    }

    /// Adds a `field != value` test.
    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.test(FieldTest::new(field, CompareOp::Ne, value))
    }

    /// Adds a `field > value` test.
    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.test(FieldTest::new(field, CompareOp::Gt, value))
    }

    /// Adds a `field < value` test.
    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.test(FieldTest::new(field, CompareOp::Lt, value))
    }

    /// Adds a `field >= value` test.
    pub fn ge(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.test(FieldTest::new(field, CompareOp::Ge, value))
    }

    /// Adds a `field <= value` test.
    pub fn le(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.test(FieldTest::new(field, CompareOp::Le, value))
    }

    /// Adds a regular-expression test; the whole string value must match.
    pub fn matches(self, field: impl Into<String>, regex: impl Into<String>) -> Self {
        self.test(FieldTest::new(field, CompareOp::Matches, regex.into()))
    }

    /// Adds a test against a field of a previously bound fact.
    pub fn compare_to(
        self,
        field: impl Into<String>,
        op: CompareOp,
        alias: impl Into<String>,
        other_field: impl Into<String>,
    ) -> Self {
        self.test(FieldTest::against(field, op, alias, other_field))
    }

    /// Alias the bound fact is known by, if any.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Field tests in declaration order.
    pub fn tests(&self) -> &[FieldTest] {
        &self.tests
    }

    /// The field used to pick candidate facts from the store's index.
    pub fn anchor_field(&self) -> Option<&str> {
        self.tests.first().map(|t| t.field())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(alias) = &self.alias {
            write!(f, "{} << ", alias)?;
        }
        for (i, test) in self.tests.iter().enumerate() {
            if i > 0 {
                write!(f, " & ")?;
            }
            write!(f, "({})", test)?;
        }
        Ok(())
    }
}

/// A condition that must hold for a rule to fire.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Some live fact satisfies the pattern; that fact is bound.
    Match(Pattern),
    /// No live fact satisfies the pattern.
    None(Pattern),
}

impl Condition {
    /// A positive condition with a single field test.
    pub fn field(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Condition::Match(Pattern::new().test(FieldTest::new(field, op, value)))
    }

    /// Negation-as-absence of `pattern`.
    pub fn negation(pattern: Pattern) -> Self {
        Condition::None(pattern)
    }

    /// The pattern of either condition form.
    pub fn pattern(&self) -> &Pattern {
        match self {
            Condition::Match(p) | Condition::None(p) => p,
        }
    }

    /// Whether this is a negation-as-absence condition.
    pub fn is_negation(&self) -> bool {
        matches!(self, Condition::None(_))
    }
}

/// A production rule: conditions, priority and action.
#[derive(Clone)]
pub struct Rule {
    /// Unique name within its ruleset.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Conditions, all of which must hold.
    pub conditions: Vec<Condition>,
    /// Lower fires first; `None` fires after every prioritized rule.
    pub priority: Option<i32>,
    action: Action,
}

impl Rule {
    /// Starts building a rule with the given name.
    pub fn named(name: impl Into<String>) -> RuleBuilder {
        RuleBuilder::new(name)
    }

    /// Positive patterns in declaration order.
    pub fn positive_patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.conditions.iter().filter_map(|c| match c {
            Condition::Match(p) => Some(p),
            Condition::None(_) => None,
        })
    }

    /// Negated patterns in declaration order.
    pub fn negations(&self) -> impl Iterator<Item = &Pattern> {
        self.conditions.iter().filter_map(|c| match c {
            Condition::None(p) => Some(p),
            Condition::Match(_) => None,
        })
    }

    /// A rule without a fact-anchored condition can never match.
    pub fn can_match(&self) -> bool {
        self.positive_patterns().next().is_some()
    }

    pub(crate) fn run(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        (self.action)(ctx)
    }

    /// Checks that the rule is well formed.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRule` for an empty name, an empty pattern, an
    /// aliased negation, a duplicate alias, a reference to an alias not bound
    /// by an earlier positive condition, or a `matches` test whose regular
    /// expression does not compile.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidRule("rule name is empty".to_string()));
        }

        let mut bound: HashSet<&str> = HashSet::new();
        for condition in &self.conditions {
            let pattern = condition.pattern();
            if pattern.tests.is_empty() {
                return Err(self.invalid(format!("pattern '{}' has no field tests", pattern)));
            }
            if let Condition::Match(p) = condition {
                self.check_pattern(p, &bound)?;
                if let Some(alias) = p.alias() {
                    if !bound.insert(alias) {
                        return Err(self.invalid(format!("alias '{}' is bound twice", alias)));
                    }
                }
            }
        }

        // Negations are evaluated once every positive condition is bound.
        for pattern in self.negations() {
            if pattern.alias.is_some() {
                return Err(self.invalid("negated patterns cannot bind an alias".to_string()));
            }
            self.check_pattern(pattern, &bound)?;
        }

        Ok(())
    }

    fn check_pattern(&self, pattern: &Pattern, bound: &HashSet<&str>) -> Result<()> {
        for test in &pattern.tests {
            match (&test.operand, test.op) {
                (Operand::Field { alias, .. }, _) if !bound.contains(alias.as_str()) => {
                    return Err(self.invalid(format!(
                        "test '{}' references unbound alias '{}'",
                        test, alias
                    )));
                }
                (Operand::Value(Value::String(p)), CompareOp::Matches) => {
                    if let Err(e) = Regex::new(p) {
                        return Err(self.invalid(format!("bad regex '{}': {}", p, e)));
                    }
                }
                (Operand::Value(v), CompareOp::Matches) => {
                    return Err(self.invalid(format!("matches needs a string pattern, got {}", v)));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> Error {
        Error::InvalidRule(format!("{}: {}", self.name, reason))
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("conditions", &self.conditions)
            .field("action", &"<fn>")
            .finish()
    }
}

/// A builder for creating `Rule`s using a fluent API.
#[derive(Clone)]
pub struct RuleBuilder {
    rule: Rule,
}

impl RuleBuilder {
    /// Creates a new `RuleBuilder` whose action does nothing.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            rule: Rule {
                name: name.into(),
                description: String::new(),
                conditions: Vec::new(),
                priority: None,
                action: Arc::new(|_| Ok(())),
            },
        }
    }

    /// Sets a human-readable description.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.rule.description = desc.into();
        self
    }

    /// Sets the priority; lower numbers fire first.
    pub fn priority(mut self, p: i32) -> Self {
        self.rule.priority = Some(p);
        self
    }

    /// Adds a positive condition binding one fact.
    pub fn when(mut self, pattern: Pattern) -> Self {
        self.rule.conditions.push(Condition::Match(pattern));
        self
    }

    /// Adds a negation-as-absence condition.
    pub fn when_none(mut self, pattern: Pattern) -> Self {
        self.rule.conditions.push(Condition::None(pattern));
        self
    }

    /// Appends a prebuilt condition.
    pub fn condition(mut self, condition: Condition) -> Self {
        self.rule.conditions.push(condition);
        self
    }

    /// Sets the action run when the rule fires.
    pub fn then<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut ActionContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.rule.action = Arc::new(action);
        self
    }

    /// Finishes the rule. Validation happens when the ruleset is defined.
    pub fn build(self) -> Rule {
        self.rule
    }
}

/// An ordered collection of rules. Registration order is the final tie-breaker
/// when several activations are otherwise equal.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    /// Name of this rule set
    pub name: String,
    /// Description
    pub description: String,
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Creates an empty rule set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            rules: Vec::new(),
        }
    }

    /// Creates a set from rules in registration order.
    pub fn from_rules(name: impl Into<String>, rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut set = Self::new(name);
        set.rules.extend(rules);
        set
    }

    /// Appends a rule; registration order breaks activation ties.
    pub fn add(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Find a rule by name
    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Rule at a registration index.
    pub fn at(&self, index: usize) -> Option<&Rule> {
        self.rules.get(index)
    }

    /// Rules in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if the set has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Validates every rule and rejects duplicate rule names.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !names.insert(rule.name.as_str()) {
                return Err(Error::InvalidRule(format!(
                    "rule '{}' is defined twice in '{}'",
                    rule.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// The value kinds each field is compared against by ordering tests
/// (`> < >= <=`) anywhere in a ruleset.
#[derive(Debug, Clone, Default)]
pub(crate) struct OrderingSchema {
    kinds: HashMap<String, HashSet<ValueKind>>,
}

impl OrderingSchema {
    pub(crate) fn from_rules(rules: &RuleSet) -> Self {
        let mut kinds: HashMap<String, HashSet<ValueKind>> = HashMap::new();
        for rule in rules.iter() {
            for condition in &rule.conditions {
                for test in condition.pattern().tests() {
                    if let (true, Operand::Value(v)) = (test.op.is_ordering(), &test.operand) {
                        kinds
                            .entry(test.field.clone())
                            .or_default()
                            .insert(v.kind());
                    }
                }
            }
        }
        Self { kinds }
    }

    /// Rejects fields whose value kind no ordering test on that field expects.
    pub(crate) fn check(&self, fields: &Fields) -> Result<()> {
        for (name, value) in fields {
            if let Some(expected) = self.kinds.get(name) {
                if !expected.contains(&value.kind()) {
                    let mut wanted: Vec<String> = expected.iter().map(|k| k.to_string()).collect();
                    wanted.sort();
                    return Err(Error::MalformedFact(format!(
                        "field '{}' is a {} but is compared as {}",
                        name,
                        value.kind(),
                        wanted.join(" or ")
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;

    #[test]
    fn test_rule_builder() {
        let rule = Rule::named("test_1")
            .description("first test sets the shortest deadline")
            .priority(1)
            .when(Pattern::new().eq("test_id", 1))
            .when_none(Pattern::new().gt("deadline", 0))
            .build();

        assert_eq!(rule.name, "test_1");
        assert_eq!(rule.priority, Some(1));
        assert_eq!(rule.positive_patterns().count(), 1);
        assert_eq!(rule.negations().count(), 1);
        assert!(rule.can_match());
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_field_test_evaluation() {
        let gt = FieldTest::new("deadline", CompareOp::Gt, 0);
        assert!(gt.evaluate(&Value::integer(3), &Value::integer(0)));
        assert!(!gt.evaluate(&Value::integer(0), &Value::integer(0)));
        assert!(!gt.evaluate(&Value::literal("3"), &Value::integer(0)));

        let ne = FieldTest::new("role", CompareOp::Ne, "DNS");
        assert!(ne.evaluate(&Value::literal("DDNS"), &Value::literal("DNS")));
        assert!(ne.evaluate(&Value::integer(1), &Value::literal("DNS")));
    }

    #[test]
    fn test_matches_is_anchored() {
        let test = FieldTest::new("role", CompareOp::Matches, "D+NS");
        let pattern = Value::literal("D+NS");
        assert!(test.evaluate(&Value::literal("DDNS"), &pattern));
        assert!(test.evaluate(&Value::literal("DNS"), &pattern));
        assert!(!test.evaluate(&Value::literal("DNS-1"), &pattern));
        assert!(!test.evaluate(&Value::integer(1), &pattern));
    }

    #[test]
    fn test_validate_rejects_unbound_alias() {
        let rule = Rule::named("bad")
            .when(Pattern::new().compare_to("amount", CompareOp::Gt, "first", "amount"))
            .build();
        assert!(matches!(rule.validate(), Err(Error::InvalidRule(_))));

        let ok = Rule::named("good")
            .when(Pattern::new().gt("amount", 0).with_alias("first"))
            .when(Pattern::new().compare_to("amount", CompareOp::Gt, "first", "amount"))
            .build();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_patterns() {
        let empty = Rule::named("empty").when(Pattern::new()).build();
        assert!(empty.validate().is_err());

        let bad_regex = Rule::named("re")
            .when(Pattern::new().matches("role", "(unclosed"))
            .build();
        assert!(bad_regex.validate().is_err());

        let aliased_negation = Rule::named("neg")
            .when(Pattern::new().eq("a", 1))
            .when_none(Pattern::new().eq("b", 1).with_alias("x"))
            .build();
        assert!(aliased_negation.validate().is_err());

        let dup_alias = Rule::named("dup")
            .when(Pattern::new().eq("a", 1).with_alias("x"))
            .when(Pattern::new().eq("b", 1).with_alias("x"))
            .build();
        assert!(dup_alias.validate().is_err());
    }

    #[test]
    fn test_rule_without_positive_condition() {
        let rule = Rule::named("floating")
            .when_none(Pattern::new().gt("deadline", 0))
            .build();
        assert!(!rule.can_match());
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_ruleset_rejects_duplicate_names() {
        let mut set = RuleSet::new("computers");
        set.add(Rule::named("r").when(Pattern::new().eq("a", 1)).build());
        set.add(Rule::named("r").when(Pattern::new().eq("b", 1)).build());
        assert_eq!(set.len(), 2);
        assert!(set.get("r").is_some());
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_ordering_schema() {
        let set = RuleSet::from_rules(
            "s",
            vec![Rule::named("deadline")
                .when(Pattern::new().gt("deadline", 0))
                .build()],
        );
        let schema = OrderingSchema::from_rules(&set);

        assert!(schema.check(&fields! { "deadline" => 3 }).is_ok());
        assert!(schema.check(&fields! { "deadline" => 2.5 }).is_ok());
        assert!(schema.check(&fields! { "type" => "A" }).is_ok());
        assert!(matches!(
            schema.check(&fields! { "deadline" => "soon" }),
            Err(Error::MalformedFact(_))
        ));
    }

    #[test]
    fn test_display() {
        let pattern = Pattern::new()
            .eq("type", "B")
            .eq("role", "DDNS")
            .with_alias("m");
        assert_eq!(pattern.to_string(), "m << (type == 'B') & (role == 'DDNS')");
    }
}
