//! Facts and the per-ruleset fact store.
//!
//! The store is append + retract only: a fact is never changed after it is
//! asserted. Facts are kept ordered by their sequence id, and a field-name
//! index lets the matcher look up only facts that carry a tested field.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

/// The ordered field map of a fact.
pub type Fields = IndexMap<String, Value>;

/// Builds a [`Fields`] map from `key => value` pairs.
///
/// ```
/// use aingle_rules::{fields, Value};
///
/// let f = fields! { "type" => "B", "role" => "DNS", "created_at" => 1_700_000_000i64 };
/// assert_eq!(f.get("role"), Some(&Value::literal("DNS")));
/// ```
#[macro_export]
macro_rules! fields {
    () => { $crate::Fields::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut fields = $crate::Fields::new();
        $( fields.insert(::std::string::String::from($key), $crate::Value::from($value)); )+
        fields
    }};
}

/// Sequence id of a fact, strictly increasing within a ruleset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactId(u64);

impl FactId {
    /// Wraps a raw sequence number.
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// The raw sequence number.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An immutable record asserted into a ruleset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    id: FactId,
    ruleset: String,
    fields: Fields,
    asserted_at: DateTime<Utc>,
}

impl Fact {
    /// Sequence id assigned at assertion.
    pub fn id(&self) -> FactId {
        self.id
    }

    /// Name of the ruleset this fact belongs to.
    pub fn ruleset(&self) -> &str {
        &self.ruleset
    }

    /// All fields in insertion order.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Value of `field`, if the fact carries it.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Whether the fact carries `field`.
    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// When the fact was asserted.
    pub fn asserted_at(&self) -> DateTime<Utc> {
        self.asserted_at
    }

    /// Returns the fields as a JSON object, the shape callers posted.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.id)?;
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {}: {}", k, v)?;
        }
        write!(f, " }}")
    }
}

/// Converts a JSON object of scalars into [`Fields`].
///
/// # Errors
///
/// Returns `Error::MalformedFact` if `json` is not an object or any field is
/// not a scalar.
pub fn fields_from_json(json: &serde_json::Value) -> Result<Fields> {
    let object = json
        .as_object()
        .ok_or_else(|| Error::MalformedFact("a fact must be a JSON object".to_string()))?;

    let mut fields = Fields::with_capacity(object.len());
    for (key, value) in object {
        let value = Value::from_json(value)
            .map_err(|e| Error::MalformedFact(format!("field '{}': {}", key, e)))?;
        fields.insert(key.clone(), value);
    }
    Ok(fields)
}

/// Structural checks every fact must pass before it is assigned an id.
pub(crate) fn validate_fields(fields: &Fields) -> Result<()> {
    if fields.is_empty() {
        return Err(Error::MalformedFact("a fact needs at least one field".to_string()));
    }
    for (key, value) in fields {
        if key.is_empty() {
            return Err(Error::MalformedFact("empty field name".to_string()));
        }
        if let Value::Float(f) = value {
            if !f.is_finite() {
                return Err(Error::MalformedFact(format!(
                    "field '{}' holds a non-finite number",
                    key
                )));
            }
        }
    }
    Ok(())
}

/// The live facts of one ruleset.
#[derive(Debug)]
pub struct FactStore {
    ruleset: String,
    facts: BTreeMap<FactId, Fact>,
    /// field name -> ids of live facts carrying that field
    by_field: HashMap<String, BTreeSet<FactId>>,
    next_seq: u64,
}

impl FactStore {
    /// Creates an empty store for the named ruleset. Ids start at 1.
    pub fn new(ruleset: impl Into<String>) -> Self {
        Self {
            ruleset: ruleset.into(),
            facts: BTreeMap::new(),
            by_field: HashMap::new(),
            next_seq: 1,
        }
    }

    /// Name of the ruleset owning this store.
    pub fn ruleset(&self) -> &str {
        &self.ruleset
    }

    /// The id the next asserted fact will receive.
    pub fn next_id(&self) -> FactId {
        FactId(self.next_seq)
    }

    /// Records a new fact and returns it.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedFact` if the fields fail structural checks.
    pub fn assert(&mut self, fields: Fields) -> Result<Fact> {
        validate_fields(&fields)?;

        let id = FactId(self.next_seq);
        self.next_seq += 1;

        let fact = Fact {
            id,
            ruleset: self.ruleset.clone(),
            fields,
            asserted_at: Utc::now(),
        };

        for field in fact.fields.keys() {
            self.by_field.entry(field.clone()).or_default().insert(id);
        }
        self.facts.insert(id, fact.clone());

        Ok(fact)
    }

    /// Removes a fact from future matching. Returns `false` if it was not live.
    pub fn retract(&mut self, id: FactId) -> bool {
        let Some(fact) = self.facts.remove(&id) else {
            return false;
        };

        for field in fact.fields.keys() {
            if let Some(ids) = self.by_field.get_mut(field) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_field.remove(field);
                }
            }
        }
        true
    }

    /// Live fact with the given id.
    pub fn get(&self, id: FactId) -> Option<&Fact> {
        self.facts.get(&id)
    }

    /// Whether `id` is a live fact.
    pub fn contains(&self, id: FactId) -> bool {
        self.facts.contains_key(&id)
    }

    /// Live facts in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.values()
    }

    /// Snapshot of all live facts in ascending id order.
    pub fn query(&self) -> Vec<Fact> {
        self.facts.values().cloned().collect()
    }

    /// Live facts carrying `field`, in ascending id order.
    pub fn with_field<'a>(&'a self, field: &str) -> impl Iterator<Item = &'a Fact> + 'a {
        self.by_field
            .get(field)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.facts.get(id))
    }

    /// Number of live facts.
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Returns `true` if no fact is live.
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Drops every fact. Ids keep increasing afterwards.
    pub fn clear(&mut self) {
        self.facts.clear();
        self.by_field.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;

    #[test]
    fn test_assert_assigns_increasing_ids() {
        let mut store = FactStore::new("computers");
        let a = store.assert(fields! { "type" => "A" }).unwrap();
        let b = store.assert(fields! { "type" => "A" }).unwrap();

        assert!(b.id() > a.id());
        assert_eq!(a.ruleset(), "computers");
        assert_eq!(store.len(), 2);
        assert_eq!(store.next_id(), FactId::new(3));
    }

    #[test]
    fn test_query_is_ordered() {
        let mut store = FactStore::new("s");
        for i in 0..5i64 {
            store.assert(fields! { "test_id" => i }).unwrap();
        }
        let ids: Vec<_> = store.query().iter().map(|f| f.id().as_u64()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_retract_is_idempotent() {
        let mut store = FactStore::new("s");
        let fact = store.assert(fields! { "deadline" => 3 }).unwrap();

        assert!(store.retract(fact.id()));
        assert!(!store.retract(fact.id()));
        assert!(store.is_empty());
        assert_eq!(store.with_field("deadline").count(), 0);
    }

    #[test]
    fn test_field_index() {
        let mut store = FactStore::new("s");
        store.assert(fields! { "test_id" => 1 }).unwrap();
        store.assert(fields! { "deadline" => 3 }).unwrap();
        store.assert(fields! { "test_id" => 2, "extra" => true }).unwrap();

        let with_test: Vec<_> = store
            .with_field("test_id")
            .map(|f| f.id().as_u64())
            .collect();
        assert_eq!(with_test, vec![1, 3]);
        assert_eq!(store.with_field("missing").count(), 0);
    }

    #[test]
    fn test_malformed_facts() {
        let mut store = FactStore::new("s");
        assert!(matches!(
            store.assert(Fields::new()),
            Err(Error::MalformedFact(_))
        ));
        assert!(matches!(
            store.assert(fields! { "" => 1 }),
            Err(Error::MalformedFact(_))
        ));
        assert!(matches!(
            store.assert(fields! { "x" => f64::INFINITY }),
            Err(Error::MalformedFact(_))
        ));
        // Rejected facts do not consume ids.
        assert_eq!(store.next_id(), FactId::new(1));
    }

    #[test]
    fn test_clear_keeps_sequence() {
        let mut store = FactStore::new("s");
        store.assert(fields! { "a" => 1 }).unwrap();
        store.clear();
        let fact = store.assert(fields! { "a" => 1 }).unwrap();
        assert_eq!(fact.id(), FactId::new(2));
    }

    #[test]
    fn test_fields_from_json() {
        let json = serde_json::json!({"type": "B", "role": "router", "created_at": 17});
        let fields = fields_from_json(&json).unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields.get("role"), Some(&Value::literal("router")));
        assert_eq!(fields.get("created_at"), Some(&Value::integer(17)));

        let bad = serde_json::json!({"nested": {"a": 1}});
        assert!(fields_from_json(&bad).is_err());
        assert!(fields_from_json(&serde_json::json!(5)).is_err());
    }

    #[test]
    fn test_fact_to_json_and_display() {
        let mut store = FactStore::new("s");
        let fact = store.assert(fields! { "deadline" => 7 }).unwrap();
        assert_eq!(fact.to_json(), serde_json::json!({"deadline": 7}));
        assert_eq!(fact.to_string(), "#1 { deadline: 7 }");
    }
}
