//! Dynamically-typed runtime value shared by every component of the engine:
//! the expression evaluator, the operation pipeline, the group-by engine and
//! the graph pattern matcher all exchange `Value`s rather than typed columns.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A bound node record produced by a label's producer.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub label: String,
    pub id: Box<Value>,
    pub properties: BTreeMap<String, Value>,
}

/// A bound relationship record produced by a type's producer.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRecord {
    pub rel_type: String,
    pub left_id: Box<Value>,
    pub right_id: Box<Value>,
    pub properties: BTreeMap<String, Value>,
}

/// The tagged variant every AST node evaluates to (DESIGN.md: "Dynamic typing").
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Node(NodeRecord),
    Relationship(RelationshipRecord),
    /// Alternating [node, rel, node, ...] sequence bound by `p = (...)`.
    Path(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            _ => true,
        }
    }

    /// Booleans surface as 0/1 integers per §4.3, so that they keep
    /// composing with arithmetic the way the spec requires.
    pub fn bool_as_int(b: bool) -> Value {
        Value::Integer(if b { 1 } else { 0 })
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Map(_) => "Map",
            Value::Node(_) => "Node",
            Value::Relationship(_) => "Relationship",
            Value::Path(_) => "Path",
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            Value::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Property/lookup access used by `.field` and `["field"]`.
    pub fn get_property(&self, key: &str) -> Value {
        match self {
            Value::Map(m) => m.get(key).cloned().unwrap_or(Value::Null),
            Value::Node(n) => {
                if key == "id" {
                    (*n.id).clone()
                } else {
                    n.properties.get(key).cloned().unwrap_or(Value::Null)
                }
            }
            Value::Relationship(r) => match key {
                "left_id" => (*r.left_id).clone(),
                "right_id" => (*r.right_id).clone(),
                "type" => Value::String(r.rel_type.clone()),
                _ => r.properties.get(key).cloned().unwrap_or(Value::Null),
            },
            _ => Value::Null,
        }
    }

    /// Stable total ordering used by ORDER BY and DISTINCT dedup; null sorts
    /// first per §4.5.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.as_f64().unwrap().partial_cmp(&b.as_f64().unwrap())
            }
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y) {
                        Some(Ordering::Equal) => continue,
                        other => return other,
                    }
                }
                a.len().partial_cmp(&b.len())
            }
            _ => None,
        }
    }

    /// JSON-serialized key used by DISTINCT sets and deep-equality dedup
    /// (§4.6, §8 "UNION duplicate removal"). `Value::Map` is a `BTreeMap`,
    /// so key order is always sorted and this key is deterministic.
    pub fn dedup_key(&self) -> String {
        serde_json::to_string(&serde_json::Value::from(self.clone()))
            .unwrap_or_else(|_| format!("{:?}", self))
    }

    pub fn deep_eq(&self, other: &Value) -> bool {
        self.dedup_key() == other.dedup_key()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Node(n) => write!(f, "(:{} {})", n.label, Value::Map(n.properties.clone())),
            Value::Relationship(r) => {
                write!(f, "[:{} {}]", r.rel_type, Value::Map(r.properties.clone()))
            }
            Value::Path(p) => {
                write!(f, "<")?;
                for (i, v) in p.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ">")
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        use serde_json::Value as J;
        match v {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(b),
            Value::Integer(i) => J::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::String(s) => J::String(s),
            Value::Array(a) => J::Array(a.into_iter().map(Into::into).collect()),
            Value::Map(m) => {
                J::Object(m.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            Value::Node(n) => {
                let mut map = n.properties;
                map.insert("id".to_string(), (*n.id).clone());
                map.insert("label".to_string(), Value::String(n.label.clone()));
                J::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            Value::Relationship(r) => {
                let mut map = r.properties;
                map.insert("left_id".to_string(), (*r.left_id).clone());
                map.insert("right_id".to_string(), (*r.right_id).clone());
                map.insert("type".to_string(), Value::String(r.rel_type.clone()));
                J::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            Value::Path(p) => J::Array(p.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match v {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(b),
            J::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            J::String(s) => Value::String(s),
            J::Array(a) => Value::Array(a.into_iter().map(Into::into).collect()),
            J::Object(m) => {
                Value::Map(m.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sorts_first() {
        assert_eq!(Value::Null.compare(&Value::Integer(1)), Some(Ordering::Less));
        assert_eq!(Value::Integer(1).compare(&Value::Null), Some(Ordering::Greater));
    }

    #[test]
    fn numeric_cross_type_compare() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Float(2.0)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn json_round_trip_is_order_independent() {
        let mut m = BTreeMap::new();
        m.insert("b".to_string(), Value::Integer(2));
        m.insert("a".to_string(), Value::Integer(1));
        let v = Value::Map(m);
        let json: serde_json::Value = v.clone().into();
        let back: Value = json.into();
        assert!(v.deep_eq(&back));
    }

    #[test]
    fn deep_eq_ignores_map_insertion_order() {
        let mut m1 = BTreeMap::new();
        m1.insert("a".to_string(), Value::Integer(1));
        m1.insert("b".to_string(), Value::Integer(2));
        let mut m2 = BTreeMap::new();
        m2.insert("b".to_string(), Value::Integer(2));
        m2.insert("a".to_string(), Value::Integer(1));
        assert!(Value::Map(m1).deep_eq(&Value::Map(m2)));
    }
}
