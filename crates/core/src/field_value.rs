use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Field values of an entity or a form, keyed by field name.
pub type Fields = BTreeMap<String, FieldValue>;

/// Plain, serializable field data. Nested lists and maps cover arbitrary
/// nested form state; there is no variant for functions or handles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b).is_eq(),
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_floats_compare_equal_to_themselves() {
        assert_eq!(FieldValue::Float(f64::NAN), FieldValue::Float(f64::NAN));
        assert_ne!(FieldValue::Float(0.0), FieldValue::Float(-0.0));
    }

    #[test]
    fn nested_values_compare_structurally() {
        let mut inner = BTreeMap::new();
        inner.insert("lang".to_string(), FieldValue::from("es"));
        let a = FieldValue::List(vec![FieldValue::Map(inner.clone()), FieldValue::Integer(3)]);
        let b = FieldValue::List(vec![FieldValue::Map(inner), FieldValue::Integer(3)]);
        assert_eq!(a, b);

        let c = FieldValue::List(vec![FieldValue::Integer(3)]);
        assert_ne!(a, c);
    }

    #[test]
    fn integer_and_timestamp_are_distinct() {
        assert_ne!(FieldValue::Integer(5), FieldValue::Timestamp(5));
    }
}
