//! Attribute value model for resource declarations.
//!
//! Attribute values are a tagged variant rather than free-form YAML so the
//! reference resolver can pattern-match safely: a value is a literal
//! (null, bool, number, string), a collection (list, map), or a symbolic
//! reference to another resource's attribute, written `${kind.name.attr}`.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// A single attribute value in a resource declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Explicit null.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Floating point literal.
    Float(f64),
    /// String literal.
    String(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Key-ordered map of values.
    Map(BTreeMap<String, Value>),
    /// Reference to another resource's attribute.
    Reference(Reference),
}

/// A symbolic reference to another resource's attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    /// Kind of the referenced resource.
    pub kind: String,
    /// Name of the referenced resource.
    pub name: String,
    /// Attribute (or computed identifier such as `id`) being referenced.
    pub attribute: String,
}

impl Reference {
    /// Parses a reference expression of the form `kind.name.attribute`.
    ///
    /// The attribute segment may itself contain dots.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the expression does not have
    /// at least three non-empty dot-separated segments.
    pub fn parse(expression: &str) -> std::result::Result<Self, String> {
        let mut parts = expression.splitn(3, '.');
        let kind = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        let attribute = parts.next().unwrap_or_default();

        if kind.is_empty() || name.is_empty() || attribute.is_empty() {
            return Err(String::from(
                "expected three dot-separated segments: kind.name.attribute",
            ));
        }

        Ok(Self {
            kind: kind.to_string(),
            name: name.to_string(),
            attribute: attribute.to_string(),
        })
    }

    /// Returns the `kind.name` address of the referenced resource.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}.{}", self.kind, self.name)
    }

    /// Returns the full `kind.name.attribute` expression.
    #[must_use]
    pub fn expression(&self) -> String {
        format!("{}.{}.{}", self.kind, self.name, self.attribute)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}}}", self.expression())
    }
}

impl Value {
    /// Returns true if this value is a reference, at the top level.
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_))
    }

    /// Returns the string content for string literals.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Collects every reference contained in this value, recursively.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Reference(r) => out.push(r),
            Self::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(out);
                }
            }
            _ => {}
        }
    }

    /// Returns true if this value contains no references anywhere.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.references().is_empty()
    }

    /// Produces a copy of this value with every reference replaced through
    /// `lookup`. Fails with the first reference that `lookup` cannot satisfy.
    ///
    /// # Errors
    ///
    /// Returns the unresolvable reference.
    pub fn resolve<F>(&self, lookup: &F) -> std::result::Result<Self, Reference>
    where
        F: Fn(&Reference) -> Option<Self>,
    {
        match self {
            Self::Reference(r) => lookup(r).ok_or_else(|| r.clone()),
            Self::List(items) => items
                .iter()
                .map(|item| item.resolve(lookup))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Self::List),
            Self::Map(entries) => entries
                .iter()
                .map(|(k, v)| v.resolve(lookup).map(|v| (k.clone(), v)))
                .collect::<std::result::Result<BTreeMap<_, _>, _>>()
                .map(Self::Map),
            other => Ok(other.clone()),
        }
    }

    /// Appends a deterministic canonical encoding of this value.
    ///
    /// Used for hashing: equal values always produce equal bytes, and maps
    /// iterate in key order.
    pub fn canonical_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Self::Null => out.push(b'n'),
            Self::Bool(b) => {
                out.push(b'b');
                out.push(u8::from(*b));
            }
            Self::Int(i) => {
                out.push(b'i');
                out.extend_from_slice(&i.to_be_bytes());
            }
            Self::Float(f) => {
                out.push(b'f');
                out.extend_from_slice(&f.to_be_bytes());
            }
            Self::String(s) => {
                out.push(b's');
                out.extend_from_slice(&(s.len() as u64).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Self::List(items) => {
                out.push(b'l');
                out.extend_from_slice(&(items.len() as u64).to_be_bytes());
                for item in items {
                    item.canonical_bytes(out);
                }
            }
            Self::Map(entries) => {
                out.push(b'm');
                out.extend_from_slice(&(entries.len() as u64).to_be_bytes());
                for (key, value) in entries {
                    out.extend_from_slice(&(key.len() as u64).to_be_bytes());
                    out.extend_from_slice(key.as_bytes());
                    value.canonical_bytes(out);
                }
            }
            Self::Reference(r) => {
                out.push(b'r');
                let expr = r.expression();
                out.extend_from_slice(&(expr.len() as u64).to_be_bytes());
                out.extend_from_slice(expr.as_bytes());
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Reference(r) => write!(f, "{r}"),
        }
    }
}

/// Extracts the reference expression from a string if the entire string is a
/// single `${...}` token.
fn reference_token(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    // A brace inside the token would mean embedded interpolation.
    if inner.contains('{') || inner.contains('}') {
        return None;
    }
    Some(inner)
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => items.serialize(serializer),
            Self::Map(entries) => entries.serialize(serializer),
            Self::Reference(r) => serializer.serialize_str(&r.to_string()),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a literal, list, map, or ${kind.name.attr} reference")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> std::result::Result<Value, D::Error> {
        deserializer.deserialize_any(self)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| E::custom(format!("integer out of range: {v}")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        match reference_token(v) {
            Some(expr) => Reference::parse(expr)
                .map(Value::Reference)
                .map_err(|msg| E::custom(format!("invalid reference '{v}': {msg}"))),
            None => Ok(Value::String(v.to_string())),
        }
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Value, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            entries.insert(key, value);
        }
        Ok(Value::Map(entries))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_parse() {
        let r = Reference::parse("network.main.id").expect("should parse");
        assert_eq!(r.kind, "network");
        assert_eq!(r.name, "main");
        assert_eq!(r.attribute, "id");
        assert_eq!(r.address(), "network.main");
    }

    #[test]
    fn test_reference_parse_dotted_attribute() {
        let r = Reference::parse("instance.web.network_interface.0.ip").expect("should parse");
        assert_eq!(r.attribute, "network_interface.0.ip");
    }

    #[test]
    fn test_reference_parse_invalid() {
        assert!(Reference::parse("network.main").is_err());
        assert!(Reference::parse("").is_err());
        assert!(Reference::parse("..").is_err());
    }

    #[test]
    fn test_yaml_reference_detection() {
        let value: Value = serde_yaml::from_str("\"${network.main.id}\"").expect("valid yaml");
        assert!(value.is_reference());
    }

    #[test]
    fn test_yaml_plain_string_stays_literal() {
        let value: Value = serde_yaml::from_str("\"10.0.0.0/16\"").expect("valid yaml");
        assert_eq!(value, Value::String(String::from("10.0.0.0/16")));
    }

    #[test]
    fn test_nested_references_collected() {
        let yaml = r"
rules:
  - port: 80
    source: ${network.main.cidr_block}
  - port: 22
    source: 0.0.0.0/0
";
        let value: Value = serde_yaml::from_str(yaml).expect("valid yaml");
        let refs = value.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].expression(), "network.main.cidr_block");
    }

    #[test]
    fn test_resolve_substitutes() {
        let value = Value::List(vec![
            Value::Reference(Reference::parse("network.main.id").expect("valid")),
            Value::Int(8),
        ]);

        let resolved = value
            .resolve(&|r| {
                (r.attribute == "id").then(|| Value::String(String::from("net-123")))
            })
            .expect("should resolve");

        assert_eq!(
            resolved,
            Value::List(vec![Value::String(String::from("net-123")), Value::Int(8)])
        );
    }

    #[test]
    fn test_resolve_fails_on_unknown() {
        let value = Value::Reference(Reference::parse("network.main.missing").expect("valid"));
        let result = value.resolve(&|_| None);
        assert!(result.is_err());
    }

    #[test]
    fn test_canonical_bytes_deterministic() {
        let mut a = BTreeMap::new();
        a.insert(String::from("x"), Value::Int(1));
        a.insert(String::from("y"), Value::Bool(true));

        let mut buf1 = Vec::new();
        let mut buf2 = Vec::new();
        Value::Map(a.clone()).canonical_bytes(&mut buf1);
        Value::Map(a).canonical_bytes(&mut buf2);

        assert_eq!(buf1, buf2);
    }
}
