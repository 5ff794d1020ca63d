use std::fmt::{Display, Formatter};

use rill_types::thiserror;
use rill_types::thiserror::Error;
use rill_types::Value;

#[derive(Error, Debug)]
#[error("value not accepted on port `{port}`: {reason}")]
pub struct PortCheckError {
    pub port: String,
    pub reason: String,
}

/// The shape a port accepts. Compound kinds validate recursively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortKind {
    Any,
    Bool,
    Int,
    Float,
    Str,
    List(Box<PortKind>),
    Map(Box<PortKind>),
}

impl PortKind {
    fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (PortKind::Any, _) => Ok(()),
            (PortKind::Bool, Value::Bool(_)) => Ok(()),
            (PortKind::Int, Value::Int(_)) => Ok(()),
            // int packets are acceptable wherever floats are
            (PortKind::Float, Value::Int(_) | Value::Float(_)) => Ok(()),
            (PortKind::Str, Value::Str(_)) => Ok(()),
            (PortKind::List(inner), Value::Array(values)) => {
                for value in values {
                    inner.check(value)?;
                }
                Ok(())
            }
            (PortKind::Map(inner), Value::Map(entries)) => {
                for value in entries.values() {
                    inner.check(value)?;
                }
                Ok(())
            }
            _ => Err(format!("expected {}, got {}", self, value.type_name())),
        }
    }
}

impl Display for PortKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PortKind::Any => write!(f, "any"),
            PortKind::Bool => write!(f, "bool"),
            PortKind::Int => write!(f, "int"),
            PortKind::Float => write!(f, "float"),
            PortKind::Str => write!(f, "str"),
            PortKind::List(inner) => write!(f, "list of {inner}"),
            PortKind::Map(inner) => write!(f, "map of {inner}"),
        }
    }
}

/// A typed, named endpoint on a node.
///
/// The key is the stable identifier used in connections, emissions and
/// serialized documents; it is derived from the declared name.
#[derive(Clone, Debug)]
pub struct Port {
    key: String,
    name: String,
    optional: bool,
    kind: PortKind,
}

impl Port {
    pub fn new(name: &str, kind: PortKind) -> Port {
        Port {
            key: name.to_lowercase().replace(' ', "_"),
            name: name.to_string(),
            optional: false,
            kind,
        }
    }

    pub fn optional(mut self) -> Port {
        self.optional = true;
        self
    }

    /// Re-keys the port without changing its kind.
    pub fn contextualized(&self, key: &str) -> Port {
        Port {
            key: key.to_string(),
            name: self.name.clone(),
            optional: self.optional,
            kind: self.kind.clone(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn kind(&self) -> &PortKind {
        &self.kind
    }

    pub fn check_value(&self, value: &Value) -> Result<(), PortCheckError> {
        self.kind.check(value).map_err(|reason| PortCheckError {
            port: self.key.clone(),
            reason,
        })
    }
}

impl PartialEq for Port {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.key == other.key
    }
}

impl Eq for Port {}

impl Display for Port {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// Ordered, key-addressable set of ports declared by a node class.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortSet(Vec<Port>);

impl PortSet {
    pub fn new(ports: Vec<Port>) -> PortSet {
        PortSet(ports)
    }

    pub fn empty() -> PortSet {
        PortSet(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&Port> {
        self.0.iter().find(|port| port.key() == key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|port| port.key())
    }

    /// Keys of the non-optional ports.
    pub fn required_keys(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|port| !port.is_optional())
            .map(|port| port.key().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Port> for PortSet {
    fn from_iter<T: IntoIterator<Item = Port>>(iter: T) -> Self {
        PortSet(iter.into_iter().collect())
    }
}

impl IntoIterator for PortSet {
    type Item = Port;
    type IntoIter = std::vec::IntoIter<Port>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_derived_from_name() {
        let port = Port::new("Alternate Data", PortKind::Int);
        assert_eq!(port.key(), "alternate_data");
        assert_eq!(port.name(), "Alternate Data");
    }

    #[test]
    fn equality_is_kind_and_key() {
        let a = Port::new("Data", PortKind::Int);
        let b = Port::new("data", PortKind::Int).optional();
        let c = Port::new("Data", PortKind::Float);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn contextualized_keeps_kind() {
        let port = Port::new("Data", PortKind::Int);
        let rekeyed = port.contextualized("delayed");
        assert_eq!(rekeyed.key(), "delayed");
        assert_eq!(rekeyed.kind(), &PortKind::Int);
    }

    #[test]
    fn int_port_checks() {
        let port = Port::new("Data", PortKind::Int);
        for value in [Value::Int(0), Value::Int(1), Value::Int(20), Value::Int(-15)] {
            assert!(port.check_value(&value).is_ok());
        }
        assert!(port.check_value(&Value::from("15")).is_err());
        assert!(port.check_value(&Value::from(1.5)).is_err());
    }

    #[test]
    fn float_port_accepts_ints() {
        let port = Port::new("Signal", PortKind::Float);
        assert!(port.check_value(&Value::Int(3)).is_ok());
        assert!(port.check_value(&Value::from(3.25)).is_ok());
        assert!(port.check_value(&Value::Bool(true)).is_err());
    }

    #[test]
    fn compound_port_delegates_to_inner_kind() {
        let port = Port::new("Frame", PortKind::List(Box::new(PortKind::Int)));
        assert!(port
            .check_value(&Value::Array(vec![Value::Int(1), Value::Int(2)]))
            .is_ok());
        let mixed = Value::Array(vec![Value::Int(1), Value::from("x")]);
        let err = port.check_value(&mixed).unwrap_err();
        assert!(err.reason.contains("expected int"));
        assert!(port.check_value(&Value::Int(1)).is_err());
    }

    #[test]
    fn required_keys_skip_optional() {
        let ports = PortSet::new(vec![
            Port::new("Data", PortKind::Int),
            Port::new("Aux", PortKind::Any).optional(),
        ]);
        assert_eq!(ports.required_keys(), vec!["data".to_string()]);
        assert!(ports.contains_key("aux"));
    }
}
