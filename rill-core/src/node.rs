use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use rill_types::errors::internal::BoxedError;
use rill_types::indexmap::IndexMap;
use rill_types::serde_json;
use rill_types::Value;

use crate::errors::GraphError;
use crate::location::Location;
use crate::port::PortSet;

/// Substrings a node name must not contain: they would break the string
/// identity and the compact connection format.
const RESERVED: [&str; 4] = [" -> ", " [", "] ", "."];

/// Stable string identity of a node: `"<name> [<ClassName>]"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(String);

impl NodeHandle {
    pub fn new(name: &str, class_name: &str) -> NodeHandle {
        NodeHandle(format!("{name} [{class_name}]"))
    }

    pub fn from_identity(identity: &str) -> NodeHandle {
        NodeHandle(identity.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optional behaviour attributes declared by a node class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attr {
    /// The node tolerates incoming edges that close a cycle and bootstraps
    /// its feedback input from a fallback.
    CircuitBreaker,
    /// The node emits at counters other than the one it received.
    CtrIncrease,
}

/// The converged input values available at one counter, keyed by port key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputFrame(IndexMap<String, Value>);

impl InputFrame {
    pub fn new() -> InputFrame {
        InputFrame(IndexMap::new())
    }

    pub fn insert(&mut self, key: String, value: Value) {
        self.0.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn take(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|key| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for InputFrame {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        InputFrame(iter.into_iter().collect())
    }
}

/// One outgoing packet: a value on an output port, optionally at a counter
/// other than the one being processed.
#[derive(Clone, Debug, PartialEq)]
pub struct Emission {
    pub port: String,
    pub value: Value,
    pub ctr: Option<u64>,
}

/// Ordered set of packets returned by `process` or `tick`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Emissions(Vec<Emission>);

impl Emissions {
    pub fn new() -> Emissions {
        Emissions(Vec::new())
    }

    /// No output this counter.
    pub fn none() -> Emissions {
        Emissions(Vec::new())
    }

    pub fn emit(mut self, port: &str, value: impl Into<Value>) -> Emissions {
        self.0.push(Emission {
            port: port.to_string(),
            value: value.into(),
            ctr: None,
        });
        self
    }

    /// Emit at an explicit counter instead of inheriting the processed one.
    pub fn emit_at(mut self, port: &str, value: impl Into<Value>, ctr: u64) -> Emissions {
        self.0.push(Emission {
            port: port.to_string(),
            value: value.into(),
            ctr: Some(ctr),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Emission> {
        self.0.iter()
    }
}

impl IntoIterator for Emissions {
    type Item = Emission;
    type IntoIter = std::vec::IntoIter<Emission>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Description-level handle of a producer class: declares ports and builds
/// fresh execution instances, one per run.
pub trait SourceFactory: Debug + Send + Sync {
    fn class_name(&self) -> &str;

    fn ports_out(&self) -> PortSet;

    /// Class-specific settings for graph serialization.
    fn settings(&self) -> serde_json::Value {
        serde_json::Value::Object(Default::default())
    }

    fn attrs(&self) -> &[Attr] {
        &[]
    }

    fn build(&self) -> Result<Box<dyn Source>, BoxedError>;
}

/// Description-level handle of a transform or sink class.
pub trait TransformFactory: Debug + Send + Sync {
    fn class_name(&self) -> &str;

    fn ports_in(&self) -> PortSet;

    fn ports_out(&self) -> PortSet;

    fn settings(&self) -> serde_json::Value {
        serde_json::Value::Object(Default::default())
    }

    fn attrs(&self) -> &[Attr] {
        &[]
    }

    fn build(&self) -> Result<Box<dyn Transform>, BoxedError>;
}

/// Execution instance of a producer: a restartable lazy finite sequence.
pub trait Source: Debug {
    fn on_start(&mut self) -> Result<(), BoxedError> {
        Ok(())
    }

    fn on_stop(&mut self) -> Result<(), BoxedError> {
        Ok(())
    }

    /// Produce the next batch of emissions; `None` ends the run.
    fn tick(&mut self) -> Result<Option<Emissions>, BoxedError>;
}

/// Execution instance of a transform or sink.
pub trait Transform: Debug {
    fn on_start(&mut self) -> Result<(), BoxedError> {
        Ok(())
    }

    fn on_stop(&mut self) -> Result<(), BoxedError> {
        Ok(())
    }

    /// Consulted once the framework's convergence check has passed.
    fn should_process(&self, _frame: &InputFrame) -> bool {
        true
    }

    fn process(&mut self, frame: InputFrame, ctr: u64) -> Result<Emissions, BoxedError>;
}

/// A node class reference: whether `tick` or `process` drives it.
#[derive(Clone, Debug)]
pub enum NodeKind {
    Source(Arc<dyn SourceFactory>),
    Transform(Arc<dyn TransformFactory>),
}

impl NodeKind {
    pub fn class_name(&self) -> &str {
        match self {
            NodeKind::Source(factory) => factory.class_name(),
            NodeKind::Transform(factory) => factory.class_name(),
        }
    }

    pub fn ports_in(&self) -> PortSet {
        match self {
            NodeKind::Source(_) => PortSet::empty(),
            NodeKind::Transform(factory) => factory.ports_in(),
        }
    }

    pub fn ports_out(&self) -> PortSet {
        match self {
            NodeKind::Source(factory) => factory.ports_out(),
            NodeKind::Transform(factory) => factory.ports_out(),
        }
    }

    pub fn settings(&self) -> serde_json::Value {
        match self {
            NodeKind::Source(factory) => factory.settings(),
            NodeKind::Transform(factory) => factory.settings(),
        }
    }

    pub fn attrs(&self) -> &[Attr] {
        match self {
            NodeKind::Source(factory) => factory.attrs(),
            NodeKind::Transform(factory) => factory.attrs(),
        }
    }

    pub fn has_attr(&self, attr: Attr) -> bool {
        self.attrs().contains(&attr)
    }
}

/// Description-level node: a named, located instance of a node class.
#[derive(Clone, Debug)]
pub struct Node {
    name: String,
    compute_on: Location,
    kind: NodeKind,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        compute_on: Location,
        kind: NodeKind,
    ) -> Result<Node, GraphError> {
        let name = name.into();
        if name.is_empty() {
            return Err(GraphError::InvalidNodeName {
                name,
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(reserved) = RESERVED.iter().find(|r| name.contains(*r)) {
            return Err(GraphError::InvalidNodeName {
                name,
                reason: format!("must not contain `{reserved}`"),
            });
        }
        Ok(Node {
            name,
            compute_on,
            kind,
        })
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle::new(&self.name, self.kind.class_name())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compute_on(&self) -> &Location {
        &self.compute_on
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_circuit_breaker(&self) -> bool {
        self.kind.has_attr(Attr::CircuitBreaker)
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_formats_name_and_class() {
        assert_eq!(NodeHandle::new("A", "Sequence").as_str(), "A [Sequence]");
    }

    #[test]
    fn emissions_builder() {
        let emissions = Emissions::new().emit("data", 1).emit_at("data", 2, 7);
        let items: Vec<_> = emissions.into_iter().collect();
        assert_eq!(items[0].ctr, None);
        assert_eq!(items[1].ctr, Some(7));
        assert_eq!(items[1].value, Value::Int(2));
    }
}
