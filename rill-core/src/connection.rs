use std::fmt::{Display, Formatter};

use rill_types::serde::{Deserialize, Serialize};

use crate::errors::SerializeError;
use crate::node::NodeHandle;

/// A directed edge between two (node, port) pairs.
///
/// `connection_counter` disambiguates repeated identical pairs; equality
/// uses the full 4-tuple plus counter. `closes_cycle` records that the edge
/// was admitted through a circuit breaker and is not part of equality or
/// the serialized form (it is re-derived when the edge is added again).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
pub struct Connection {
    pub emit_node: String,
    pub recv_node: String,
    pub emit_port: String,
    pub recv_port: String,
    pub connection_counter: u32,
    #[serde(skip, default)]
    pub closes_cycle: bool,
}

impl Connection {
    pub fn new(
        emit_node: &NodeHandle,
        recv_node: &NodeHandle,
        emit_port: &str,
        recv_port: &str,
        connection_counter: u32,
    ) -> Connection {
        Connection {
            emit_node: emit_node.to_string(),
            recv_node: recv_node.to_string(),
            emit_port: emit_port.to_string(),
            recv_port: recv_port.to_string(),
            connection_counter,
            closes_cycle: false,
        }
    }

    pub fn emit_handle(&self) -> NodeHandle {
        NodeHandle::from_identity(&self.emit_node)
    }

    pub fn recv_handle(&self) -> NodeHandle {
        NodeHandle::from_identity(&self.recv_node)
    }

    /// Same 4-tuple, counter ignored.
    pub fn similar(&self, other: &Connection) -> bool {
        self.emit_node == other.emit_node
            && self.recv_node == other.recv_node
            && self.emit_port == other.emit_port
            && self.recv_port == other.recv_port
    }

    /// Human-readable one-liner, `a.p -> k -> b.q`. Not round-trippable
    /// through a graph document, but parseable on its own.
    pub fn serialize_compact(&self) -> String {
        format!(
            "{}.{} -> {} -> {}.{}",
            self.emit_node, self.emit_port, self.connection_counter, self.recv_node, self.recv_port
        )
    }

    pub fn deserialize_compact(compact: &str) -> Result<Connection, SerializeError> {
        let malformed = || SerializeError::MalformedCompact(compact.to_string());
        let mut parts = compact.split(" -> ");
        let emit = parts.next().ok_or_else(malformed)?;
        let counter = parts.next().ok_or_else(malformed)?;
        let recv = parts.next().ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }
        // node identities never contain dots, port keys may not either
        let (emit_node, emit_port) = emit.rsplit_once('.').ok_or_else(malformed)?;
        let (recv_node, recv_port) = recv.rsplit_once('.').ok_or_else(malformed)?;
        Ok(Connection {
            emit_node: emit_node.to_string(),
            recv_node: recv_node.to_string(),
            emit_port: emit_port.to_string(),
            recv_port: recv_port.to_string(),
            connection_counter: counter.parse().map_err(|_| malformed())?,
            closes_cycle: false,
        })
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.similar(other) && self.connection_counter == other.connection_counter
    }
}

impl Eq for Connection {}

impl Display for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.serialize_compact())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Connection {
        Connection {
            emit_node: "A [Sequence]".to_string(),
            recv_node: "B [Quadratic]".to_string(),
            emit_port: "data".to_string(),
            recv_port: "data".to_string(),
            connection_counter: 0,
            closes_cycle: false,
        }
    }

    #[test]
    fn compact_round_trip() {
        let con = sample();
        let compact = con.serialize_compact();
        assert_eq!(compact, "A [Sequence].data -> 0 -> B [Quadratic].data");
        assert_eq!(Connection::deserialize_compact(&compact).unwrap(), con);
    }

    #[test]
    fn malformed_compact_fails() {
        assert!(Connection::deserialize_compact("A -> B").is_err());
        assert!(Connection::deserialize_compact("A.p -> x -> B.q").is_err());
    }

    #[test]
    fn similar_ignores_counter() {
        let a = sample();
        let mut b = sample();
        b.connection_counter = 1;
        assert!(a.similar(&b));
        assert_ne!(a, b);
        assert_eq!(a, sample());
    }

    #[test]
    fn closes_cycle_is_not_part_of_equality() {
        let a = sample();
        let mut b = sample();
        b.closes_cycle = true;
        assert_eq!(a, b);
    }
}
