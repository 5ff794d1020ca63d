use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;

use crate::connection::Connection;
use crate::errors::GraphError;
use crate::node::{Node, NodeHandle};

/// Edge payload: the port pair plus the disambiguating counter.
#[derive(Clone, Debug)]
pub(crate) struct EdgeInfo {
    pub emit_port: String,
    pub recv_port: String,
    pub connection_counter: u32,
    pub closes_cycle: bool,
}

/// The description graph: named, located nodes and the connections between
/// their ports. Directed, and cyclic only through circuit-breaker nodes.
#[derive(Debug, Default)]
pub struct Graph {
    graph: StableDiGraph<Node, EdgeInfo>,
    lookup: HashMap<NodeHandle, NodeIndex>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    pub fn add_node(&mut self, node: Node) -> Result<NodeHandle, GraphError> {
        let handle = node.handle();
        if self.lookup.contains_key(&handle) {
            return Err(GraphError::DuplicateNode(handle));
        }
        let index = self.graph.add_node(node);
        self.lookup.insert(handle.clone(), index);
        Ok(handle)
    }

    pub fn node(&self, handle: &NodeHandle) -> Result<&Node, GraphError> {
        self.index_of(handle).map(|index| &self.graph[index])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_indices().map(|index| &self.graph[index])
    }

    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.nodes().map(|node| node.handle())
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn index_of(&self, handle: &NodeHandle) -> Result<NodeIndex, GraphError> {
        self.lookup
            .get(handle)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(handle.clone()))
    }

    /// Connects `emit.emit_port` to `recv.recv_port`.
    ///
    /// Validates that the ports exist on their nodes, rejects duplicates,
    /// assigns `connection_counter = count(similar)` and refuses edges that
    /// would close a cycle unless the receiver declares the circuit-breaker
    /// attribute. Admitted cycle-closing edges are marked as such.
    pub fn add_input(
        &mut self,
        emit: &NodeHandle,
        emit_port: &str,
        recv: &NodeHandle,
        recv_port: &str,
    ) -> Result<Connection, GraphError> {
        let emit_index = self.index_of(emit)?;
        let recv_index = self.index_of(recv)?;

        if !self.graph[emit_index].kind().ports_out().contains_key(emit_port) {
            return Err(GraphError::UnknownEmitPort {
                node: emit.clone(),
                port: emit_port.to_string(),
            });
        }
        if !self.graph[recv_index].kind().ports_in().contains_key(recv_port) {
            return Err(GraphError::UnknownRecvPort {
                node: recv.clone(),
                port: recv_port.to_string(),
            });
        }

        let candidate = Connection::new(emit, recv, emit_port, recv_port, 0);
        let existing = self.input_connections(recv)?;
        if existing.iter().any(|con| con == &candidate) {
            return Err(GraphError::DuplicateConnection(candidate));
        }
        let counter = existing.iter().filter(|con| con.similar(&candidate)).count() as u32;

        let closes_cycle = self.is_reachable(recv_index, emit_index);
        let mut connection = Connection::new(emit, recv, emit_port, recv_port, counter);
        if closes_cycle {
            if !self.graph[recv_index].is_circuit_breaker() {
                return Err(GraphError::WouldCycle(connection));
            }
            connection.closes_cycle = true;
        }

        self.graph.add_edge(
            emit_index,
            recv_index,
            EdgeInfo {
                emit_port: emit_port.to_string(),
                recv_port: recv_port.to_string(),
                connection_counter: counter,
                closes_cycle,
            },
        );
        Ok(connection)
    }

    /// Connects every output port of `emit` to the input port of `recv`
    /// with the same key. Returns the created connections.
    pub fn connect_matching(
        &mut self,
        emit: &NodeHandle,
        recv: &NodeHandle,
    ) -> Result<Vec<Connection>, GraphError> {
        let emit_ports = self.node(emit)?.kind().ports_out();
        let recv_ports = self.node(recv)?.kind().ports_in();
        let mut connections = Vec::new();
        for port in emit_ports.iter() {
            if recv_ports.contains_key(port.key()) {
                connections.push(self.add_input(emit, port.key(), recv, port.key())?);
            }
        }
        Ok(connections)
    }

    pub fn remove_input(
        &mut self,
        emit: &NodeHandle,
        emit_port: &str,
        recv: &NodeHandle,
        recv_port: &str,
        connection_counter: u32,
    ) -> Result<(), GraphError> {
        self.remove_input_by_connection(&Connection::new(
            emit,
            recv,
            emit_port,
            recv_port,
            connection_counter,
        ))
    }

    pub fn remove_input_by_connection(&mut self, connection: &Connection) -> Result<(), GraphError> {
        let emit_index = self.index_of(&connection.emit_handle())?;
        let recv_index = self.index_of(&connection.recv_handle())?;
        let edge = self
            .graph
            .edges_directed(emit_index, Direction::Outgoing)
            .find(|edge| {
                let info = edge.weight();
                edge.target() == recv_index
                    && info.emit_port == connection.emit_port
                    && info.recv_port == connection.recv_port
                    && info.connection_counter == connection.connection_counter
            })
            .map(|edge| edge.id());
        match edge {
            Some(edge) => {
                self.graph.remove_edge(edge);
                Ok(())
            }
            None => Err(GraphError::ConnectionNotFound(connection.clone())),
        }
    }

    fn connection_from_edge(
        &self,
        source: NodeIndex,
        target: NodeIndex,
        info: &EdgeInfo,
    ) -> Connection {
        let mut connection = Connection::new(
            &self.graph[source].handle(),
            &self.graph[target].handle(),
            &info.emit_port,
            &info.recv_port,
            info.connection_counter,
        );
        connection.closes_cycle = info.closes_cycle;
        connection
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.graph
            .edge_references()
            .map(|edge| self.connection_from_edge(edge.source(), edge.target(), edge.weight()))
            .collect()
    }

    pub fn input_connections(&self, handle: &NodeHandle) -> Result<Vec<Connection>, GraphError> {
        let index = self.index_of(handle)?;
        Ok(self
            .graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| self.connection_from_edge(edge.source(), edge.target(), edge.weight()))
            .collect())
    }

    pub fn output_connections(&self, handle: &NodeHandle) -> Result<Vec<Connection>, GraphError> {
        let index = self.index_of(handle)?;
        Ok(self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| self.connection_from_edge(edge.source(), edge.target(), edge.weight()))
            .collect())
    }

    /// Forward reachability, used by the cycle check. A node is considered
    /// reachable from itself.
    fn is_reachable(&self, from: NodeIndex, to: NodeIndex) -> bool {
        if from == to {
            return true;
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(index) = queue.pop_front() {
            for next in self.graph.neighbors_directed(index, Direction::Outgoing) {
                if next == to {
                    return true;
                }
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }

    fn walk(&self, start: NodeIndex, direction: Option<Direction>) -> Vec<NodeIndex> {
        let mut visited = HashSet::from([start]);
        let mut order = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(index) = queue.pop_front() {
            let neighbors: Vec<NodeIndex> = match direction {
                Some(direction) => self.graph.neighbors_directed(index, direction).collect(),
                None => self.graph.neighbors_undirected(index).collect(),
            };
            for next in neighbors {
                if visited.insert(next) {
                    order.push(next);
                    queue.push_back(next);
                }
            }
        }
        order
    }

    /// All nodes that depend on `handle`'s output, including itself.
    pub fn discover_output_deps(&self, handle: &NodeHandle) -> Result<Vec<NodeHandle>, GraphError> {
        let start = self.index_of(handle)?;
        Ok(self
            .walk(start, Some(Direction::Outgoing))
            .into_iter()
            .map(|index| self.graph[index].handle())
            .collect())
    }

    /// All nodes whose output `handle` depends on, including itself.
    pub fn discover_input_deps(&self, handle: &NodeHandle) -> Result<Vec<NodeHandle>, GraphError> {
        let start = self.index_of(handle)?;
        Ok(self
            .walk(start, Some(Direction::Incoming))
            .into_iter()
            .map(|index| self.graph[index].handle())
            .collect())
    }

    /// The node, its direct parents and its direct children, deduplicated.
    pub fn discover_neighbors(&self, handle: &NodeHandle) -> Result<Vec<NodeHandle>, GraphError> {
        let index = self.index_of(handle)?;
        let mut seen = HashSet::from([index]);
        let mut order = vec![index];
        for next in self.graph.neighbors_undirected(index) {
            if seen.insert(next) {
                order.push(next);
            }
        }
        Ok(order.into_iter().map(|i| self.graph[i].handle()).collect())
    }

    /// The whole subgraph reachable from `handle` in either direction,
    /// sorted by descending output-dependency count, then identity. The
    /// order is stable and used for serialization.
    pub fn discover_graph(&self, handle: &NodeHandle) -> Result<Vec<NodeHandle>, GraphError> {
        let start = self.index_of(handle)?;
        let mut handles: Vec<NodeHandle> = self
            .walk(start, None)
            .into_iter()
            .map(|index| self.graph[index].handle())
            .collect();
        self.sort_discovered(&mut handles);
        Ok(handles)
    }

    pub(crate) fn sort_discovered(&self, handles: &mut [NodeHandle]) {
        handles.sort_by_cached_key(|handle| {
            let deps = self
                .discover_output_deps(handle)
                .map(|deps| deps.len())
                .unwrap_or(0);
            (std::cmp::Reverse(deps), handle.clone())
        });
    }

    pub fn requires_input_of(&self, node: &NodeHandle, of: &NodeHandle) -> Result<bool, GraphError> {
        Ok(self.discover_input_deps(node)?.contains(of))
    }

    pub fn provides_input_to(&self, node: &NodeHandle, to: &NodeHandle) -> Result<bool, GraphError> {
        Ok(self.discover_output_deps(node)?.contains(to))
    }
}
