mod computer;
mod node_runtime;
mod process_computer;
pub mod worker;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rill_types::indexmap::IndexMap;
use rill_types::log::warn;
use rill_types::serde::{Deserialize, Serialize};
use rill_types::tokio::sync::mpsc;
use uuid::Uuid;

use crate::bridge::{
    resolve_spec, BridgeSpec, BridgeVariant, ReceiverEndpoint, SenderEndpoint,
};
use crate::errors::ExecutionError;
use crate::graph::Graph;
use crate::location::Location;
use crate::node::{Node, NodeHandle, NodeKind};
use crate::registry::BridgeRegistry;

use computer::Computer;
use process_computer::ProcessComputer;

/// Launcher configuration.
#[derive(Clone, Debug)]
pub struct ExecutorOptions {
    /// Grace period per computer for a requested stop.
    pub stop_timeout: Duration,
    /// Bound on forced teardown per computer; expired worker processes are
    /// killed.
    pub close_timeout: Duration,
    /// Binary spawned for worker processes. Falls back to the
    /// `RILL_WORKER_BIN` environment variable, then to the current
    /// executable. The binary must dispatch to [`worker::worker_main`] when
    /// invoked with the single argument `worker`.
    pub worker_bin: Option<PathBuf>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_millis(300),
            close_timeout: Duration::from_millis(500),
            worker_bin: None,
        }
    }
}

/// A node with its connections resolved to bridge specs, keyed by port.
#[derive(Debug)]
pub(crate) struct LockedNode {
    pub node: Node,
    pub emit: IndexMap<String, Vec<BridgeSpec>>,
    pub recv: IndexMap<String, RecvSpec>,
}

/// Receiving side of a resolved connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
pub(crate) struct RecvSpec {
    pub spec: BridgeSpec,
    /// The connection was admitted through a circuit breaker; the port is
    /// not part of the framework's convergence requirement.
    pub cyclic: bool,
}

/// A node ready to be moved into its worker thread: built kind plus the
/// transport endpoints it owns.
#[derive(Debug)]
pub(crate) struct WorkerNode {
    pub handle: NodeHandle,
    pub kind: NodeKind,
    pub inputs: Vec<(String, bool, ReceiverEndpoint)>,
    pub outputs: Vec<(String, Vec<SenderEndpoint>)>,
}

/// Resolves every connection of the graph to a bridge spec and freezes the
/// per-node endpoint maps. Fails if no registered variant claims a
/// connection.
pub(crate) fn lock(
    graph: &Graph,
    bridges: &BridgeRegistry,
    socket_dir: &Path,
) -> Result<Vec<LockedNode>, ExecutionError> {
    let mut locked: IndexMap<NodeHandle, LockedNode> = graph
        .nodes()
        .map(|node| {
            (
                node.handle(),
                LockedNode {
                    node: node.clone(),
                    emit: IndexMap::new(),
                    recv: IndexMap::new(),
                },
            )
        })
        .collect();

    for connection in graph.connections() {
        let emit_handle = connection.emit_handle();
        let recv_handle = connection.recv_handle();
        let from = graph.node(&emit_handle)?.compute_on().clone();
        let to = graph.node(&recv_handle)?.compute_on().clone();
        let spec = resolve_spec(bridges, &connection, &from, &to, socket_dir)?;

        locked[&emit_handle]
            .emit
            .entry(connection.emit_port.clone())
            .or_default()
            .push(spec.clone());

        let recv = &mut locked[&recv_handle].recv;
        if recv
            .insert(
                connection.recv_port.clone(),
                RecvSpec {
                    spec,
                    cyclic: connection.closes_cycle,
                },
            )
            .is_some()
        {
            warn!(
                "[{recv_handle}] Multiple connections into port `{}`; keeping the last",
                connection.recv_port
            );
        }
    }

    Ok(locked.into_values().collect())
}

/// Materializes the in-process channels of one process group and splits the
/// group into one worker per distinct location.
///
/// `Thread`/`ThreadSync` channels are created here because both of their
/// endpoints live in this process; `Local` and socket bridges stay pending
/// and are materialized by the worker that owns them.
pub(crate) fn assemble_process_group(
    group: Vec<LockedNode>,
) -> Vec<(Location, Vec<WorkerNode>)> {
    let mut pending_senders: HashMap<Uuid, SenderEndpoint> = HashMap::new();

    // receiver pass: allocate the shared channels
    let mut assembled = Vec::new();
    for locked in group {
        let mut inputs = Vec::new();
        for (port_key, recv) in &locked.recv {
            let endpoint = match recv.spec.variant {
                BridgeVariant::Local => ReceiverEndpoint::LocalPending(recv.spec.id),
                BridgeVariant::Thread => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    pending_senders.insert(recv.spec.id, SenderEndpoint::Thread(tx));
                    ReceiverEndpoint::Thread(rx)
                }
                BridgeVariant::ThreadSync => {
                    let (tx, rx) = crossbeam::channel::unbounded();
                    pending_senders.insert(recv.spec.id, SenderEndpoint::ThreadSync(tx));
                    ReceiverEndpoint::ThreadSync(rx)
                }
                BridgeVariant::Process => ReceiverEndpoint::Socket(
                    recv.spec.socket.clone().expect("socket bridge has a path"),
                ),
            };
            inputs.push((port_key.clone(), recv.cyclic, endpoint));
        }
        assembled.push((locked, inputs));
    }

    // sender pass: claim the matching halves
    let mut workers: IndexMap<Location, Vec<WorkerNode>> = IndexMap::new();
    for (locked, inputs) in assembled {
        let mut outputs = Vec::new();
        for (port_key, specs) in &locked.emit {
            let mut endpoints = Vec::new();
            for spec in specs {
                let endpoint = match spec.variant {
                    BridgeVariant::Local => SenderEndpoint::LocalPending(spec.id),
                    BridgeVariant::Thread | BridgeVariant::ThreadSync => pending_senders
                        .remove(&spec.id)
                        .expect("in-process bridge sender resolved in the same group"),
                    BridgeVariant::Process => SenderEndpoint::Socket(
                        spec.socket.clone().expect("socket bridge has a path"),
                    ),
                };
                endpoints.push(endpoint);
            }
            outputs.push((port_key.clone(), endpoints));
        }
        let location = locked.node.compute_on().clone();
        workers.entry(location).or_default().push(WorkerNode {
            handle: locked.node.handle(),
            kind: locked.node.kind().clone(),
            inputs,
            outputs,
        });
    }

    workers.into_iter().collect()
}

#[derive(Debug)]
enum ComputerHandle {
    Thread(Computer),
    Process(ProcessComputer),
}

impl ComputerHandle {
    fn setup(&mut self) -> Result<(), ExecutionError> {
        match self {
            ComputerHandle::Thread(computer) => computer.setup(),
            ComputerHandle::Process(computer) => computer.setup(),
        }
    }

    fn start(&mut self) {
        match self {
            ComputerHandle::Thread(computer) => computer.start(),
            ComputerHandle::Process(computer) => computer.start(),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            ComputerHandle::Thread(computer) => computer.is_finished(),
            ComputerHandle::Process(computer) => computer.is_finished(),
        }
    }

    fn join(&mut self) -> Result<(), ExecutionError> {
        match self {
            ComputerHandle::Thread(computer) => computer.join(),
            ComputerHandle::Process(computer) => computer.join(),
        }
    }

    fn stop(&mut self, timeout: Duration) {
        match self {
            ComputerHandle::Thread(computer) => computer.stop(timeout),
            ComputerHandle::Process(computer) => computer.stop(timeout),
        }
    }

    fn close(&mut self, timeout: Duration) {
        match self {
            ComputerHandle::Thread(computer) => computer.close(timeout),
            ComputerHandle::Process(computer) => computer.close(timeout),
        }
    }
}

/// Runs a locked graph: one cooperative worker per thread location in this
/// process, one worker process per named process location.
#[derive(Debug)]
pub struct GraphExecutor {
    computers: Vec<ComputerHandle>,
    options: ExecutorOptions,
    // keeps the bridge socket directory alive for the run
    _socket_dir: tempfile::TempDir,
}

impl GraphExecutor {
    /// Locks the graph, builds all computers, readies them and releases the
    /// start latches. Building is fresh per call, so the same graph can be
    /// executed repeatedly.
    pub fn start_all(
        graph: &Graph,
        bridges: &BridgeRegistry,
        options: &ExecutorOptions,
    ) -> Result<GraphExecutor, ExecutionError> {
        let socket_dir = tempfile::Builder::new().prefix("rill-bridges-").tempdir()?;
        let locked = lock(graph, bridges, socket_dir.path())?;

        let mut process_groups: IndexMap<(String, String), Vec<LockedNode>> = IndexMap::new();
        for node in locked {
            process_groups
                .entry(node.node.compute_on().process_key())
                .or_default()
                .push(node);
        }

        let mut computers = Vec::new();
        for ((_, process), group) in process_groups {
            if process.is_empty() {
                for (location, nodes) in assemble_process_group(group) {
                    computers.push(ComputerHandle::Thread(Computer::new(location, nodes)));
                }
            } else {
                computers.push(ComputerHandle::Process(ProcessComputer::new(
                    process, group, options,
                )?));
            }
        }

        for computer in &mut computers {
            computer.setup()?;
        }
        for computer in &mut computers {
            computer.start();
        }

        Ok(GraphExecutor {
            computers,
            options: options.clone(),
            _socket_dir: socket_dir,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.computers.iter().all(|computer| computer.is_finished())
    }

    /// Blocks until every computer has finished on its own.
    pub fn join_all(&mut self) -> Result<(), ExecutionError> {
        for computer in &mut self.computers {
            computer.join()?;
        }
        Ok(())
    }

    /// Requests a graceful stop everywhere, then forces teardown of
    /// whatever is left.
    pub fn stop_all(&mut self) {
        for computer in &mut self.computers {
            computer.stop(self.options.stop_timeout);
        }
        for computer in &mut self.computers {
            computer.close(self.options.close_timeout);
        }
    }
}
