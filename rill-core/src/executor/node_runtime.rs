use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use futures::future::join_all;
use rill_types::log::{debug, error, trace, warn};
use rill_types::tokio::task;
use rill_types::tokio::time::{sleep, Duration};

use crate::bridge::{InputStream, LocalTable, OutputBridge};
use crate::errors::ExecutionError;
use crate::node::{Attr, Emissions, NodeHandle, NodeKind, Source, Transform};
use crate::port::PortSet;
use crate::storage::{DataStorage, InputListener};

use super::WorkerNode;

/// How often a finishing circuit breaker re-checks that its delivered
/// primary packets have been consumed.
const DRAIN_POLL: Duration = Duration::from_millis(1);

#[derive(Debug)]
enum Behavior {
    Source(RefCell<Box<dyn Source>>),
    Transform(RefCell<Box<dyn Transform>>),
}

/// Per-run execution state of one node inside its worker.
#[derive(Debug)]
pub(crate) struct NodeRuntime {
    handle: NodeHandle,
    ports_out: PortSet,
    /// Input keys the framework requires before a counter may process:
    /// non-optional, connected, and not fed through a cycle.
    required: Vec<String>,
    behavior: Behavior,
    storage: RefCell<DataStorage>,
    ctr: Cell<Option<u64>>,
    stopping: Cell<bool>,
    stopped: Cell<bool>,
    finished: Cell<bool>,
    tasks: RefCell<Vec<task::AbortHandle>>,
    circuit_breaker: bool,
}

impl NodeRuntime {
    /// Builds the execution instance and its storage from the shipped
    /// description. Runs inside the worker thread.
    pub(crate) fn build(
        worker_node: WorkerNode,
        locals: &mut LocalTable,
    ) -> Result<Rc<NodeRuntime>, ExecutionError> {
        let WorkerNode {
            handle,
            kind,
            inputs,
            outputs,
        } = worker_node;

        let behavior = match &kind {
            NodeKind::Source(factory) => Behavior::Source(RefCell::new(factory.build().map_err(
                |source| ExecutionError::NodeBuild {
                    node: handle.clone(),
                    source,
                },
            )?)),
            NodeKind::Transform(factory) => Behavior::Transform(RefCell::new(
                factory.build().map_err(|source| ExecutionError::NodeBuild {
                    node: handle.clone(),
                    source,
                })?,
            )),
        };

        let connected_primary: HashSet<&str> = inputs
            .iter()
            .filter(|(_, cyclic, _)| !cyclic)
            .map(|(key, _, _)| key.as_str())
            .collect();
        let required = kind
            .ports_in()
            .required_keys()
            .into_iter()
            .filter(|key| connected_primary.contains(key.as_str()))
            .collect();

        let input_slots = inputs
            .into_iter()
            .map(|(key, cyclic, endpoint)| {
                (key, cyclic, InputStream::from_endpoint(endpoint, locals))
            })
            .collect();
        let output_slots = outputs
            .into_iter()
            .map(|(key, endpoints)| {
                (
                    key,
                    endpoints
                        .into_iter()
                        .map(|endpoint| OutputBridge::from_endpoint(endpoint, locals))
                        .collect(),
                )
            })
            .collect();

        Ok(Rc::new(NodeRuntime {
            handle,
            ports_out: kind.ports_out(),
            required,
            behavior,
            storage: RefCell::new(DataStorage::new(input_slots, output_slots)),
            ctr: Cell::new(None),
            stopping: Cell::new(false),
            stopped: Cell::new(false),
            finished: Cell::new(false),
            tasks: RefCell::new(Vec::new()),
            circuit_breaker: kind.has_attr(Attr::CircuitBreaker),
        }))
    }

    pub(crate) fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    /// Opens the node's bridges. Runs before the start latch is released.
    pub(crate) fn ready(&self) -> std::io::Result<Vec<task::JoinHandle<()>>> {
        debug!("[{}] Readying", self.handle);
        self.storage.borrow_mut().ready()
    }

    pub(crate) fn start(&self) {
        debug!("[{}] Starting", self.handle);
        let result = match &self.behavior {
            Behavior::Source(source) => source.borrow_mut().on_start(),
            Behavior::Transform(transform) => transform.borrow_mut().on_start(),
        };
        if let Err(err) = result {
            error!("[{}] failed to execute on_start: {err}", self.handle);
        }
    }

    /// Cancels the node's bridge listeners; the driver then runs `finish`.
    pub(crate) fn stop(&self) {
        debug!("[{}] Stopping", self.handle);
        self.stopping.set(true);
        for handle in self.tasks.borrow_mut().drain(..) {
            handle.abort();
        }
    }

    /// Closes output bridges to propagate end-of-stream, runs `on_stop`
    /// once and aborts whatever listeners are left (cyclic inputs).
    pub(crate) fn finish(&self) {
        if self.finished.replace(true) {
            return;
        }
        debug!("[{}] Finishing", self.handle);
        for handle in self.tasks.borrow_mut().drain(..) {
            handle.abort();
        }
        self.storage.borrow_mut().close_bridges();
        if !self.stopped.replace(true) {
            let result = match &self.behavior {
                Behavior::Source(source) => source.borrow_mut().on_stop(),
                Behavior::Transform(transform) => transform.borrow_mut().on_stop(),
            };
            if let Err(err) = result {
                error!("[{}] failed to execute on_stop: {err}", self.handle);
            }
        }
        debug!("[{}] Finished", self.handle);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.get()
    }

    /// One delivery arrived for `ctr`: converge, maybe process, emit, prune.
    fn process_ctr(&self, ctr: u64) {
        let frame = self.storage.borrow().get(ctr);
        if !self.required.iter().all(|key| frame.contains(key)) {
            trace!("[{}] Not converged at {ctr} yet", self.handle);
            return;
        }
        let Behavior::Transform(transform) = &self.behavior else {
            return;
        };
        if !transform.borrow().should_process(&frame) {
            debug!("[{}] Decided not to process {ctr}", self.handle);
            return;
        }
        self.ctr.set(Some(ctr));
        let result = transform.borrow_mut().process(frame, ctr);
        match result {
            Ok(emissions) => self.apply_emissions(emissions, ctr),
            Err(err) => error!("[{}] failed to execute process: {err}", self.handle),
        }
        self.storage.borrow_mut().discard_before(ctr);
    }

    fn apply_emissions(&self, emissions: Emissions, default_ctr: u64) {
        for emission in emissions {
            let Some(port) = self.ports_out.get(&emission.port) else {
                error!(
                    "[{}] Dropping emission on unknown output port `{}`",
                    self.handle, emission.port
                );
                continue;
            };
            if let Err(err) = port.check_value(&emission.value) {
                warn!("[{}] {err}", self.handle);
            }
            let ctr = emission.ctr.unwrap_or(default_ctr);
            self.storage
                .borrow_mut()
                .put(&emission.port, ctr, emission.value);
        }
    }

    /// Breakers finish once their primary inputs closed *and* everything
    /// delivered on them was processed; the feedback input keeps listening
    /// until then.
    async fn drain_primary(&self) {
        loop {
            if self.stopping.get() {
                return;
            }
            if self.storage.borrow().primary_drained(self.ctr.get()) {
                return;
            }
            sleep(DRAIN_POLL).await;
        }
    }
}

async fn source_loop(node: Rc<NodeRuntime>) {
    let mut ctr: u64 = 0;
    loop {
        let result = {
            let Behavior::Source(source) = &node.behavior else {
                return;
            };
            source.borrow_mut().tick()
        };
        match result {
            Ok(Some(emissions)) => {
                node.apply_emissions(emissions, ctr);
                ctr += 1;
                task::yield_now().await;
            }
            Ok(None) => {
                debug!("[{}] Sequence ended", node.handle);
                return;
            }
            Err(err) => {
                error!("[{}] failed to execute tick: {err}", node.handle);
                return;
            }
        }
    }
}

async fn listen(node: Rc<NodeRuntime>, mut listener: InputListener) {
    while let Some((ctr, value)) = listener.stream.next().await {
        listener.cache.borrow_mut().insert(ctr, value);
        node.process_ctr(ctr);
    }
    debug!(
        "[{}] Input `{}` closed and drained",
        node.handle, listener.port_key
    );
}

/// Drives one node to completion: its bridge listener tasks (or the
/// producer loop), the breaker drain wait, then `finish`.
pub(crate) async fn drive(node: Rc<NodeRuntime>) {
    match &node.behavior {
        Behavior::Source(_) => {
            let handle = task::spawn_local(source_loop(node.clone()));
            node.tasks.borrow_mut().push(handle.abort_handle());
            let _ = handle.await;
        }
        Behavior::Transform(_) => {
            let listeners = node.storage.borrow_mut().take_listeners();
            let mut primary = Vec::new();
            for listener in listeners {
                let cyclic = listener.cyclic;
                let handle = task::spawn_local(listen(node.clone(), listener));
                node.tasks.borrow_mut().push(handle.abort_handle());
                if !cyclic {
                    primary.push(handle);
                }
            }
            join_all(primary).await;
            if node.circuit_breaker {
                node.drain_primary().await;
            }
        }
    }
    node.finish();
}
