use std::sync::Arc;
use std::thread::{Builder, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, Sender};
use rill_types::log::{debug, error, info};
use rill_types::tokio::runtime;
use rill_types::tokio::sync::Notify;
use rill_types::tokio::task::LocalSet;
use rill_types::tokio::{self, task};

use crate::bridge::LocalTable;
use crate::errors::ExecutionError;
use crate::location::Location;

use super::node_runtime::{drive, NodeRuntime};
use super::WorkerNode;

const JOIN_POLL: Duration = Duration::from_millis(5);

/// A single-threaded cooperative worker executing one co-located group of
/// nodes. The parent gates it through a ready event and start/stop/close
/// latches.
#[derive(Debug)]
pub(crate) struct Computer {
    location: Location,
    pending: Option<Vec<WorkerNode>>,
    worker: Option<JoinHandle<()>>,
    joined: bool,
    start_latch: Arc<Notify>,
    stop_latch: Arc<Notify>,
    close_latch: Arc<Notify>,
}

impl Computer {
    pub(crate) fn new(location: Location, nodes: Vec<WorkerNode>) -> Computer {
        info!(
            "[{location}] Creating thread computer with {} nodes",
            nodes.len()
        );
        Computer {
            location,
            pending: Some(nodes),
            worker: None,
            joined: false,
            start_latch: Arc::new(Notify::new()),
            stop_latch: Arc::new(Notify::new()),
            close_latch: Arc::new(Notify::new()),
        }
    }

    /// Spawns the worker thread and blocks until its nodes are readied.
    pub(crate) fn setup(&mut self) -> Result<(), ExecutionError> {
        info!("[{}] Readying", self.location);
        let nodes = self.pending.take().expect("computer set up twice");
        let (ready_tx, ready_rx): (Sender<Result<(), String>>, Receiver<Result<(), String>>) =
            bounded(1);
        let location = self.location.clone();
        let start = self.start_latch.clone();
        let stop = self.stop_latch.clone();
        let close = self.close_latch.clone();

        let worker = Builder::new()
            .name(format!("computer-{}", self.location))
            .spawn(move || run_worker(location, nodes, ready_tx, start, stop, close))
            .map_err(ExecutionError::CannotSpawnWorkerThread)?;
        self.worker = Some(worker);

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(ExecutionError::WorkerProtocol(message)),
            Err(_) => Err(ExecutionError::WorkerQuitEarly(self.location.to_string())),
        }
    }

    /// Releases the start latch; the nodes begin producing and consuming.
    pub(crate) fn start(&mut self) {
        info!("[{}] Starting", self.location);
        self.start_latch.notify_one();
    }

    /// Blocks until the worker finishes on its own.
    pub(crate) fn join(&mut self) -> Result<(), ExecutionError> {
        info!("[{}] Joining", self.location);
        if let Some(worker) = self.worker.take() {
            self.joined = true;
            worker.join().map_err(|_| ExecutionError::WorkerPanic)?;
        }
        Ok(())
    }

    /// Requests a graceful stop and waits up to `timeout`.
    pub(crate) fn stop(&mut self, timeout: Duration) {
        info!("[{}] Stopping", self.location);
        self.stop_latch.notify_one();
        let finished = self.wait(timeout);
        info!("[{}] Returning; worker finished: {finished}", self.location);
    }

    /// Cancels whatever is still running and waits up to `timeout`.
    pub(crate) fn close(&mut self, timeout: Duration) {
        info!("[{}] Closing", self.location);
        self.close_latch.notify_one();
        if !self.wait(timeout) {
            info!("[{}] Timeout reached, but still alive", self.location);
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.joined
            || self
                .worker
                .as_ref()
                .map_or(false, |worker| worker.is_finished())
    }

    fn wait(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self
                .worker
                .as_ref()
                .map_or(true, |worker| worker.is_finished())
            {
                if let Some(worker) = self.worker.take() {
                    self.joined = true;
                    let _ = worker.join();
                }
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(JOIN_POLL);
        }
    }
}

/// The worker body: build runtimes, ready, await start, then race the node
/// drivers against the stop and close latches.
fn run_worker(
    location: Location,
    nodes: Vec<WorkerNode>,
    ready_tx: Sender<Result<(), String>>,
    start: Arc<Notify>,
    stop: Arc<Notify>,
    close: Arc<Notify>,
) {
    debug!("[{location}] Worker thread running");
    let rt = match runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            error!("[{location}] Failed to build worker runtime: {err}");
            let _ = ready_tx.send(Err(err.to_string()));
            return;
        }
    };

    let local = LocalSet::new();
    // the future borrows the latches and the location label; only `nodes`
    // is consumed
    local.block_on(&rt, async {
        let mut locals = LocalTable::default();
        let mut runtimes = Vec::new();
        for node in nodes {
            match NodeRuntime::build(node, &mut locals) {
                Ok(runtime) => runtimes.push(runtime),
                Err(err) => {
                    error!("[{location}] {err}");
                    let _ = ready_tx.send(Err(err.to_string()));
                    return;
                }
            }
        }
        let mut pumps = Vec::new();
        for runtime in &runtimes {
            match runtime.ready() {
                Ok(bridge_pumps) => pumps.extend(bridge_pumps),
                Err(err) => {
                    error!("[{location}] Failed to ready {}: {err}", runtime.handle());
                    let _ = ready_tx.send(Err(err.to_string()));
                    return;
                }
            }
        }
        let _ = ready_tx.send(Ok(()));

        start.notified().await;
        for runtime in &runtimes {
            runtime.start();
        }

        let drivers: Vec<_> = runtimes
            .iter()
            .map(|runtime| task::spawn_local(drive(runtime.clone())))
            .collect();
        let aborts: Vec<_> = drivers.iter().map(|driver| driver.abort_handle()).collect();
        let mut all_finished = Box::pin(async move {
            for driver in drivers {
                let _ = driver.await;
            }
        });

        let mut cancelled = false;
        tokio::select! {
            _ = &mut all_finished => {
                debug!("[{location}] All nodes finished");
            }
            _ = stop.notified() => {
                debug!("[{location}] Stop requested, stopping nodes");
                for runtime in &runtimes {
                    runtime.stop();
                }
                tokio::select! {
                    _ = &mut all_finished => {}
                    _ = close.notified() => {
                        debug!("[{location}] Close requested, cancelling remaining tasks");
                        for abort in &aborts {
                            abort.abort();
                        }
                        cancelled = true;
                    }
                }
            }
            _ = close.notified() => {
                debug!("[{location}] Close requested, cancelling remaining tasks");
                for abort in &aborts {
                    abort.abort();
                }
                cancelled = true;
            }
        }

        // let the socket pumps drain end-of-stream downstream; on a forced
        // close they are cancelled instead
        for pump in pumps {
            if cancelled {
                pump.abort();
            }
            let _ = pump.await;
        }
    });
    debug!("[{location}] Worker finished and returning");
}
