use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Sender};
use rill_types::log::{self, info, log, Level};
use rill_types::serde_json;

use crate::errors::{ExecutionError, SerializeError};

use super::worker::{plan_node_from_locked, WorkerEvent, WorkerPlan};
use super::{ExecutorOptions, LockedNode};

const READY_TIMEOUT: Duration = Duration::from_secs(30);
const WAIT_POLL: Duration = Duration::from_millis(10);

/// A worker process hosting one cooperative computer per thread location of
/// its group. Control flows down the child's stdin; log records and the
/// ready event come back on its stdout, drained by a dedicated thread.
#[derive(Debug)]
pub(crate) struct ProcessComputer {
    process: String,
    worker_bin: PathBuf,
    plan: Option<WorkerPlan>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    drain: Option<thread::JoinHandle<()>>,
    exited: Arc<AtomicBool>,
    joined: bool,
}

impl ProcessComputer {
    pub(crate) fn new(
        process: String,
        group: Vec<LockedNode>,
        options: &ExecutorOptions,
    ) -> Result<ProcessComputer, ExecutionError> {
        let worker_bin = match &options.worker_bin {
            Some(bin) => bin.clone(),
            None => match std::env::var_os("RILL_WORKER_BIN") {
                Some(bin) => PathBuf::from(bin),
                None => std::env::current_exe()?,
            },
        };
        info!(
            "[process {process}] Creating process computer with {} nodes",
            group.len()
        );
        let plan = WorkerPlan {
            process: process.clone(),
            log_level: log::max_level().to_string(),
            nodes: group.iter().map(plan_node_from_locked).collect(),
        };
        Ok(ProcessComputer {
            process,
            worker_bin,
            plan: Some(plan),
            child: None,
            stdin: None,
            drain: None,
            exited: Arc::new(AtomicBool::new(false)),
            joined: false,
        })
    }

    /// Spawns the worker process, ships the plan and waits for ready.
    pub(crate) fn setup(&mut self) -> Result<(), ExecutionError> {
        info!("[process {}] Readying", self.process);
        let plan = self.plan.take().expect("process computer set up twice");
        let plan_line = serde_json::to_string(&plan).map_err(SerializeError::from)?;

        let mut child = Command::new(&self.worker_bin)
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| {
                ExecutionError::CannotSpawnWorkerProcess(self.worker_bin.clone(), err)
            })?;
        let mut stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");

        writeln!(stdin, "{plan_line}")?;
        stdin.flush()?;

        let (ready_tx, ready_rx) = bounded(1);
        let exited = self.exited.clone();
        let process = self.process.clone();
        let drain = thread::Builder::new()
            .name(format!("log-drain-{}", self.process))
            .spawn(move || drain_worker_output(stdout, ready_tx, exited, process))
            .map_err(ExecutionError::CannotSpawnWorkerThread)?;

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.drain = Some(drain);

        info!("[process {}] Waiting for worker to be ready", self.process);
        match ready_rx.recv_timeout(READY_TIMEOUT) {
            Ok(()) => Ok(()),
            Err(_) => Err(ExecutionError::WorkerQuitEarly(self.process.clone())),
        }
    }

    pub(crate) fn start(&mut self) {
        info!("[process {}] Starting", self.process);
        self.send_control("start");
    }

    pub(crate) fn join(&mut self) -> Result<(), ExecutionError> {
        info!("[process {}] Joining", self.process);
        if let Some(child) = &mut self.child {
            child.wait()?;
        }
        self.joined = true;
        Ok(())
    }

    pub(crate) fn stop(&mut self, timeout: Duration) {
        info!("[process {}] Stopping", self.process);
        self.send_control("stop");
        let finished = self.wait(timeout);
        info!(
            "[process {}] Returning; process finished: {finished}",
            self.process
        );
    }

    /// Requests teardown and kills the child if the timeout expires. The
    /// drain thread exits with the child's stdout.
    pub(crate) fn close(&mut self, timeout: Duration) {
        info!("[process {}] Closing", self.process);
        self.send_control("close");
        // dropping stdin signals close even if the control line was lost
        self.stdin.take();
        if !self.wait(timeout) {
            if let Some(child) = &mut self.child {
                let _ = child.kill();
                let _ = child.wait();
                self.joined = true;
                info!("[process {}] Timeout reached: killed process", self.process);
            }
        }
        info!("[process {}] Closing log drain", self.process);
        if let Some(drain) = self.drain.take() {
            let _ = drain.join();
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.joined || self.exited.load(Ordering::SeqCst)
    }

    fn send_control(&mut self, command: &str) {
        if let Some(stdin) = &mut self.stdin {
            let _ = writeln!(stdin, "{command}");
            let _ = stdin.flush();
        }
    }

    fn wait(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(child) = &mut self.child {
                match child.try_wait() {
                    Ok(Some(_)) => {
                        self.joined = true;
                        return true;
                    }
                    Ok(None) => {}
                    Err(_) => return true,
                }
            } else {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_POLL);
        }
    }
}

/// Drains the child's stdout: resolves the ready event, re-emits forwarded
/// log records into the host logger, and flags the child's exit on EOF.
fn drain_worker_output(
    stdout: ChildStdout,
    ready_tx: Sender<()>,
    exited: Arc<AtomicBool>,
    process: String,
) {
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        match serde_json::from_str::<WorkerEvent>(&line) {
            Ok(WorkerEvent::Ready) => {
                let _ = ready_tx.send(());
            }
            Ok(WorkerEvent::Log {
                level,
                target,
                message,
            }) => {
                let level = Level::from_str(&level).unwrap_or(Level::Info);
                log!(target: &target, level, "{message}");
            }
            // anything else on stdout is the worker talking plainly
            Err(_) => info!("[process {process}] {line}"),
        }
    }
    exited.store(true, Ordering::SeqCst);
}
