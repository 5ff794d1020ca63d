use std::io::{BufRead, Write};
use std::str::FromStr;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use rill_types::indexmap::IndexMap;
use rill_types::log::{self, debug, info};
use rill_types::serde::{Deserialize, Serialize};
use rill_types::serde_json;

use crate::bridge::BridgeSpec;
use crate::errors::ExecutionError;
use crate::location::Location;
use crate::node::Node;
use crate::registry::NodeRegistry;
use crate::serializer;

use super::computer::Computer;
use super::{assemble_process_group, LockedNode, RecvSpec};

/// Inner grace periods the worker process applies to its thread computers.
const STOP_TIMEOUT_THREADS: Duration = Duration::from_millis(100);
const CLOSE_TIMEOUT_THREADS: Duration = Duration::from_millis(100);
const CONTROL_POLL: Duration = Duration::from_millis(100);

/// Everything a worker process needs: its nodes as registry-buildable
/// entries plus the resolved bridge specs per port. Sent as one JSON line
/// on the child's stdin.
#[derive(Debug, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
pub(crate) struct WorkerPlan {
    pub process: String,
    pub log_level: String,
    pub nodes: Vec<PlanNode>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
pub(crate) struct PlanNode {
    pub identity: String,
    pub class: String,
    pub settings: serde_json::Value,
    pub compute_on: String,
    pub emit: IndexMap<String, Vec<BridgeSpec>>,
    pub recv: IndexMap<String, RecvSpec>,
}

/// Events the worker process reports on stdout, one JSON line each. Log
/// records ride the same channel and are re-emitted by the parent's drain
/// thread.
#[derive(Debug, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde", tag = "event", rename_all = "snake_case")]
pub(crate) enum WorkerEvent {
    Ready,
    Log {
        level: String,
        target: String,
        message: String,
    },
}

pub(crate) fn emit_event(event: &WorkerEvent) {
    if let Ok(line) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut stdout = stdout.lock();
        let _ = writeln!(stdout, "{line}");
        let _ = stdout.flush();
    }
}

/// Forwards every log record to the parent process as a stdout event.
struct ForwardLogger;

impl log::Log for ForwardLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        emit_event(&WorkerEvent::Log {
            level: record.level().to_string(),
            target: record.target().to_string(),
            message: record.args().to_string(),
        });
    }

    fn flush(&self) {
        let _ = std::io::stdout().lock().flush();
    }
}

#[derive(Debug, PartialEq)]
enum Control {
    Start,
    Stop,
    Close,
}

/// Entry point of a worker process.
///
/// The launcher spawns the configured worker binary with the single
/// argument `worker`; that binary must call this function with a registry
/// containing every node class the graph uses. Reads the plan from stdin,
/// builds one cooperative computer per thread location, reports ready,
/// then follows the parent's start/stop/close commands.
pub fn worker_main(registry: &NodeRegistry) -> Result<(), ExecutionError> {
    let mut plan_line = String::new();
    std::io::stdin().lock().read_line(&mut plan_line)?;
    let plan: WorkerPlan = serde_json::from_str(&plan_line)
        .map_err(|err| ExecutionError::WorkerProtocol(format!("invalid worker plan: {err}")))?;

    let _ = log::set_boxed_logger(Box::new(ForwardLogger));
    log::set_max_level(log::LevelFilter::from_str(&plan.log_level).unwrap_or(log::LevelFilter::Info));

    info!(
        "[process {}] Worker started with {} nodes",
        plan.process,
        plan.nodes.len()
    );

    let mut locked = Vec::new();
    for plan_node in plan.nodes {
        let kind = registry
            .get(&plan_node.class, plan_node.settings.clone())
            .map_err(|err| {
                ExecutionError::WorkerProtocol(format!(
                    "cannot rebuild node `{}`: {err}",
                    plan_node.identity
                ))
            })?;
        let name = plan_node
            .settings
            .get("name")
            .and_then(|value| value.as_str())
            .ok_or_else(|| {
                ExecutionError::WorkerProtocol(format!(
                    "node `{}` has no name in its settings",
                    plan_node.identity
                ))
            })?;
        let node = Node::new(name, Location::parse(&plan_node.compute_on), kind)?;
        locked.push(LockedNode {
            node,
            emit: plan_node.emit,
            recv: plan_node.recv,
        });
    }

    let mut computers: Vec<Computer> = assemble_process_group(locked)
        .into_iter()
        .map(|(location, nodes)| Computer::new(location, nodes))
        .collect();
    for computer in &mut computers {
        computer.setup()?;
    }
    emit_event(&WorkerEvent::Ready);

    let controls = spawn_control_reader();

    // wait for the release of the start latch
    loop {
        match controls.recv() {
            Ok(Control::Start) => break,
            Ok(Control::Stop) => {}
            Ok(Control::Close) | Err(_) => {
                for computer in &mut computers {
                    computer.close(CLOSE_TIMEOUT_THREADS);
                }
                return Ok(());
            }
        }
    }
    info!("[process {}] Starting computers", plan.process);
    for computer in &mut computers {
        computer.start();
    }

    loop {
        match controls.recv_timeout(CONTROL_POLL) {
            Ok(Control::Stop) => {
                info!("[process {}] Stopping computers", plan.process);
                for computer in &mut computers {
                    computer.stop(STOP_TIMEOUT_THREADS);
                }
            }
            Ok(Control::Close) | Err(RecvTimeoutError::Disconnected) => {
                info!("[process {}] Closing computers", plan.process);
                for computer in &mut computers {
                    computer.close(CLOSE_TIMEOUT_THREADS);
                }
                break;
            }
            Ok(Control::Start) | Err(RecvTimeoutError::Timeout) => {}
        }
        if computers.iter().all(|computer| computer.is_finished()) {
            info!("[process {}] All computers have finished, returning", plan.process);
            break;
        }
    }

    debug!("[process {}] Worker returning", plan.process);
    Ok(())
}

fn spawn_control_reader() -> Receiver<Control> {
    let (tx, rx): (Sender<Control>, Receiver<Control>) = unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let control = match line.trim() {
                "start" => Control::Start,
                "stop" => Control::Stop,
                "close" => Control::Close,
                _ => continue,
            };
            if tx.send(control).is_err() {
                return;
            }
        }
        // parent went away; treat it as a close request
        let _ = tx.send(Control::Close);
    });
    rx
}

pub(crate) fn plan_node_from_locked(locked: &LockedNode) -> PlanNode {
    PlanNode {
        identity: locked.node.handle().to_string(),
        class: locked.node.kind().class_name().to_string(),
        settings: serializer::node_settings(&locked.node),
        compute_on: locked.node.compute_on().to_string(),
        emit: locked.emit.clone(),
        recv: locked.recv.clone(),
    }
}
