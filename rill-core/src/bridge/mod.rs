pub(crate) mod local;
pub(crate) mod process;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crossbeam::channel::TryRecvError;
use rill_types::log::debug;
use rill_types::serde::{Deserialize, Serialize};
use rill_types::tokio::sync::mpsc;
use rill_types::tokio::time::{sleep, Duration};
use rill_types::Value;
use uuid::Uuid;

use crate::connection::Connection;
use crate::errors::ExecutionError;
use crate::location::Location;
use crate::registry::BridgeRegistry;

/// One enqueued item: the emitting node's counter and the payload.
pub type Packet = (u64, Value);

/// Poll interval of the sync bridge variant while its queue is empty.
const SYNC_POLL: Duration = Duration::from_micros(50);

/// The transport variants a connection can be realized with, cost-ranked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
pub enum BridgeVariant {
    /// Cooperative queue inside one worker; both ends share a thread.
    Local,
    /// Async channel between threads of one process.
    Thread,
    /// Unix-socket transport between processes of one host.
    Process,
    /// Polling channel between threads of one process. More expensive than
    /// `Thread`, kept selectable for registries without an async variant.
    ThreadSync,
}

impl BridgeVariant {
    /// Whether this variant can serve the location pair, and at what cost.
    pub fn can_handle(&self, from: &Location, to: &Location) -> (bool, u32) {
        match self {
            BridgeVariant::Local => (from == to, 1),
            BridgeVariant::Thread => (from.same_process(to) && from != to, 2),
            BridgeVariant::Process => (from.same_host(to), 3),
            BridgeVariant::ThreadSync => (from.same_process(to), 4),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BridgeVariant::Local => "local",
            BridgeVariant::Thread => "thread",
            BridgeVariant::Process => "process",
            BridgeVariant::ThreadSync => "thread-sync",
        }
    }
}

/// Lock-time resolution of one connection: which variant serves it and how
/// the endpoints find each other. Endpoints are materialized later, in the
/// process (and for `Local`, the thread) that owns them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
pub struct BridgeSpec {
    pub variant: BridgeVariant,
    pub id: Uuid,
    pub socket: Option<PathBuf>,
}

pub(crate) fn resolve_spec(
    registry: &BridgeRegistry,
    connection: &Connection,
    from: &Location,
    to: &Location,
    socket_dir: &Path,
) -> Result<BridgeSpec, ExecutionError> {
    let (variant, cost) = registry
        .resolve(from, to)
        .ok_or_else(|| ExecutionError::NoBridgeForConnection(connection.clone()))?;
    let id = Uuid::new_v4();
    let socket = match variant {
        BridgeVariant::Process => Some(socket_dir.join(format!("{}.sock", id.simple()))),
        _ => None,
    };
    debug!(
        "[{} -> {}] Selected {} bridge (cost {cost}) for {connection}",
        from, to, variant.name()
    );
    Ok(BridgeSpec {
        variant,
        id,
        socket,
    })
}

/// Sending half shipped into a worker thread. `Local` bridges stay pending
/// until the owning worker materializes them.
#[derive(Debug)]
pub(crate) enum SenderEndpoint {
    LocalPending(Uuid),
    Thread(mpsc::UnboundedSender<Packet>),
    ThreadSync(crossbeam::channel::Sender<Packet>),
    Socket(PathBuf),
}

/// Receiving half shipped into a worker thread.
#[derive(Debug)]
pub(crate) enum ReceiverEndpoint {
    LocalPending(Uuid),
    Thread(mpsc::UnboundedReceiver<Packet>),
    ThreadSync(crossbeam::channel::Receiver<Packet>),
    Socket(PathBuf),
}

/// Pairs of local halves created inside one worker thread, keyed by the
/// bridge id from the spec.
#[derive(Debug, Default)]
pub(crate) struct LocalTable {
    channels: HashMap<Uuid, (Option<local::LocalSender>, Option<local::LocalReceiver>)>,
}

impl LocalTable {
    fn entry(&mut self, id: Uuid) -> &mut (Option<local::LocalSender>, Option<local::LocalReceiver>) {
        self.channels.entry(id).or_insert_with(|| {
            let (tx, rx) = local::channel();
            (Some(tx), Some(rx))
        })
    }

    fn take_sender(&mut self, id: Uuid) -> local::LocalSender {
        self.entry(id)
            .0
            .take()
            .expect("local bridge sender claimed twice")
    }

    fn take_receiver(&mut self, id: Uuid) -> local::LocalReceiver {
        self.entry(id)
            .1
            .take()
            .expect("local bridge receiver claimed twice")
    }
}

/// Worker-side sending end of one bridge.
#[derive(Debug)]
pub(crate) enum OutputBridge {
    Local(local::LocalSender),
    Thread(Option<mpsc::UnboundedSender<Packet>>),
    ThreadSync(Option<crossbeam::channel::Sender<Packet>>),
    Socket(process::SocketSender),
}

impl OutputBridge {
    pub(crate) fn from_endpoint(endpoint: SenderEndpoint, locals: &mut LocalTable) -> OutputBridge {
        match endpoint {
            SenderEndpoint::LocalPending(id) => OutputBridge::Local(locals.take_sender(id)),
            SenderEndpoint::Thread(tx) => OutputBridge::Thread(Some(tx)),
            SenderEndpoint::ThreadSync(tx) => OutputBridge::ThreadSync(Some(tx)),
            SenderEndpoint::Socket(path) => OutputBridge::Socket(process::SocketSender::new(path)),
        }
    }

    /// Opens the transport. Called once per run inside the owning worker.
    /// Socket bridges hand back their pump task.
    pub(crate) fn ready_send(&mut self) -> Option<rill_types::tokio::task::JoinHandle<()>> {
        match self {
            OutputBridge::Socket(sender) => Some(sender.ready()),
            _ => None,
        }
    }

    /// Enqueues without blocking; queues are unbounded.
    pub(crate) fn put(&mut self, ctr: u64, value: Value) {
        match self {
            OutputBridge::Local(tx) => tx.put(ctr, value),
            OutputBridge::Thread(tx) => {
                if let Some(tx) = tx {
                    // a send error means the receiver was torn down already
                    let _ = tx.send((ctr, value));
                }
            }
            OutputBridge::ThreadSync(tx) => {
                if let Some(tx) = tx {
                    let _ = tx.send((ctr, value));
                }
            }
            OutputBridge::Socket(tx) => tx.put(ctr, value),
        }
    }

    /// Raises the closed signal; the receiver observes it after draining.
    pub(crate) fn close(&mut self) {
        match self {
            OutputBridge::Local(tx) => tx.close(),
            OutputBridge::Thread(tx) => {
                tx.take();
            }
            OutputBridge::ThreadSync(tx) => {
                tx.take();
            }
            OutputBridge::Socket(tx) => tx.close(),
        }
    }
}

/// Worker-side receiving end of one bridge: an ordered stream of packets
/// that ends once the sender closed and the queue is drained.
#[derive(Debug)]
pub(crate) enum InputStream {
    Local(local::LocalReceiver),
    Thread(mpsc::UnboundedReceiver<Packet>),
    ThreadSync(crossbeam::channel::Receiver<Packet>),
    Socket(process::SocketReceiver),
}

impl InputStream {
    pub(crate) fn from_endpoint(endpoint: ReceiverEndpoint, locals: &mut LocalTable) -> InputStream {
        match endpoint {
            ReceiverEndpoint::LocalPending(id) => InputStream::Local(locals.take_receiver(id)),
            ReceiverEndpoint::Thread(rx) => InputStream::Thread(rx),
            ReceiverEndpoint::ThreadSync(rx) => InputStream::ThreadSync(rx),
            ReceiverEndpoint::Socket(path) => InputStream::Socket(process::SocketReceiver::new(path)),
        }
    }

    /// Allocates the receiving transport. Called once per run inside the
    /// owning worker, before the graph starts.
    pub(crate) fn ready_recv(&mut self) -> std::io::Result<()> {
        match self {
            InputStream::Socket(rx) => rx.ready(),
            _ => Ok(()),
        }
    }

    /// Cooperatively waits for the next packet; `None` once the bridge is
    /// closed and fully drained.
    pub(crate) async fn next(&mut self) -> Option<Packet> {
        match self {
            InputStream::Local(rx) => rx.next().await,
            InputStream::Thread(rx) => rx.recv().await,
            InputStream::ThreadSync(rx) => loop {
                match rx.try_recv() {
                    Ok(packet) => return Some(packet),
                    Err(TryRecvError::Empty) => sleep(SYNC_POLL).await,
                    Err(TryRecvError::Disconnected) => return None,
                }
            },
            InputStream::Socket(rx) => rx.next().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_capability_table() {
        let main = Location::parse("");
        let th1 = Location::parse("1");
        let th2 = Location::parse("2");
        let p1 = Location::parse("1:1");
        let p2 = Location::parse("2:1");

        assert_eq!(BridgeVariant::Local.can_handle(&main, &main), (true, 1));
        assert_eq!(BridgeVariant::Local.can_handle(&th1, &th2).0, false);

        assert_eq!(BridgeVariant::Thread.can_handle(&th1, &th2), (true, 2));
        assert_eq!(BridgeVariant::Thread.can_handle(&th1, &th1).0, false);
        assert_eq!(BridgeVariant::Thread.can_handle(&p1, &p2).0, false);

        assert_eq!(BridgeVariant::Process.can_handle(&p1, &p2), (true, 3));
        assert_eq!(BridgeVariant::Process.can_handle(&main, &p1).0, true);

        assert_eq!(BridgeVariant::ThreadSync.can_handle(&th1, &th2), (true, 4));
        assert_eq!(BridgeVariant::ThreadSync.can_handle(&th1, &th1).0, true);
    }
}
