use std::path::PathBuf;

use rill_types::log::{debug, error};
use rill_types::serde::{Deserialize, Serialize};
use rill_types::tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use rill_types::tokio::net::{UnixListener, UnixStream};
use rill_types::tokio::sync::mpsc;
use rill_types::tokio::task;
use rill_types::tokio::time::{sleep, Duration};
use rill_types::{serde_json, Value};

use super::Packet;

/// One JSON line per packet on the socket; end-of-stream is the close
/// signal, so a drained reader has observed everything the sender put.
#[derive(Debug, Serialize, Deserialize)]
#[serde(crate = "rill_types::serde")]
struct Frame {
    ctr: u64,
    data: Value,
}

const CONNECT_RETRY: Duration = Duration::from_millis(20);
const CONNECT_ATTEMPTS: usize = 500;

/// Sending half of a cross-process bridge.
///
/// `put` enqueues onto an unbounded channel; a pump task owns the socket,
/// connects lazily (the receiver may not have bound yet) and drains the
/// queue. Dropping the channel sender closes the socket after the drain.
#[derive(Debug)]
pub(crate) struct SocketSender {
    path: PathBuf,
    tx: Option<mpsc::UnboundedSender<Packet>>,
}

impl SocketSender {
    pub(crate) fn new(path: PathBuf) -> SocketSender {
        SocketSender { path, tx: None }
    }

    /// Spawns the pump on the current worker. Must run inside a `LocalSet`.
    /// The returned handle resolves once the queue is drained and the
    /// socket flushed; the worker awaits it before tearing the loop down.
    pub(crate) fn ready(&mut self) -> task::JoinHandle<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = task::spawn_local(pump(self.path.clone(), rx));
        self.tx = Some(tx);
        pump
    }

    pub(crate) fn put(&mut self, ctr: u64, value: Value) {
        match &self.tx {
            Some(tx) => {
                let _ = tx.send((ctr, value));
            }
            None => debug!("Dropping packet {ctr}: socket bridge not ready or already closed"),
        }
    }

    pub(crate) fn close(&mut self) {
        self.tx.take();
    }
}

async fn pump(path: PathBuf, mut rx: mpsc::UnboundedReceiver<Packet>) {
    let mut stream = None;
    for _ in 0..CONNECT_ATTEMPTS {
        match UnixStream::connect(&path).await {
            Ok(connected) => {
                stream = Some(connected);
                break;
            }
            Err(_) => sleep(CONNECT_RETRY).await,
        }
    }
    let Some(mut stream) = stream else {
        error!("Giving up connecting bridge socket {}", path.display());
        return;
    };

    while let Some((ctr, data)) = rx.recv().await {
        let mut line = match serde_json::to_string(&Frame { ctr, data }) {
            Ok(line) => line,
            Err(err) => {
                error!("Failed to encode packet {ctr}: {err}");
                continue;
            }
        };
        line.push('\n');
        if let Err(err) = stream.write_all(line.as_bytes()).await {
            error!("Bridge socket write failed on {}: {err}", path.display());
            return;
        }
    }
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}

/// Receiving half of a cross-process bridge. Binds at ready time, accepts
/// the single sender lazily on the first read.
#[derive(Debug)]
pub(crate) struct SocketReceiver {
    state: RecvState,
}

#[derive(Debug)]
enum RecvState {
    Pending(PathBuf),
    Listening(UnixListener),
    Connected(Lines<BufReader<UnixStream>>),
    Done,
}

impl SocketReceiver {
    pub(crate) fn new(path: PathBuf) -> SocketReceiver {
        SocketReceiver {
            state: RecvState::Pending(path),
        }
    }

    pub(crate) fn ready(&mut self) -> std::io::Result<()> {
        if let RecvState::Pending(path) = &self.state {
            let listener = UnixListener::bind(path)?;
            self.state = RecvState::Listening(listener);
        }
        Ok(())
    }

    pub(crate) async fn next(&mut self) -> Option<Packet> {
        loop {
            match &mut self.state {
                RecvState::Pending(path) => {
                    error!("Bridge socket {} was never readied", path.display());
                    self.state = RecvState::Done;
                }
                RecvState::Listening(listener) => match listener.accept().await {
                    Ok((stream, _)) => {
                        self.state = RecvState::Connected(BufReader::new(stream).lines());
                    }
                    Err(err) => {
                        error!("Bridge socket accept failed: {err}");
                        self.state = RecvState::Done;
                    }
                },
                RecvState::Connected(lines) => match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<Frame>(&line) {
                        Ok(frame) => return Some((frame.ctr, frame.data)),
                        Err(err) => error!("Dropping malformed bridge frame: {err}"),
                    },
                    Ok(None) => {
                        self.state = RecvState::Done;
                    }
                    Err(err) => {
                        error!("Bridge socket read failed: {err}");
                        self.state = RecvState::Done;
                    }
                },
                RecvState::Done => return None,
            }
        }
    }
}
