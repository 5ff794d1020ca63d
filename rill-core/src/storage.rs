use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use rill_types::indexmap::IndexMap;
use rill_types::Value;

use crate::bridge::{InputStream, OutputBridge};
use crate::node::InputFrame;

/// Read cache of one input bridge: everything delivered but not yet
/// discarded, keyed by counter. Shared between the bridge's listener task
/// and the node's processing path, which both live on one thread.
pub(crate) type ReadCache = Rc<RefCell<BTreeMap<u64, Value>>>;

#[derive(Debug)]
struct InputSlot {
    cache: ReadCache,
    cyclic: bool,
    stream: Option<InputStream>,
}

/// One input bridge handed to its listener task.
#[derive(Debug)]
pub(crate) struct InputListener {
    pub port_key: String,
    pub cyclic: bool,
    pub stream: InputStream,
    pub cache: ReadCache,
}

/// Per-node view of the bridges it reads and writes.
#[derive(Debug, Default)]
pub(crate) struct DataStorage {
    inputs: IndexMap<String, InputSlot>,
    outputs: IndexMap<String, Vec<OutputBridge>>,
}

impl DataStorage {
    pub(crate) fn new(
        inputs: Vec<(String, bool, InputStream)>,
        outputs: Vec<(String, Vec<OutputBridge>)>,
    ) -> DataStorage {
        DataStorage {
            inputs: inputs
                .into_iter()
                .map(|(key, cyclic, stream)| {
                    (
                        key,
                        InputSlot {
                            cache: Rc::new(RefCell::new(BTreeMap::new())),
                            cyclic,
                            stream: Some(stream),
                        },
                    )
                })
                .collect(),
            outputs: outputs.into_iter().collect(),
        }
    }

    /// Opens every bridge for sending and receiving. Runs in the owning
    /// worker before the graph starts. Returns the pump tasks of the
    /// socket bridges so the worker can await their drain.
    pub(crate) fn ready(
        &mut self,
    ) -> std::io::Result<Vec<rill_types::tokio::task::JoinHandle<()>>> {
        let mut pumps = Vec::new();
        for bridges in self.outputs.values_mut() {
            for bridge in bridges {
                if let Some(pump) = bridge.ready_send() {
                    pumps.push(pump);
                }
            }
        }
        for slot in self.inputs.values_mut() {
            if let Some(stream) = &mut slot.stream {
                stream.ready_recv()?;
            }
        }
        Ok(pumps)
    }

    /// Detaches the input streams for their listener tasks. The read caches
    /// stay behind, shared.
    pub(crate) fn take_listeners(&mut self) -> Vec<InputListener> {
        self.inputs
            .iter_mut()
            .filter_map(|(key, slot)| {
                slot.stream.take().map(|stream| InputListener {
                    port_key: key.clone(),
                    cyclic: slot.cyclic,
                    stream,
                    cache: slot.cache.clone(),
                })
            })
            .collect()
    }

    /// The values already delivered at `ctr`, keyed by input port key.
    pub(crate) fn get(&self, ctr: u64) -> InputFrame {
        self.inputs
            .iter()
            .filter_map(|(key, slot)| {
                slot.cache
                    .borrow()
                    .get(&ctr)
                    .cloned()
                    .map(|value| (key.clone(), value))
            })
            .collect()
    }

    /// Writes through every bridge fanning out from `port_key`.
    pub(crate) fn put(&mut self, port_key: &str, ctr: u64, value: Value) {
        if let Some(bridges) = self.outputs.get_mut(port_key) {
            if let Some((last, rest)) = bridges.split_last_mut() {
                for bridge in rest {
                    bridge.put(ctr, value.clone());
                }
                last.put(ctr, value);
            }
        }
    }

    /// Drops cached packets with counters strictly below `ctr`.
    pub(crate) fn discard_before(&mut self, ctr: u64) {
        for slot in self.inputs.values_mut() {
            let mut cache = slot.cache.borrow_mut();
            let keep = cache.split_off(&ctr);
            *cache = keep;
        }
    }

    pub(crate) fn close_bridges(&mut self) {
        for bridges in self.outputs.values_mut() {
            for bridge in bridges {
                bridge.close();
            }
        }
    }

    pub(crate) fn output_keys(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(|key| key.as_str())
    }

    pub(crate) fn input_keys(&self) -> impl Iterator<Item = (&str, bool)> {
        self.inputs
            .iter()
            .map(|(key, slot)| (key.as_str(), slot.cyclic))
    }

    /// True once every non-cyclic cache holds nothing newer than the last
    /// processed counter. Used by circuit breakers to finish only after the
    /// delivered primary packets were consumed.
    pub(crate) fn primary_drained(&self, last_processed: Option<u64>) -> bool {
        self.inputs.values().filter(|slot| !slot.cyclic).all(|slot| {
            slot.cache
                .borrow()
                .keys()
                .next_back()
                .map_or(true, |max| Some(*max) <= last_processed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{local, InputStream, OutputBridge};

    fn storage_with_local_input() -> (local::LocalSender, DataStorage) {
        let (tx, rx) = local::channel();
        let storage = DataStorage::new(
            vec![("data".to_string(), false, InputStream::Local(rx))],
            vec![],
        );
        (tx, storage)
    }

    #[test]
    fn get_only_returns_delivered_keys() {
        let (_tx, mut storage) = storage_with_local_input();
        let listener = storage.take_listeners().pop().unwrap();
        listener.cache.borrow_mut().insert(3, Value::Int(9));

        let frame = storage.get(3);
        assert_eq!(frame.get("data"), Some(&Value::Int(9)));
        assert!(storage.get(4).is_empty());
    }

    #[test]
    fn discard_before_prunes_strictly_older() {
        let (_tx, mut storage) = storage_with_local_input();
        let listener = storage.take_listeners().pop().unwrap();
        for ctr in 0..5 {
            listener.cache.borrow_mut().insert(ctr, Value::Int(ctr as i64));
        }
        storage.discard_before(3);
        assert!(storage.get(2).is_empty());
        assert_eq!(storage.get(3).get("data"), Some(&Value::Int(3)));
        assert_eq!(storage.get(4).get("data"), Some(&Value::Int(4)));
    }

    #[test]
    fn put_fans_out_to_every_bridge() {
        let (tx_a, rx_a) = local::channel();
        let (tx_b, rx_b) = local::channel();
        let mut storage = DataStorage::new(
            vec![],
            vec![(
                "data".to_string(),
                vec![OutputBridge::Local(tx_a), OutputBridge::Local(tx_b)],
            )],
        );
        storage.put("data", 0, Value::Int(1));
        storage.close_bridges();

        let rt = rill_types::tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            for mut rx in [rx_a, rx_b] {
                assert_eq!(rx.next().await, Some((0, Value::Int(1))));
                assert_eq!(rx.next().await, None);
            }
        });
    }

    #[test]
    fn primary_drained_ignores_cyclic_inputs() {
        let (_tx, rx) = local::channel();
        let (_tx2, rx2) = local::channel();
        let mut storage = DataStorage::new(
            vec![
                ("data".to_string(), false, InputStream::Local(rx)),
                ("delayed".to_string(), true, InputStream::Local(rx2)),
            ],
            vec![],
        );
        let listeners = storage.take_listeners();
        listeners[0].cache.borrow_mut().insert(4, Value::Int(4));
        listeners[1].cache.borrow_mut().insert(9, Value::Int(9));

        assert!(!storage.primary_drained(Some(3)));
        assert!(storage.primary_drained(Some(4)));
        assert!(!storage.primary_drained(None));
    }
}
