use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use rill_types::tokio::sync::Notify;
use rill_types::Value;

use super::Packet;

/// Queue shared by the two halves of a same-worker bridge. Both ends live
/// on one thread, so no atomics are needed beyond the wakeup.
#[derive(Debug, Default)]
struct Shared {
    queue: RefCell<VecDeque<Packet>>,
    closed: Cell<bool>,
    notify: Notify,
}

pub(crate) fn channel() -> (LocalSender, LocalReceiver) {
    let shared = Rc::new(Shared::default());
    (LocalSender(shared.clone()), LocalReceiver(shared))
}

#[derive(Debug)]
pub(crate) struct LocalSender(Rc<Shared>);

impl LocalSender {
    pub(crate) fn put(&self, ctr: u64, value: Value) {
        self.0.queue.borrow_mut().push_back((ctr, value));
        self.0.notify.notify_one();
    }

    pub(crate) fn close(&self) {
        self.0.closed.set(true);
        self.0.notify.notify_one();
    }
}

#[derive(Debug)]
pub(crate) struct LocalReceiver(Rc<Shared>);

impl LocalReceiver {
    /// `None` once closed and drained.
    pub(crate) async fn next(&mut self) -> Option<Packet> {
        loop {
            if let Some(packet) = self.0.queue.borrow_mut().pop_front() {
                return Some(packet);
            }
            if self.0.closed.get() {
                return None;
            }
            self.0.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_types::tokio;

    #[test]
    fn delivers_in_order_then_ends() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let (tx, mut rx) = channel();
            tx.put(0, Value::Int(10));
            tx.put(1, Value::Int(11));
            tx.close();
            assert_eq!(rx.next().await, Some((0, Value::Int(10))));
            assert_eq!(rx.next().await, Some((1, Value::Int(11))));
            assert_eq!(rx.next().await, None);
        });
    }

    #[test]
    fn wakes_a_parked_receiver() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let local = tokio::task::LocalSet::new();
        local.block_on(&rt, async {
            let (tx, mut rx) = channel();
            let reader = tokio::task::spawn_local(async move { rx.next().await });
            tokio::task::yield_now().await;
            tx.put(7, Value::Int(42));
            assert_eq!(reader.await.unwrap(), Some((7, Value::Int(42))));
        });
    }
}
