use std::sync::mpsc::{self, Sender};
use std::thread;

/// State driven by the native channel thread. All messages are handled on
/// that thread, one at a time, in submission order.
pub(crate) trait Worker: Send + 'static {
    type Msg: Send + 'static;

    fn update(&mut self, msg: Self::Msg);
}

/// Handle to a single dedicated worker thread.
///
/// The thread owns the `Worker` and everything behind it, so the state
/// needs no locking. There is no timeout: a hung message blocks every
/// later message on the same channel. The thread exits when the last
/// handle is dropped and the queue drains.
pub(crate) struct NativeChannel<M> {
    tx: Sender<M>,
}

impl<M: Send + 'static> NativeChannel<M> {
    pub fn spawn<W: Worker<Msg = M>>(mut worker: W) -> Self {
        let (tx, rx) = mpsc::channel::<M>();

        thread::Builder::new()
            .name("native-channel".to_string())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    worker.update(msg);
                }
            })
            .expect("failed to spawn native channel thread");

        Self { tx }
    }

    /// Queue a message and return immediately.
    pub fn post(&self, msg: M) {
        let _ = self.tx.send(msg);
    }

    /// Queue a message carrying a reply sender and block until the worker
    /// answers.
    pub fn call<T>(&self, msg: impl FnOnce(Sender<T>) -> M) -> T {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.post(msg(reply_tx));
        reply_rx
            .recv()
            .expect("native channel thread dropped a pending reply")
    }
}

impl<M> Clone for NativeChannel<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}
