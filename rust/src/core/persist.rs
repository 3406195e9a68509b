// Snapshot writer thread. The actor hands off blobs and never waits on disk I/O.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flume::{Receiver, Sender, TryRecvError};

use super::kv_store::KeyValueStore;

enum PersistJob {
    Save { key: String, blob: String },
    Flush(Sender<()>),
}

pub(crate) struct Persister {
    tx: Sender<PersistJob>,
}

impl Persister {
    pub(crate) fn spawn(store: Arc<dyn KeyValueStore>) -> Self {
        let (tx, rx) = flume::unbounded();
        thread::spawn(move || run(store, rx));
        Self { tx }
    }

    pub(crate) fn save(&self, key: &str, blob: String) {
        let _ = self.tx.send(PersistJob::Save {
            key: key.to_string(),
            blob,
        });
    }

    /// Blocks until every save queued before this call has been attempted.
    pub(crate) fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = flume::bounded(1);
        if self.tx.send(PersistJob::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }
}

fn run(store: Arc<dyn KeyValueStore>, rx: Receiver<PersistJob>) {
    // Newest unwritten blob. Saves for the same key queued back to back collapse into one write.
    let mut pending: Option<(String, String)> = None;
    loop {
        let job = if pending.is_some() {
            match rx.try_recv() {
                Ok(job) => job,
                Err(TryRecvError::Empty) => {
                    write(store.as_ref(), pending.take());
                    continue;
                }
                Err(TryRecvError::Disconnected) => {
                    write(store.as_ref(), pending.take());
                    return;
                }
            }
        } else {
            match rx.recv() {
                Ok(job) => job,
                Err(_) => return,
            }
        };

        match job {
            PersistJob::Save { key, blob } => {
                let other_key = matches!(&pending, Some((k, _)) if *k != key);
                if other_key {
                    write(store.as_ref(), pending.take());
                }
                pending = Some((key, blob));
            }
            PersistJob::Flush(ack) => {
                write(store.as_ref(), pending.take());
                let _ = ack.send(());
            }
        }
    }
}

fn write(store: &dyn KeyValueStore, job: Option<(String, String)>) {
    let Some((key, blob)) = job else {
        return;
    };
    match store.set(&key, &blob) {
        Ok(()) => tracing::debug!(key, bytes = blob.len(), "snapshot saved"),
        Err(e) => tracing::warn!(key, error = %format!("{e:#}"), "failed to save snapshot"),
    }
}
