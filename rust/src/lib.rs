mod actions;
mod core;
mod logging;
mod state;
mod tls;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use crate::core::kv_store::{KeyValueStore, MemoryKvStore, SqliteKvStore};
pub use crate::core::transport::{decode_inbound_payload, InboundPayload, TransportError};
pub use actions::AppAction;
pub use state::*;
pub use updates::*;

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

#[derive(uniffi::Object)]
pub struct FfiApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
}

#[uniffi::export]
impl FfiApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String) -> Arc<Self> {
        Self::start(data_dir, None)
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}

impl FfiApp {
    /// Same as `new`, with the snapshot store supplied by the embedder instead of the
    /// SQLite file under `data_dir`.
    pub fn with_store(data_dir: String, store: Arc<dyn KeyValueStore>) -> Arc<Self> {
        Self::start(data_dir, Some(store))
    }

    fn start(data_dir: String, store: Option<Arc<dyn KeyValueStore>>) -> Arc<Self> {
        logging::init_logging(&data_dir);
        tls::init_rustls_crypto_provider();
        tracing::info!(data_dir = %data_dir, "FfiApp starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));

        // Actor loop thread (single threaded "app actor"). Restore happens here, off the
        // caller's thread; `state()` reports `restored == false` until it is done.
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        thread::spawn(move || {
            let mut core = match store {
                Some(store) => crate::core::AppCore::with_store(
                    update_tx,
                    core_tx_for_core,
                    data_dir,
                    shared_for_core,
                    store,
                ),
                None => crate::core::AppCore::new(
                    update_tx,
                    core_tx_for_core,
                    data_dir,
                    shared_for_core,
                ),
            };
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
        })
    }
}
