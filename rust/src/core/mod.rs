mod config;
pub(crate) mod kv_store;
mod message_list;
mod persist;
pub(crate) mod transport;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use flume::Sender;

use crate::actions::AppAction;
use crate::state::{now_millis, AppState, ConnectionState};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

use kv_store::KeyValueStore;
use message_list::MessageList;
use persist::Persister;
use transport::{InboundPayload, TransportHandle};

const UNMOUNT_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

pub struct AppCore {
    pub state: AppState,
    rev: u64,
    messages: MessageList,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: config::AppConfig,
    storage_key: String,
    runtime: tokio::runtime::Runtime,
    persister: Persister,

    // Live channel for the current mount, if any. `channel_token` is bumped every time a channel
    // is opened or let go so late events from an old socket can be told apart.
    transport: Option<TransportHandle>,
    channel_token: u64,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
    ) -> Self {
        let store = kv_store::open_store(&data_dir);
        Self::with_store(update_sender, core_sender, data_dir, shared_state, store)
    }

    pub fn with_store(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let storage_key = config.storage_key();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let (messages, seeded) = MessageList::restore(store.as_ref(), &storage_key, now_millis());
        let persister = Persister::spawn(store);

        let mut state = AppState::empty();
        state.restored = true;
        state.messages = messages.as_slice().to_vec();

        tracing::info!(
            data_dir = %data_dir,
            network = config.network_enabled(),
            count = messages.len(),
            "core ready"
        );

        let this = Self {
            state,
            rev: 0,
            messages,
            update_sender,
            core_sender,
            shared_state,
            config,
            storage_key,
            runtime,
            persister,
            transport: None,
            channel_token: 0,
        };

        // Ensure FfiApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        if seeded {
            this.persist_messages();
        }
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        self.state.messages = self.messages.as_slice().to_vec();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    /// Queue the whole list for writing. Failures are logged by the persister and never
    /// roll back in-memory state.
    fn persist_messages(&self) {
        match self.messages.to_snapshot() {
            Ok(blob) => self.persister.save(&self.storage_key, blob),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "failed to encode message snapshot")
            }
        }
    }

    #[cfg(test)]
    fn flush_persistence(&self, timeout: Duration) -> bool {
        self.persister.flush(timeout)
    }

    fn is_current_channel(&self, channel: u64) -> bool {
        self.transport.as_ref().map(|t| t.token()) == Some(channel)
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                // Never log `?action` directly: it carries message text.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::Mount => self.mount(),
            AppAction::Unmount => self.unmount(),
            AppAction::SendMessage { text } => self.send_message(text),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::ChannelOpened { channel } => {
                if !self.is_current_channel(channel) {
                    return;
                }
                self.state.connection = ConnectionState::Open;
                self.emit_state();
            }
            InternalEvent::ChannelClosed { channel, reason } => {
                if !self.is_current_channel(channel) {
                    return;
                }
                self.transport = None;
                self.channel_token = self.channel_token.wrapping_add(1);
                self.state.connection = ConnectionState::Closed { reason };
                self.state.awaiting_reply = false;
                self.emit_state();
            }
            InternalEvent::PayloadReceived { channel, payload } => {
                if !self.is_current_channel(channel) {
                    tracing::debug!(channel, "dropping payload from stale channel");
                    return;
                }
                self.handle_payload(payload);
            }
            InternalEvent::MalformedPayload { channel, error } => {
                tracing::warn!(channel, %error, "dropping inbound frame");
            }
        }
    }

    fn mount(&mut self) {
        if self.transport.is_some() {
            tracing::debug!("mount: channel already open");
            return;
        }
        if !self.config.network_enabled() {
            tracing::info!("mount: network disabled");
            return;
        }
        self.channel_token = self.channel_token.wrapping_add(1);
        let endpoint = self.config.endpoint_url();
        self.transport = Some(TransportHandle::open(
            self.runtime.handle(),
            endpoint,
            self.channel_token,
            self.core_sender.clone(),
        ));
        self.state.connection = ConnectionState::Connecting;
        self.emit_state();
    }

    fn unmount(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.channel_token = self.channel_token.wrapping_add(1);
        self.state.connection = ConnectionState::Idle;
        self.state.awaiting_reply = false;
        self.emit_state();

        // The host may suspend us right after the screen goes away.
        if !self.persister.flush(UNMOUNT_FLUSH_TIMEOUT) {
            tracing::warn!("unmount: pending snapshot writes did not finish in time");
        }
    }

    /// Two phases: the local append always lands; the send is best effort.
    fn send_message(&mut self, text: String) {
        if text.trim().is_empty() {
            return;
        }
        let msg = self.messages.append_local(text, now_millis());
        self.state.awaiting_reply = true;

        let sent = self
            .transport
            .as_ref()
            .map(|t| t.send(msg.text.clone()))
            .unwrap_or(false);
        if !sent {
            tracing::debug!(message_id = %msg.id, "no open channel; send dropped");
            self.state.awaiting_reply = false;
        }

        self.emit_state();
        self.persist_messages();
    }

    fn handle_payload(&mut self, payload: InboundPayload) {
        let msg = self.messages.reconcile(payload, now_millis());
        tracing::debug!(message_id = %msg.id, "reconciled inbound message");
        self.state.awaiting_reply = false;
        self.emit_state();
        self.persist_messages();
    }
}
