use crate::core::transport::{InboundPayload, TransportError};
use crate::state::AppState;
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    /// Every change ships the whole state; hosts replace their copy wholesale.
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Events raised by background tasks. `channel` is the token of the transport that produced
/// the event; the core drops events from channels it has already let go of.
#[derive(Debug)]
pub enum InternalEvent {
    ChannelOpened {
        channel: u64,
    },
    ChannelClosed {
        channel: u64,
        reason: Option<String>,
    },
    PayloadReceived {
        channel: u64,
        payload: InboundPayload,
    },
    MalformedPayload {
        channel: u64,
        error: TransportError,
    },
}
