use serde::{Deserialize, Deserializer, Serialize};

/// Who authored a message. Drives bubble style on the host side.
#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrigin {
    /// Typed on this device.
    User,
    /// Delivered by the remote endpoint (or the local greeting).
    System,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(deserialize_with = "deserialize_message_id")]
    pub id: String,
    pub text: String,
    /// Unix milliseconds, stamped when the message entered the list.
    pub created_at: i64,
    pub origin: MessageOrigin,
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Screen not mounted (or network disabled).
    Idle,
    Connecting,
    Open,
    /// The channel went away. There is no reconnect; remount to try again.
    Closed {
        reason: Option<String>,
    },
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    /// False until the first restore from local storage has completed.
    pub restored: bool,
    /// Newest first.
    pub messages: Vec<ChatMessage>,
    /// A reply is pending; hosts show a typing indicator.
    pub awaiting_reply: bool,
    pub connection: ConnectionState,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            restored: false,
            messages: vec![],
            awaiting_reply: false,
            connection: ConnectionState::Idle,
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Local wall-clock label for a message timestamp, e.g. `3:07 PM`.
#[uniffi::export]
pub fn format_message_time(created_at_ms: i64) -> String {
    match chrono::DateTime::<chrono::Utc>::from_timestamp_millis(created_at_ms) {
        Some(ts) => ts
            .with_timezone(&chrono::Local)
            .format("%-I:%M %p")
            .to_string(),
        None => String::new(),
    }
}

/// Remote ids arrive as JSON strings or numbers; both collapse to the same string key.
pub(crate) fn deserialize_message_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "message id must be a string or number, got {other}"
        ))),
    }
}
