#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Lifecycle
    Mount,
    Unmount,

    // Chat
    SendMessage { text: String },
}

impl AppAction {
    /// Log-safe action tag (never includes message text).
    pub fn tag(&self) -> &'static str {
        match self {
            // Lifecycle
            AppAction::Mount => "Mount",
            AppAction::Unmount => "Unmount",

            // Chat
            AppAction::SendMessage { .. } => "SendMessage",
        }
    }
}
