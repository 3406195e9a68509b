// Optional per-install overrides read from `<data_dir>/chat_config.json`.

use std::path::Path;

use serde::{Deserialize, Serialize};

pub(crate) const CONFIG_FILE: &str = "chat_config.json";
pub(crate) const DEFAULT_ENDPOINT_URL: &str = "ws://localhost:8000/ws";
pub(crate) const DEFAULT_STORAGE_KEY: &str = "messages";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct AppConfig {
    pub(crate) endpoint_url: Option<String>,
    pub(crate) disable_network: Option<bool>,
    pub(crate) storage_key: Option<String>,
}

impl AppConfig {
    pub(crate) fn network_enabled(&self) -> bool {
        self.disable_network != Some(true)
    }

    /// Configured endpoint if it is a usable `ws://`/`wss://` URL, otherwise the default.
    pub(crate) fn endpoint_url(&self) -> String {
        let Some(raw) = self
            .endpoint_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return DEFAULT_ENDPOINT_URL.to_string();
        };
        match url::Url::parse(raw) {
            Ok(u) if matches!(u.scheme(), "ws" | "wss") => raw.to_string(),
            Ok(u) => {
                tracing::warn!(
                    scheme = u.scheme(),
                    "endpoint_url must be ws:// or wss://; using default"
                );
                DEFAULT_ENDPOINT_URL.to_string()
            }
            Err(e) => {
                tracing::warn!(%e, "invalid endpoint_url; using default");
                DEFAULT_ENDPOINT_URL.to_string()
            }
        }
    }

    pub(crate) fn storage_key(&self) -> String {
        self.storage_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STORAGE_KEY)
            .to_string()
    }
}

pub(crate) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(_) => return AppConfig::default(),
    };
    match serde_json::from_str::<AppConfig>(&raw) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(%e, path = %path.display(), "failed to parse config; using defaults");
            AppConfig::default()
        }
    }
}
