use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Mutex, Once};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE: &str = "chat_core.log";

static INIT: Once = Once::new();

/// Installs the process-wide subscriber once. Later calls (another `FfiApp`, tests) are no-ops.
pub(crate) fn init_logging(data_dir: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = std::fs::create_dir_all(data_dir);
        let path = Path::new(data_dir).join(LOG_FILE);
        let file_layer = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            ),
            Err(e) => {
                eprintln!("[chat_core] failed to open log file {}: {e}", path.display());
                None
            }
        };

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();
    });
}
