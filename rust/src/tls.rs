use std::sync::Once;

static INIT: Once = Once::new();

/// `wss://` endpoints go through rustls, which needs a process-wide crypto provider.
/// Installing fails harmlessly if the host process already picked one.
pub(crate) fn init_rustls_crypto_provider() {
    INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("rustls crypto provider already installed");
        }
    });
}
