use super::cancellation::CancellationToken;
use tracing::{error, info};

/// Enables using the typical keypress (Ctrl-C) or a SIGTERM to stop a running check.
///
/// The handler only cancels the shared token, the check and the
/// [CancellationWatcher](crate::checker::watcher::CancellationWatcher) react to it.
pub fn create_shutdown_signal_handler(token: CancellationToken) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, cancelling the running check");
        token.cancel();
    })
    .inspect_err(|e| error!("Could not set signal handler: {e}"))
}
