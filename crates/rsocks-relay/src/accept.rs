use crate::error::RelayError;
use rsocks_mux::AcceptPolicy;
use std::time::Duration;
use tracing::{error, warn};

/// Pause after a tolerated accept failure (e.g. fd exhaustion) before retrying
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Apply `policy` to a failed `accept()`
pub(crate) async fn accept_failed(
    role: &'static str,
    policy: AcceptPolicy,
    err: std::io::Error,
) -> Result<(), RelayError> {
    if policy.is_fatal() {
        error!("{} failed to accept a connection: {}", role, err);
        return Err(RelayError::AcceptError { role, source: err });
    }

    warn!("{} failed to accept a connection, continuing: {}", role, err);
    tokio::time::sleep(ACCEPT_BACKOFF).await;
    Ok(())
}
