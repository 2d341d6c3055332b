use crate::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Install a ctrl-c handler that cancels the returned token instead of exiting immediately.
pub(super) fn install_shutdown_handler() -> Result<CancellationToken> {
    let shutdown = CancellationToken::new();
    let handle = shutdown.clone();

    ctrlc::set_handler(move || {
        handle.cancel();
    })
    .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    Ok(shutdown)
}
