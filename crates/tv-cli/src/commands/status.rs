//! Status command implementation

use anyhow::Result;

use crate::ipc::ServiceClient;
use crate::output::format_status;

/// Execute the status command
pub async fn status_command(client: &mut ServiceClient) -> Result<()> {
    let state = client.process_state().await?;

    let snapshot = if state.is_started() {
        client.proxies().await.ok()
    } else {
        None
    };

    print!("{}", format_status(client.address(), state, snapshot.as_ref()));
    Ok(())
}
