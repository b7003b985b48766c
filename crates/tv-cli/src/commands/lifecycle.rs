//! Engine lifecycle commands

use anyhow::Result;
use tv_core::ProcessState;

use crate::ipc::ServiceClient;
use crate::output::{print_info, print_success, print_warning};

/// Execute the start command
pub async fn start_command(client: &mut ServiceClient) -> Result<()> {
    print_info("Starting engine...");

    match client.start().await? {
        ProcessState::Started => print_success("Engine started"),
        ProcessState::Stopped => {
            print_warning("Engine did not start; run `tunnelvisor watch --kinds error` for details")
        }
    }
    Ok(())
}

/// Execute the stop command
pub async fn stop_command(client: &mut ServiceClient) -> Result<()> {
    match client.stop().await? {
        ProcessState::Stopped => print_success("Engine stopped"),
        ProcessState::Started => print_warning("Engine is still running"),
    }
    Ok(())
}

/// Execute the reload command
pub async fn reload_command(client: &mut ServiceClient) -> Result<()> {
    if !client.process_state().await?.is_started() {
        print_warning("Engine is stopped; the reload will be skipped");
    }

    client.reload().await?;
    print_success("Profile reload queued");
    Ok(())
}

/// Execute the foreground command
pub async fn foreground_command(client: &mut ServiceClient, foreground: bool) -> Result<()> {
    client.set_foreground(foreground).await?;

    if foreground {
        print_success("Switched to foreground telemetry");
    } else {
        print_success("Switched to background telemetry");
    }
    Ok(())
}
