//! Proxy group commands

use anyhow::Result;

use crate::ipc::ServiceClient;
use crate::output::{format_proxies, print_error, print_success, print_warning};

/// Execute the proxies command
pub async fn proxies_command(
    client: &mut ServiceClient,
    group: Option<&str>,
    long: bool,
) -> Result<()> {
    if !client.process_state().await?.is_started() {
        print_warning("Engine is stopped. Try: tunnelvisor start");
        return Ok(());
    }

    let mut snapshot = client.proxies().await?;

    if let Some(filter) = group {
        snapshot.groups.retain(|name, _| name.contains(filter));
    }

    println!("Routing: {}", snapshot.current_group);
    println!("{}", format_proxies(&snapshot, long));
    Ok(())
}

/// Execute the select command
pub async fn select_command(client: &mut ServiceClient, group: &str, proxy: &str) -> Result<()> {
    // Selection failures surface as error events, so confirm against a fresh snapshot
    client.select(group, proxy).await?;

    let snapshot = client.proxies().await?;
    match snapshot.groups.get(group).and_then(|g| g.now.as_deref()) {
        Some(now) if now == proxy => {
            print_success(&format!("{} now routes through {}", group, proxy));
            Ok(())
        }
        _ => {
            print_error(&format!("Failed to select {} in {}", proxy, group));
            anyhow::bail!("selection was not applied")
        }
    }
}
