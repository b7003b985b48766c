//! Watch command implementation

use anyhow::Result;
use tv_core::KindSet;

use crate::ipc::ServiceClient;
use crate::output::{format_event, print_info, print_warning};

/// Stream telemetry events until interrupted or the daemon goes away
pub async fn watch_command(client: &mut ServiceClient, kinds: KindSet) -> Result<()> {
    let kinds = client.subscribe(kinds).await?;
    let names: Vec<&str> = kinds.iter().map(|kind| kind.as_str()).collect();
    print_info(&format!("Watching {} (Ctrl+C to stop)", names.join(", ")));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = client.next_event() => match event? {
                Some(event) => println!("{}", format_event(&event)),
                None => {
                    print_warning("tunnelvisord closed the connection");
                    break;
                }
            },
        }
    }

    Ok(())
}
