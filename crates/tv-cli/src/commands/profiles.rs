//! Profile management commands

use std::path::Path;

use anyhow::{Context, Result};
use tv_core::ProfileId;

use crate::ipc::ServiceClient;
use crate::output::{format_profiles, print_success};

/// List stored profiles
pub async fn profile_list(client: &mut ServiceClient) -> Result<()> {
    let profiles = client.list_profiles().await?;
    println!("{}", format_profiles(&profiles));
    Ok(())
}

/// Import a profile file
pub async fn profile_add(client: &mut ServiceClient, name: &str, source: &Path) -> Result<()> {
    // The daemon resolves paths against its own working directory
    let source = if source.is_absolute() {
        source.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to resolve current directory")?
            .join(source)
    };

    let info = client.create_profile(name, &source).await?;
    print_success(&format!("Added profile '{}' (id {})", info.name, info.id));
    if info.active {
        print_success("Profile is now active");
    }
    Ok(())
}

/// Make a profile active
pub async fn profile_use(client: &mut ServiceClient, id: u64) -> Result<()> {
    client.activate_profile(ProfileId(id)).await?;
    print_success(&format!("Profile {} is now active", id));
    Ok(())
}

/// Delete a profile
pub async fn profile_remove(client: &mut ServiceClient, id: u64) -> Result<()> {
    client.delete_profile(ProfileId(id)).await?;
    print_success(&format!("Removed profile {}", id));
    Ok(())
}
