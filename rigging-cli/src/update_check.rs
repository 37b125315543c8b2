//! Newer-release notice for the CLI itself
//!
//! Looks up the CLI's own package on the configured registry and warns when
//! a compatible newer release exists. Never fails the command.

use rigging_core::version::select_latest_compatible;
use rigging_core::HttpRegistry;
use semver::Version;
use std::time::Duration;
use tracing::{debug, warn};

/// Registry name the CLI is published under
pub const CLI_PACKAGE: &str = "@rigging/cli";

/// Set to any value to skip the check
pub const NO_UPDATE_CHECK_ENV: &str = "RIG_NO_UPDATE_CHECK";

const CHECK_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn notify_if_outdated(registry_url: &str) {
    if std::env::var_os(NO_UPDATE_CHECK_ENV).is_some() {
        debug!("Update check disabled by {}", NO_UPDATE_CHECK_ENV);
        return;
    }

    let current = env!("CARGO_PKG_VERSION");
    match tokio::time::timeout(CHECK_TIMEOUT, newer_release(registry_url, current)).await {
        Ok(Ok(Some(latest))) => warn!(
            "A newer version of rig is available: {} -> {}. Install {}@{} to upgrade.",
            current, latest, CLI_PACKAGE, latest
        ),
        Ok(Ok(None)) => debug!("rig {} is up to date", current),
        Ok(Err(e)) => debug!("Update check failed: {}", e),
        Err(_) => debug!("Update check timed out"),
    }
}

async fn newer_release(registry_url: &str, current: &str) -> rigging_core::Result<Option<String>> {
    let registry = HttpRegistry::new(registry_url)?;
    let latest = select_latest_compatible(&registry, current, CLI_PACKAGE).await?;
    Ok(latest.filter(|candidate| is_newer(candidate, current)))
}

fn is_newer(candidate: &str, current: &str) -> bool {
    match (Version::parse(candidate), Version::parse(current)) {
        (Ok(candidate), Ok(current)) => candidate > current,
        _ => false,
    }
}
