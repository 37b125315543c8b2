//! Version resolution against a registry listing
//!
//! Turns the list of published version strings into one concrete version.
//! Ordering is always full semantic-version ordering, never lexical:
//! `1.10.0` is newer than `1.9.0`.

use semver::{Version, VersionReq};
use std::collections::HashSet;
use tracing::{debug, trace};

use crate::error::{DispatchError, Result};
use crate::registry::RegistryClient;

/// All published version strings for `name`
///
/// An artifact the registry does not know, or one with no versions,
/// yields an empty list rather than an error.
pub async fn list_versions(registry: &dyn RegistryClient, name: &str) -> Result<Vec<String>> {
    let versions = match registry.fetch_metadata(name).await? {
        Some(metadata) => metadata.version_list(),
        None => Vec::new(),
    };
    check_integrity(name, &versions)?;
    Ok(versions)
}

/// Versions caret-compatible with `base`, highest first
///
/// `^1.2.0` keeps `>=1.2.0, <2.0.0`; for `0.x` bases the minor component is
/// the compatibility boundary. Entries that are not valid semver are skipped.
pub fn select_compatible(base: &str, versions: &[String]) -> Result<Vec<String>> {
    let req = VersionReq::parse(&format!("^{base}")).map_err(|e| {
        DispatchError::InvalidConfiguration(format!("Invalid base version '{base}': {e}"))
    })?;

    Ok(sorted_descending(versions)
        .into_iter()
        .filter(|(parsed, _)| req.matches(parsed))
        .map(|(_, raw)| raw)
        .collect())
}

/// Highest published version compatible with `base`
///
/// Used to tell the user that a newer release of the CLI itself exists.
pub async fn select_latest_compatible(
    registry: &dyn RegistryClient,
    base: &str,
    name: &str,
) -> Result<Option<String>> {
    let versions = list_versions(registry, name).await?;
    Ok(select_compatible(base, &versions)?.into_iter().next())
}

/// Highest published version of `name`, or `None` if nothing is published
pub async fn select_latest(registry: &dyn RegistryClient, name: &str) -> Result<Option<String>> {
    let versions = list_versions(registry, name).await?;
    let latest = latest_of(&versions);
    debug!("Latest version of '{}' is {:?}", name, latest);
    Ok(latest)
}

/// Highest published version of `name` satisfying `req`
pub async fn select_matching(
    registry: &dyn RegistryClient,
    req: &VersionReq,
    name: &str,
) -> Result<Option<String>> {
    let versions = list_versions(registry, name).await?;
    Ok(sorted_descending(&versions)
        .into_iter()
        .find(|(parsed, _)| req.matches(parsed))
        .map(|(_, raw)| raw))
}

/// Maximum of `versions` by semantic-version ordering
pub fn latest_of(versions: &[String]) -> Option<String> {
    sorted_descending(versions)
        .into_iter()
        .next()
        .map(|(_, raw)| raw)
}

/// Parse and sort newest-first, dropping anything that is not semver
fn sorted_descending(versions: &[String]) -> Vec<(Version, String)> {
    let mut parsed: Vec<(Version, String)> = versions
        .iter()
        .filter_map(|raw| match Version::parse(raw) {
            Ok(v) => Some((v, raw.clone())),
            Err(e) => {
                trace!("Skipping non-semver version '{}': {}", raw, e);
                None
            }
        })
        .collect();

    parsed.sort_by(|a, b| b.0.cmp(&a.0));
    parsed
}

/// A well-formed registry never lists the same version twice
fn check_integrity(name: &str, versions: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for raw in versions {
        let key = Version::parse(raw)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| raw.clone());
        if !seen.insert(key) {
            return Err(DispatchError::RegistryIntegrity {
                name: name.to_string(),
                version: raw.clone(),
            });
        }
    }
    Ok(())
}
