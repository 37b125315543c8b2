//! Cache layout for installed artifacts
//!
//! Every (name, version) pair lives in its own sibling directory under the
//! store:
//!
//! ```text
//! <store_dir>/
//!     _@rigging_init@1.0.0@@rigging/init/
//!     _@rigging_init@1.1.0@@rigging/init/
//!     _demo-cmd@1.0.0@demo-cmd/
//! ```
//!
//! The directory name is only ever computed, never parsed back.

use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR_STR};
use tracing::debug;

use crate::error::{DispatchError, Result};
use crate::manifest::{PackageManifest, MANIFEST_FILE};

/// Prefix of staging directories created by the installer
pub const STAGING_PREFIX: &str = ".staging-";

/// An artifact found in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
}

/// Artifact name made safe for use inside a single path segment
pub fn name_prefix(name: &str) -> String {
    name.replace('/', "_")
}

/// Cache directory for one version of one artifact
pub fn cache_path(store_dir: &Path, name_prefix: &str, version: &str, name: &str) -> PathBuf {
    absolutize(store_dir).join(format!("_{name_prefix}@{version}@{name}"))
}

/// Absolute entry point of the artifact whose files live at or below `root_dir`
///
/// Returns `Ok(None)` when no manifest is found above `root_dir` or the
/// manifest declares no `main`; both are normal outcomes.
pub fn resolve_entry_point(root_dir: &Path) -> Result<Option<PathBuf>> {
    let Some((dir, manifest)) = PackageManifest::find_nearest(root_dir)? else {
        debug!("No manifest found above {}", root_dir.display());
        return Ok(None);
    };

    let Some(main) = manifest.main_entry() else {
        debug!("Manifest in {} declares no main entry", dir.display());
        return Ok(None);
    };

    let entry = normalize_path(&dir.join(host_separators(main)));
    debug!("Resolved entry point {}", entry.display());
    Ok(Some(entry))
}

/// Lexically resolve `.` and `..` without touching the filesystem
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() && !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Rewrite both separator styles to the host convention
fn host_separators(relative: &str) -> String {
    relative.replace(['/', '\\'], MAIN_SEPARATOR_STR)
}

/// Make `path` absolute against the current directory
pub(crate) fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize_path(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => normalize_path(&cwd.join(path)),
        Err(_) => path.to_path_buf(),
    }
}

/// Artifacts present in `store_dir`, identified by their manifests
///
/// Staging directories and entries without a readable manifest are skipped.
pub fn list_entries(store_dir: &Path) -> Result<Vec<CachedEntry>> {
    if !store_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    let read_dir = std::fs::read_dir(store_dir).map_err(|e| DispatchError::io(store_dir, e))?;
    for entry in read_dir {
        let entry = entry.map_err(|e| DispatchError::io(store_dir, e))?;
        let path = entry.path();
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();

        if !path.is_dir() || file_name.starts_with(STAGING_PREFIX) || !file_name.starts_with('_')
        {
            continue;
        }

        // Scoped names keep their separator, so the artifact sits one level down
        let roots = if path.join(MANIFEST_FILE).is_file() {
            vec![path]
        } else {
            std::fs::read_dir(&path)
                .map_err(|e| DispatchError::io(&path, e))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.join(MANIFEST_FILE).is_file())
                .collect()
        };

        for root in roots {
            match PackageManifest::from_dir(&root) {
                Ok(manifest) => entries.push(CachedEntry {
                    name: manifest.name.unwrap_or_default(),
                    version: manifest.version.unwrap_or_default(),
                    path: root,
                }),
                Err(e) => debug!("Skipping cache entry {}: {}", root.display(), e),
            }
        }
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
    Ok(entries)
}

#[cfg(test)]
mod cache_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_name_prefix_replaces_separator() {
        assert_eq!(name_prefix("@rigging/init"), "@rigging_init");
        assert_eq!(name_prefix("demo-cmd"), "demo-cmd");
    }

    #[test]
    fn test_cache_path_layout() {
        let store = Path::new("/home/dev/.rigging/dependencies/node_modules");
        let path = cache_path(store, "demo-cmd", "1.0.0", "demo-cmd");
        assert_eq!(path, store.join("_demo-cmd@1.0.0@demo-cmd"));

        let path = cache_path(store, "@rigging_init", "1.1.3", "@rigging/init");
        assert_eq!(path, store.join("_@rigging_init@1.1.3@@rigging").join("init"));
    }

    #[test]
    fn test_cache_path_is_deterministic_and_distinct() {
        let store = Path::new("/store");
        let pairs = [
            ("demo-cmd", "1.0.0"),
            ("demo-cmd", "1.0.1"),
            ("demo", "1.0.0"),
            ("@scope/demo", "1.0.0"),
            ("@scope_demo", "1.0.0"),
        ];

        let mut seen = std::collections::HashSet::new();
        for (name, version) in pairs {
            let first = cache_path(store, &name_prefix(name), version, name);
            let second = cache_path(store, &name_prefix(name), version, name);
            assert_eq!(first, second);
            assert!(seen.insert(first), "collision for {name}@{version}");
        }
    }

    #[test]
    fn test_cache_path_relative_store_is_absolutized() {
        let path = cache_path(Path::new("store"), "a", "1.0.0", "a");
        assert!(path.is_absolute());
        assert!(path.ends_with("store/_a@1.0.0@a"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/a/b/./c/../d.js")),
            PathBuf::from("/a/b/d.js")
        );
        assert_eq!(normalize_path(Path::new("/../x")), PathBuf::from("/x"));
    }

    #[test]
    fn test_resolve_entry_point() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("_demo-cmd@1.0.0@demo-cmd");
        std::fs::create_dir_all(root.join("lib")).unwrap();
        std::fs::write(
            root.join("package.json"),
            r#"{"name": "demo-cmd", "version": "1.0.0", "main": "./lib/index.js"}"#,
        )
        .unwrap();

        let entry = resolve_entry_point(&root).unwrap().unwrap();
        assert_eq!(entry, root.join("lib").join("index.js"));
        assert!(entry.is_absolute());
    }

    #[test]
    fn test_resolve_entry_point_windows_style_main() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("package.json"),
            r#"{"main": "lib\\cli\\run.js"}"#,
        )
        .unwrap();

        let entry = resolve_entry_point(temp_dir.path()).unwrap().unwrap();
        assert_eq!(entry, temp_dir.path().join("lib").join("cli").join("run.js"));
    }

    #[test]
    fn test_resolve_entry_point_without_main() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("package.json"), r#"{"name": "x"}"#).unwrap();

        assert_eq!(resolve_entry_point(temp_dir.path()).unwrap(), None);
    }

    #[test]
    fn test_resolve_entry_point_without_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("empty");
        std::fs::create_dir_all(&root).unwrap();

        assert_eq!(resolve_entry_point(&root).unwrap(), None);
    }

    #[test]
    fn test_list_entries_reads_manifests() {
        let temp_dir = TempDir::new().unwrap();
        let store = temp_dir.path();

        for version in ["1.0.0", "1.1.0"] {
            let dir = cache_path(store, "demo-cmd", version, "demo-cmd");
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(
                dir.join("package.json"),
                format!(r#"{{"name": "demo-cmd", "version": "{version}"}}"#),
            )
            .unwrap();
        }
        std::fs::create_dir_all(store.join(".staging-abc")).unwrap();
        std::fs::create_dir_all(store.join("_broken@1.0.0@broken")).unwrap();

        let scoped = cache_path(store, "@rigging_init", "2.0.0", "@rigging/init");
        std::fs::create_dir_all(&scoped).unwrap();
        std::fs::write(
            scoped.join("package.json"),
            r#"{"name": "@rigging/init", "version": "2.0.0"}"#,
        )
        .unwrap();

        let entries = list_entries(store).unwrap();
        let found: Vec<(&str, &str)> = entries
            .iter()
            .map(|e| (e.name.as_str(), e.version.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("@rigging/init", "2.0.0"),
                ("demo-cmd", "1.0.0"),
                ("demo-cmd", "1.1.0")
            ]
        );
    }

    #[test]
    fn test_list_entries_missing_store() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_entries(&temp_dir.path().join("nope")).unwrap().is_empty());
    }
}
