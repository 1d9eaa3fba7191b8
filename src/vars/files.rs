//! `group_vars/` and `host_vars/` directory loading.
//!
//! Each entry is either `<name>.yml` (`.yaml`, `.json`, or no extension) or a
//! directory `<name>/` whose files are merged in file-name order.

use indexmap::IndexMap;
use std::path::Path;
use tracing::debug;

use super::{load_vars_file, HashBehaviour, Vars};
use crate::error::Result;

const VAR_EXTENSIONS: &[&str] = &["yml", "yaml", "json"];

/// Variables found in a `group_vars/` + `host_vars/` pair.
#[derive(Debug, Clone, Default)]
pub struct VarsDirectory {
    /// Per-group variables, keyed by group name
    pub group_vars: IndexMap<String, Vars>,
    /// Per-host variables, keyed by host name
    pub host_vars: IndexMap<String, Vars>,
}

impl VarsDirectory {
    /// Load `group_vars/` and `host_vars/` under `base`. Missing directories
    /// are not an error.
    pub fn load(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref();
        Ok(Self {
            group_vars: load_named_dir(&base.join("group_vars"))?,
            host_vars: load_named_dir(&base.join("host_vars"))?,
        })
    }

    /// Whether nothing was found
    pub fn is_empty(&self) -> bool {
        self.group_vars.is_empty() && self.host_vars.is_empty()
    }

    /// Variables for one group
    pub fn group(&self, name: &str) -> Option<&Vars> {
        self.group_vars.get(name)
    }

    /// Variables for one host
    pub fn host(&self, name: &str) -> Option<&Vars> {
        self.host_vars.get(name)
    }
}

fn load_named_dir(dir: &Path) -> Result<IndexMap<String, Vars>> {
    let mut result = IndexMap::new();
    if !dir.is_dir() {
        return Ok(result);
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    for path in entries {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.starts_with('.') {
            continue;
        }

        let vars = if path.is_dir() {
            let mut files: Vec<_> = std::fs::read_dir(&path)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && has_var_extension(p))
                .collect();
            files.sort();
            let mut merged = Vars::new();
            for file in files {
                HashBehaviour::Replace.overlay_all(&mut merged, &load_vars_file(&file)?);
            }
            merged
        } else if has_var_extension(&path) || path.extension().is_none() {
            load_vars_file(&path)?
        } else {
            continue;
        };

        debug!(name = %stem, path = %path.display(), count = vars.len(), "Loaded vars");
        let name = if path.is_dir() {
            path.file_name().and_then(|s| s.to_str()).unwrap_or(stem)
        } else {
            stem
        };
        let entry = result.entry(name.to_string()).or_insert_with(Vars::new);
        HashBehaviour::Replace.overlay_all(entry, &vars);
    }

    Ok(result)
}

fn has_var_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| VAR_EXTENSIONS.contains(&e))
}
