//! Inventory sources: YAML, INI, JSON documents and dynamic inventory
//! executables.

use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

use super::{Inventory, InventoryError, InventoryResult};
use crate::vars::Vars;

/// A group in the YAML inventory format
#[derive(Debug, Default, Deserialize)]
struct YamlGroup {
    #[serde(default)]
    hosts: Option<IndexMap<String, Option<Vars>>>,
    #[serde(default)]
    children: Option<IndexMap<String, Option<YamlGroup>>>,
    #[serde(default)]
    vars: Option<Vars>,
}

/// A group in the dynamic inventory JSON format
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonGroup {
    /// Shorthand: a bare list of hosts
    Hosts(Vec<String>),
    Full {
        #[serde(default)]
        hosts: Vec<String>,
        #[serde(default)]
        children: Vec<String>,
        #[serde(default)]
        vars: Vars,
    },
}

/// The `_meta` block of the dynamic inventory JSON format
#[derive(Debug, Default, Deserialize)]
struct JsonMeta {
    #[serde(default)]
    hostvars: IndexMap<String, Vars>,
}

/// What a JSON listing contained, beyond what it added to the inventory
#[derive(Debug, Default)]
struct JsonListing {
    hosts: IndexSet<String>,
    has_meta: bool,
}

impl Inventory {
    /// Load a single inventory file
    pub(super) fn load_file(&mut self, path: &Path) -> InventoryResult<()> {
        if is_executable(path) && !has_data_extension(path) {
            return self.load_dynamic(path);
        }

        let content = std::fs::read_to_string(path)?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        debug!(path = %path.display(), "Loading inventory file");

        match extension {
            "yml" | "yaml" => self.parse_yaml(&content),
            "json" => self.parse_json(&content),
            "ini" | "cfg" => self.parse_ini(&content),
            _ => {
                let trimmed = content.trim_start();
                if trimmed.starts_with('{') {
                    self.parse_json(&content)
                } else if trimmed.starts_with('[') || looks_like_ini(&content) {
                    self.parse_ini(&content)
                } else {
                    self.parse_yaml(&content)
                }
            }
        }
    }

    /// Load every inventory file in a directory
    pub(super) fn load_directory(&mut self, path: &Path) -> InventoryResult<()> {
        let mut entries: Vec<_> = std::fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
                !name.starts_with('.') && !name.ends_with('~') && !name.ends_with(".md")
            })
            .collect();
        entries.sort();

        for entry in entries {
            self.load_file(&entry)?;
        }
        Ok(())
    }

    /// Load dynamic inventory from an executable script.
    ///
    /// The script is run with `--list`. When that listing has no
    /// `_meta.hostvars`, it is run again with `--host <name>` for every
    /// listed host to fetch that host's variables.
    pub(super) fn load_dynamic(&mut self, path: &Path) -> InventoryResult<()> {
        info!(script = %path.display(), "Running dynamic inventory");
        let listing = run_script(path, &["--list"])?;
        let listing = self.apply_json(&listing)?;
        if listing.has_meta {
            return Ok(());
        }

        debug!(hosts = listing.hosts.len(), "No _meta in listing, querying each host");
        for host_name in listing.hosts {
            let output = run_script(path, &["--host", &host_name])?;
            let vars: Option<Vars> = if output.trim().is_empty() {
                None
            } else {
                serde_json::from_str(&output)?
            };
            let host = self.ensure_host(&host_name);
            for (key, value) in vars.unwrap_or_default() {
                host.set_var(key, value);
            }
        }
        Ok(())
    }

    /// Parse YAML inventory format
    pub(super) fn parse_yaml(&mut self, content: &str) -> InventoryResult<()> {
        let data: Option<IndexMap<String, Option<YamlGroup>>> = serde_yaml::from_str(content)?;
        for (name, group) in data.unwrap_or_default() {
            self.apply_yaml_group(&name, group.unwrap_or_default());
        }
        Ok(())
    }

    fn apply_yaml_group(&mut self, name: &str, group: YamlGroup) {
        self.ensure_group(name);

        for (host_name, vars) in group.hosts.unwrap_or_default() {
            let host = self.ensure_host(&host_name);
            host.add_to_group(name);
            for (key, value) in vars.unwrap_or_default() {
                host.set_var(key, value);
            }
            self.ensure_group(name).add_host(host_name);
        }

        for (child_name, child) in group.children.unwrap_or_default() {
            self.ensure_group(name).add_child(child_name.clone());
            self.apply_yaml_group(&child_name, child.unwrap_or_default());
        }

        let target = self.ensure_group(name);
        for (key, value) in group.vars.unwrap_or_default() {
            target.set_var(key, value);
        }
    }

    /// Parse JSON inventory format (the `--list` output of a dynamic
    /// inventory script)
    pub(super) fn parse_json(&mut self, content: &str) -> InventoryResult<()> {
        self.apply_json(content).map(|_| ())
    }

    fn apply_json(&mut self, content: &str) -> InventoryResult<JsonListing> {
        let data: IndexMap<String, Value> = serde_json::from_str(content)?;
        let mut meta = JsonMeta::default();
        let mut listing = JsonListing::default();

        // Create groups first so declaration order follows the document
        for name in data.keys().filter(|k| k.as_str() != "_meta") {
            self.ensure_group(name);
        }

        for (name, value) in data {
            if name == "_meta" {
                meta = serde_json::from_value(value)?;
                listing.has_meta = true;
                continue;
            }

            let (hosts, children, vars) = match serde_json::from_value::<JsonGroup>(value)? {
                JsonGroup::Hosts(hosts) => (hosts, Vec::new(), Vars::new()),
                JsonGroup::Full {
                    hosts,
                    children,
                    vars,
                } => (hosts, children, vars),
            };

            for host_name in hosts {
                self.ensure_host(&host_name).add_to_group(name.clone());
                listing.hosts.insert(host_name.clone());
                self.ensure_group(&name).add_host(host_name);
            }
            for child in children {
                self.ensure_group(&child);
                self.ensure_group(&name).add_child(child);
            }
            let group = self.ensure_group(&name);
            for (key, value) in vars {
                group.set_var(key, value);
            }
        }

        for (host_name, vars) in meta.hostvars {
            let host = self.ensure_host(&host_name);
            for (key, value) in vars {
                host.set_var(key, value);
            }
        }

        Ok(listing)
    }

    /// Parse INI inventory format
    pub(super) fn parse_ini(&mut self, content: &str) -> InventoryResult<()> {
        enum Section {
            Hosts(String),
            Vars(String),
            Children(String),
        }

        let mut section = Section::Hosts("ungrouped".to_string());

        for (index, raw) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let header = header.strip_suffix(']').ok_or_else(|| {
                    InventoryError::InvalidIniFormat {
                        line: line_no,
                        message: format!("unterminated section header '{}'", line),
                    }
                })?;
                section = match header.split_once(':') {
                    Some((name, "vars")) => Section::Vars(name.to_string()),
                    Some((name, "children")) => Section::Children(name.to_string()),
                    Some((_, other)) => {
                        return Err(InventoryError::InvalidIniFormat {
                            line: line_no,
                            message: format!("unknown section suffix ':{}'", other),
                        })
                    }
                    None => Section::Hosts(header.to_string()),
                };
                let name = match &section {
                    Section::Hosts(n) | Section::Vars(n) | Section::Children(n) => n.clone(),
                };
                self.ensure_group(&name);
                continue;
            }

            match &section {
                Section::Hosts(group) => {
                    let mut tokens = line.split_whitespace();
                    let Some(host_name) = tokens.next() else {
                        continue;
                    };
                    let host = self.ensure_host(host_name);
                    if group != "ungrouped" {
                        host.add_to_group(group.clone());
                    }
                    for token in tokens {
                        let (key, value) = split_assignment(token, line_no)?;
                        host.set_var(key, parse_ini_value(value));
                    }
                    if group != "ungrouped" {
                        self.ensure_group(group).add_host(host_name);
                    }
                }
                Section::Vars(group) => {
                    let (key, value) = split_assignment(line, line_no)?;
                    self.ensure_group(group)
                        .set_var(key.trim(), parse_ini_value(value.trim()));
                }
                Section::Children(group) => {
                    self.ensure_group(line);
                    self.ensure_group(group).add_child(line);
                }
            }
        }

        Ok(())
    }
}

fn split_assignment(token: &str, line: usize) -> InventoryResult<(&str, &str)> {
    token
        .split_once('=')
        .ok_or_else(|| InventoryError::InvalidIniFormat {
            line,
            message: format!("expected key=value, found '{}'", token),
        })
}

/// Parse an INI value with YAML scalar rules (`80` is a number, `true` a bool)
fn parse_ini_value(value: &str) -> Value {
    let unquoted = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')));
    if let Some(s) = unquoted {
        return Value::String(s.to_string());
    }
    serde_yaml::from_str::<Value>(value)
        .ok()
        .filter(|v| !v.is_object() && !v.is_array() && !v.is_null())
        .unwrap_or_else(|| Value::String(value.to_string()))
}

fn looks_like_ini(content: &str) -> bool {
    content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .is_some_and(|l| !l.contains(':'))
}

/// Run an inventory script and return its stdout
fn run_script(path: &Path, args: &[&str]) -> InventoryResult<String> {
    let output = Command::new(path)
        .args(args)
        .output()
        .map_err(|e| InventoryError::DynamicInventoryFailed(e.to_string()))?;

    if !output.status.success() {
        return Err(InventoryError::DynamicInventoryFailed(format!(
            "{} {} exited with {}: {}",
            path.display(),
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn has_data_extension(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml" | "yaml" | "json" | "ini" | "cfg")
    )
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const DYNAMIC: &str = r#"{
        "all": {
            "hosts": ["web1", "web2", "db1"],
            "vars": {"ansible_user": "deploy", "environment": "production"}
        },
        "webservers": {
            "hosts": ["web1", "web2"],
            "vars": {"http_port": 80, "max_clients": 200}
        },
        "databases": {
            "hosts": ["db1"],
            "vars": {"db_port": 5432}
        },
        "production": {
            "children": ["webservers", "databases"]
        },
        "_meta": {
            "hostvars": {
                "web1": {"ansible_host": "192.168.1.10", "server_id": 1},
                "db1": {"ansible_host": "192.168.1.20", "db_role": "primary"}
            }
        }
    }"#;

    #[test]
    fn test_parse_dynamic_json() {
        let inv = Inventory::from_json(DYNAMIC).unwrap();

        assert_eq!(inv.host_count(), 3);
        let web1 = inv.get_host("web1").unwrap();
        assert_eq!(web1.address(), "192.168.1.10");
        assert_eq!(web1.get_var("server_id"), Some(&json!(1)));
        assert!(web1.in_group("webservers"));

        let prod = inv.get_group("production").unwrap();
        assert!(prod.has_child("webservers"));
        assert!(inv.get_group("databases").unwrap().has_parent("production"));
        assert_eq!(
            inv.get_group("all").unwrap().get_var("environment"),
            Some(&json!("production"))
        );
        // hosts listed only under `all` and other groups are not ungrouped
        assert!(!inv.get_group("ungrouped").unwrap().has_host("web1"));
    }

    #[test]
    fn test_parse_json_shorthand_host_list() {
        let inv = Inventory::from_json(r#"{"cache": ["redis1", "redis2"]}"#).unwrap();
        assert_eq!(inv.get_group("cache").unwrap().hosts.len(), 2);
    }

    #[test]
    fn test_parse_yaml() {
        let inv = Inventory::from_yaml(
            r#"
all:
  vars:
    ntp: pool.ntp.org
  hosts:
    bastion:
  children:
    web:
      vars:
        env: staging
      hosts:
        web1:
          ansible_host: 10.0.0.1
      children:
        web_prod:
          vars:
            env: production
          hosts:
            web2:
"#,
        )
        .unwrap();

        assert_eq!(inv.host_count(), 3);
        assert_eq!(inv.get_host("web1").unwrap().address(), "10.0.0.1");
        assert!(inv.get_group("web_prod").unwrap().has_parent("web"));
        assert_eq!(
            inv.get_group("web_prod").unwrap().get_var("env"),
            Some(&json!("production"))
        );
        assert!(inv.get_group("ungrouped").unwrap().has_host("bastion"));
        let order: Vec<_> = inv.group_names().map(String::as_str).collect();
        assert_eq!(order, vec!["all", "ungrouped", "web", "web_prod"]);
    }

    #[test]
    fn test_parse_ini() {
        let inv = Inventory::from_ini(
            r#"
bastion

[webservers]
web1 ansible_host=10.0.0.1 http_port=8080
web2 ansible_host=10.0.0.2

[databases]
db1 ansible_host=10.0.0.10

[webservers:vars]
http_port=80
proxy="on"

[production:children]
webservers
databases
"#,
        )
        .unwrap();

        assert_eq!(inv.host_count(), 4);
        let web = inv.get_group("webservers").unwrap();
        assert!(web.has_host("web1"));
        assert_eq!(web.get_var("http_port"), Some(&json!(80)));
        assert_eq!(web.get_var("proxy"), Some(&json!("on")));
        assert_eq!(
            inv.get_host("web1").unwrap().get_var("http_port"),
            Some(&json!(8080))
        );
        assert!(inv.get_group("production").unwrap().has_child("databases"));
        assert!(inv.get_group("ungrouped").unwrap().has_host("bastion"));
    }

    #[test]
    fn test_parse_ini_rejects_bad_header() {
        let err = Inventory::from_ini("[web:bogus]\nweb1\n").unwrap_err();
        assert!(matches!(err, InventoryError::InvalidIniFormat { line: 1, .. }));
    }

    #[test]
    fn test_load_directory_with_vars() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("hosts.yml"),
            "all:\n  children:\n    web:\n      hosts:\n        web1:\n",
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("group_vars")).unwrap();
        std::fs::write(dir.path().join("group_vars").join("web.yml"), "port: 80\n").unwrap();

        let inv = Inventory::load(dir.path()).unwrap();
        assert!(inv.get_host("web1").is_some());
        assert_eq!(inv.vars_files().group("web").unwrap()["port"], json!(80));
    }

    #[cfg(unix)]
    #[test]
    fn test_load_dynamic_script() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("inventory.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nif [ \"$1\" = \"--list\" ]; then\n  echo '{\"web\": {\"hosts\": [\"web1\"]}, \"_meta\": {\"hostvars\": {\"web1\": {\"port\": 81}}}}'\nfi\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let inv = Inventory::load(&script).unwrap();
        assert_eq!(inv.get_host("web1").unwrap().get_var("port"), Some(&json!(81)));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_dynamic_script() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("broken");
        std::fs::write(&script, "#!/bin/sh\necho nope >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(
            Inventory::load(&script),
            Err(InventoryError::DynamicInventoryFailed(_))
        ));
    }
}
