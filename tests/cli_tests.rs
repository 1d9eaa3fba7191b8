//! The `steward` binary: subcommands, output formats and exit codes.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A scratch project: an inventory whose hosts are rooted in the tempdir
struct Project {
    dir: TempDir,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("hosts");
        let inventory = format!(
            r#"
all:
  vars:
    region: eu
  children:
    web:
      vars:
        port: 80
      hosts:
        web1:
          steward_root: {root}/web1
        web2:
          steward_root: {root}/web2
          port: 8080
    db:
      hosts:
        db1:
          steward_root: {root}/db1
"#,
            root = root.display()
        );
        std::fs::write(dir.path().join("inventory.yml"), inventory).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn host_file(&self, host: &str, path: &str) -> PathBuf {
        self.dir.path().join("hosts").join(host).join(path)
    }

    fn steward(&self) -> Command {
        let mut cmd = Command::cargo_bin("steward").unwrap();
        cmd.current_dir(self.dir.path())
            .env("HOME", self.dir.path())
            .env_remove("STEWARD_CONFIG")
            .env_remove("RUST_LOG")
            .arg("--no-color")
            .arg("-i")
            .arg(self.path("inventory.yml"));
        cmd
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[test]
fn test_version() {
    Command::cargo_bin("steward")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_run_converges_and_reports() {
    let project = Project::new();
    let playbook = project.write(
        "site.yml",
        r#"
- name: web config
  hosts: web
  tasks:
    - name: write config
      copy:
        dest: /etc/app.conf
        content: "port={{ port }} region={{ region }}\n"
"#,
    );

    project
        .steward()
        .arg("run")
        .arg(&playbook)
        .assert()
        .success()
        .stdout(predicate::str::contains("PLAY RECAP"))
        .stdout(predicate::str::contains("changed: [write config]"));

    assert_eq!(read(&project.host_file("web1", "etc/app.conf")), "port=80 region=eu\n");
    assert_eq!(read(&project.host_file("web2", "etc/app.conf")), "port=8080 region=eu\n");
    assert!(!project.host_file("db1", "etc/app.conf").exists());

    // A second run changes nothing
    project
        .steward()
        .arg("run")
        .arg(&playbook)
        .assert()
        .success()
        .stdout(predicate::str::contains("ok: [write config]"))
        .stdout(predicate::str::contains("changed: [write config]").not());
}

#[test]
fn test_check_mode_writes_nothing() {
    let project = Project::new();
    let playbook = project.write(
        "site.yml",
        "- hosts: web1\n  tasks:\n    - copy:\n        dest: /etc/app.conf\n        content: x\n",
    );

    project
        .steward()
        .arg("--check")
        .arg("run")
        .arg(&playbook)
        .assert()
        .success();
    assert!(!project.host_file("web1", "etc/app.conf").exists());
}

#[test]
fn test_extra_vars_flag() {
    let project = Project::new();
    let playbook = project.write(
        "site.yml",
        "- hosts: web1\n  tasks:\n    - copy:\n        dest: /port\n        content: \"port={{ port }}\"\n",
    );

    project
        .steward()
        .args(["-e", "port=9000", "run"])
        .arg(&playbook)
        .assert()
        .success();
    assert_eq!(read(&project.host_file("web1", "port")), "port=9000");
}

#[test]
fn test_failed_task_exits_two() {
    let project = Project::new();
    let playbook = project.write(
        "site.yml",
        "- hosts: web1\n  tasks:\n    - name: break\n      command: exit 7\n",
    );

    project
        .steward()
        .arg("run")
        .arg(&playbook)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("failed: [break]"));
}

#[test]
fn test_missing_playbook_exits_four() {
    let project = Project::new();
    project
        .steward()
        .arg("run")
        .arg(project.path("absent.yml"))
        .assert()
        .code(4)
        .stderr(predicate::str::contains("[ERROR]"));
}

#[test]
fn test_missing_inventory_exits_five() {
    let project = Project::new();
    let playbook = project.write("site.yml", "- hosts: all\n  tasks: []\n");

    Command::cargo_bin("steward")
        .unwrap()
        .current_dir(project.dir.path())
        .env("HOME", project.dir.path())
        .args(["--no-color", "-i", "nowhere.yml", "run"])
        .arg(&playbook)
        .assert()
        .code(5);
}

#[test]
fn test_json_run_report() {
    let project = Project::new();
    let playbook = project.write(
        "site.yml",
        "- hosts: db\n  tasks:\n    - debug:\n        msg: hello\n",
    );

    let output = project
        .steward()
        .args(["--output", "json", "run"])
        .arg(&playbook)
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["plays"][0]["hosts"][0]["host"], "db1");
    assert_eq!(report["plays"][0]["hosts"][0]["tasks"][0]["msg"], "hello");
}

#[test]
fn test_list_hosts() {
    let project = Project::new();
    project
        .steward()
        .args(["list-hosts", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hosts (2):"))
        .stdout(predicate::str::contains("web1"))
        .stdout(predicate::str::contains("db1").not());

    project
        .steward()
        .args(["--limit", "web2", "list-hosts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hosts (1):"));
}

#[test]
fn test_vars_json() {
    let project = Project::new();
    let output = project
        .steward()
        .args(["--output", "json", "vars", "web2"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let vars: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(vars["port"], 8080);
    assert_eq!(vars["region"], "eu");
    assert_eq!(vars["inventory_hostname"], "web2");
}

#[test]
fn test_vars_unknown_host() {
    let project = Project::new();
    project.steward().args(["vars", "nosuch"]).assert().code(5);
}

#[test]
fn test_graph() {
    let project = Project::new();
    project
        .steward()
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::contains("@all:"))
        .stdout(predicate::str::contains("@web:"))
        .stdout(predicate::str::contains("--db1"));

    project.steward().args(["graph", "nosuch"]).assert().code(5);
}
