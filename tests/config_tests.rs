//! Layered configuration: files, `STEWARD_*` environment variables and
//! their order.

use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serial_test::serial;

use steward::config::{Config, LogFormat};
use steward::vars::HashBehaviour;

/// Run `f` with a scratch HOME and the given environment, restoring both after
fn with_env<T>(home: &Path, vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
    let old_home = std::env::var_os("HOME");
    std::env::set_var("HOME", home);
    for (key, value) in vars {
        std::env::set_var(key, value);
    }

    let result = f();

    for (key, _) in vars {
        std::env::remove_var(key);
    }
    match old_home {
        Some(home) => std::env::set_var("HOME", home),
        None => std::env::remove_var("HOME"),
    }
    result
}

#[test]
#[serial]
fn test_explicit_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("site.toml");
    std::fs::write(
        &path,
        "[defaults]\nforks = 12\ninventory = \"hosts.yml\"\n\n[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();

    let config = with_env(dir.path(), &[], || Config::load(Some(&path))).unwrap();
    assert_eq!(config.defaults.forks, 12);
    assert_eq!(config.inventory_path().unwrap(), Path::new("hosts.yml"));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.defaults.timeout, Duration::from_secs(300));
}

#[test]
#[serial]
fn test_explicit_yaml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("site.yaml");
    std::fs::write(&path, "defaults:\n  check_mode: true\n  timeout: 2m\n").unwrap();

    let config = with_env(dir.path(), &[], || Config::load(Some(&path))).unwrap();
    assert!(config.defaults.check_mode);
    assert_eq!(config.defaults.timeout, Duration::from_secs(120));
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = with_env(dir.path(), &[], || Config::load(Some(&path))).unwrap_err();
    assert!(err.to_string().contains("absent.toml"), "{err:#}");
}

#[test]
#[serial]
fn test_user_file_under_project_file() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(
        home.path().join(".steward.toml"),
        "[defaults]\nforks = 3\nhash_behaviour = \"merge\"\n",
    )
    .unwrap();
    let project = home.path().join("project.toml");
    std::fs::write(&project, "[defaults]\nforks = 8\n").unwrap();

    let config = with_env(home.path(), &[], || Config::load(Some(&project))).unwrap();
    assert_eq!(config.defaults.forks, 8);
    assert_eq!(config.defaults.hash_behaviour, HashBehaviour::Merge);
}

#[test]
#[serial]
fn test_environment_beats_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steward.toml");
    std::fs::write(&path, "[defaults]\nforks = 10\n\n[logging]\nformat = \"text\"\n").unwrap();

    let config = with_env(
        dir.path(),
        &[
            ("STEWARD_CONFIG", path.to_str().unwrap()),
            ("STEWARD_FORKS", "2"),
            ("STEWARD_LOG_FORMAT", "json"),
            ("STEWARD_NO_COLOR", "1"),
        ],
        || Config::load(None),
    )
    .unwrap();

    assert_eq!(config.defaults.forks, 2);
    assert_eq!(config.logging.format, LogFormat::Json);
    assert!(!config.colors.enabled);
}

#[test]
#[serial]
fn test_invalid_file_value() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("steward.toml");
    std::fs::write(&path, "[defaults]\nforks = \"lots\"\n").unwrap();
    assert!(with_env(dir.path(), &[], || Config::load(Some(&path))).is_err());
}
