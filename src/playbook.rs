//! Playbook loading.
//!
//! A playbook is a YAML list of plays. Each task names its module by key
//! (`copy: {...}`) next to the task keywords:
//!
//! ```yaml
//! - name: Configure web servers
//!   hosts: web
//!   serial: 2
//!   roles:
//!     - common
//!   tasks:
//!     - name: Write config
//!       copy:
//!         dest: /etc/app.conf
//!         content: "port={{ port }}\n"
//!       notify: restart app
//!   handlers:
//!     - name: restart app
//!       command: systemctl restart app
//! ```
//!
//! Roles are read from `roles/<name>/{defaults,vars,tasks,handlers}/main.yml`
//! next to the playbook. Module names are checked here; module parameters
//! are checked per host once they are rendered.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::modules::ModuleSpec;
use crate::template::TemplateEngine;
use crate::vars::{load_vars_file, HashBehaviour, PlayScopes, Vars, VarsDirectory};

/// Deserialize yes/no/true/false/1/0 as a bool
fn deserialize_flexible_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "yes" | "true" | "on" | "1" => Ok(true),
            "no" | "false" | "off" | "0" | "" => Ok(false),
            _ => Err(D::Error::custom(format!("invalid boolean string: {}", s))),
        },
        Value::Number(n) => n
            .as_i64()
            .map(|i| i != 0)
            .ok_or_else(|| D::Error::custom("invalid boolean number")),
        Value::Null => Ok(false),
        _ => Err(D::Error::custom(format!("invalid boolean value: {}", value))),
    }
}

/// A loaded playbook
#[derive(Debug, Clone, Default)]
pub struct Playbook {
    /// Name of the playbook (file stem)
    pub name: String,
    /// Path to the playbook file
    pub path: Option<PathBuf>,
    /// Directory roles and vars files are looked up in
    pub base_dir: PathBuf,
    /// `group_vars/` and `host_vars/` next to the playbook
    pub vars_dir: VarsDirectory,
    pub plays: Vec<Play>,
}

impl Playbook {
    /// Load a playbook from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::playbook_parse(path, format!("cannot read: {}", e)))?;
        Self::parse(&content, Some(path))
    }

    /// Parse a playbook. Roles and vars files resolve against the playbook's
    /// directory, or the current directory without a path.
    pub fn parse(content: &str, path: Option<&Path>) -> Result<Self> {
        let origin = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("<inline>"));
        let base_dir = path
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let definitions: Option<Vec<PlayDefinition>> = serde_yaml::from_str(content)
            .map_err(|e| Error::playbook_parse(&origin, e.to_string()))?;

        let mut plays = Vec::new();
        for def in definitions.unwrap_or_default() {
            plays.push(Play::from_definition(def, &base_dir, &origin)?);
        }

        let name = path
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "playbook".to_string());

        Ok(Self {
            name,
            path: path.map(Path::to_path_buf),
            vars_dir: VarsDirectory::load(&base_dir)?,
            base_dir,
            plays,
        })
    }

    /// Total number of tasks across plays, roles included
    pub fn task_count(&self) -> usize {
        self.plays.iter().map(|p| p.all_tasks().count()).sum()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlayDefinition {
    #[serde(default)]
    name: String,
    #[serde(default = "default_hosts")]
    hosts: String,
    #[serde(default)]
    vars: Option<Vars>,
    #[serde(default)]
    vars_files: Vec<String>,
    #[serde(default)]
    roles: Vec<RoleDefinition>,
    #[serde(default)]
    tasks: Option<Vec<TaskDefinition>>,
    #[serde(default)]
    handlers: Option<Vec<TaskDefinition>>,
    #[serde(default)]
    serial: Option<SerialSpec>,
    #[serde(default, deserialize_with = "deserialize_flexible_bool")]
    force_handlers: bool,
}

fn default_hosts() -> String {
    "all".to_string()
}

/// Role reference in a play: a bare name, or a name with parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RoleDefinition {
    Name(String),
    Full {
        #[serde(alias = "name")]
        role: String,
        #[serde(default)]
        vars: Vars,
        #[serde(flatten)]
        params: Vars,
    },
}

/// `when` as a single expression, a bool or a list of expressions
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WhenCondition {
    Bool(bool),
    Single(String),
    List(Vec<String>),
}

impl WhenCondition {
    fn into_vec(self) -> Vec<String> {
        match self {
            WhenCondition::Bool(b) => vec![b.to_string()],
            WhenCondition::Single(s) => vec![s],
            WhenCondition::List(list) => list,
        }
    }
}

/// `notify` / `listen` as a single name or a list
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
enum NameList {
    #[default]
    None,
    Single(String),
    List(Vec<String>),
}

impl NameList {
    fn into_vec(self) -> Vec<String> {
        match self {
            NameList::None => vec![],
            NameList::Single(s) => vec![s],
            NameList::List(list) => list,
        }
    }
}

/// Task timeout as seconds or a humantime string (`"90s"`, `"2m"`)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TimeoutValue {
    Seconds(f64),
    Human(#[serde(with = "humantime_serde")] Duration),
}

impl TimeoutValue {
    fn into_duration(self) -> std::result::Result<Duration, String> {
        match self {
            TimeoutValue::Seconds(s) if s.is_finite() && s > 0.0 => Ok(Duration::from_secs_f64(s)),
            TimeoutValue::Seconds(s) => Err(format!("timeout must be positive, got {}", s)),
            TimeoutValue::Human(d) => Ok(d),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TaskDefinition {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    when: Option<WhenCondition>,
    #[serde(default)]
    notify: NameList,
    #[serde(default)]
    listen: NameList,
    #[serde(default, deserialize_with = "deserialize_flexible_bool")]
    ignore_errors: bool,
    #[serde(default)]
    register: Option<String>,
    #[serde(default)]
    vars: Option<Vars>,
    #[serde(default)]
    timeout: Option<TimeoutValue>,
    /// The module key and its arguments; anything else is an error
    #[serde(flatten)]
    module: IndexMap<String, Value>,
}

/// A single task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub name: String,
    /// Module name as written (`shell` stays `shell`)
    pub module: String,
    /// Raw, unrendered module arguments
    pub args: Value,
    /// Guard expressions; all must hold
    pub when: Vec<String>,
    /// Handler names or topics to notify on change
    pub notify: Vec<String>,
    pub ignore_errors: bool,
    pub register: Option<String>,
    /// Task-level variables
    pub vars: Vars,
    /// Deadline for the module's apply step
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Role the task came from
    pub role: Option<String>,
}

impl Task {
    /// A task running `module` with `args`
    pub fn new(name: impl Into<String>, module: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            args,
            when: Vec::new(),
            notify: Vec::new(),
            ignore_errors: false,
            register: None,
            vars: Vars::new(),
            timeout: None,
            role: None,
        }
    }

    pub fn with_when(mut self, expression: impl Into<String>) -> Self {
        self.when.push(expression.into());
        self
    }

    pub fn with_notify(mut self, handler: impl Into<String>) -> Self {
        self.notify.push(handler.into());
        self
    }

    pub fn with_register(mut self, name: impl Into<String>) -> Self {
        self.register = Some(name.into());
        self
    }

    pub fn with_ignore_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Name shown in output, prefixed with the role
    pub fn display_name(&self) -> String {
        let name = if self.name.is_empty() {
            self.module.as_str()
        } else {
            self.name.as_str()
        };
        match &self.role {
            Some(role) => format!("{} : {}", role, name),
            None => name.to_string(),
        }
    }

    fn from_definition(def: TaskDefinition, origin: &Path) -> Result<(Self, Vec<String>)> {
        let mut module = def.module.into_iter();
        let (module_name, args) = match (module.next(), module.next()) {
            (Some(entry), None) => entry,
            (None, _) => {
                return Err(Error::playbook_parse(
                    origin,
                    format!("task '{}' names no module", def.name.unwrap_or_default()),
                ))
            }
            (Some((first, _)), Some((second, _))) => {
                return Err(Error::playbook_parse(
                    origin,
                    format!(
                        "task '{}' has more than one module or unknown keys: '{}', '{}'",
                        def.name.unwrap_or_default(),
                        first,
                        second
                    ),
                ))
            }
        };

        if !ModuleSpec::is_known(&module_name) {
            return Err(Error::ModuleNotFound(module_name));
        }
        // Arguments with no templates can be checked now
        if !TemplateEngine::value_has_template(&args) {
            ModuleSpec::from_args(&module_name, &args)
                .map_err(|e| Error::module_args(&module_name, e.to_string()))?;
        }

        let timeout = def
            .timeout
            .map(TimeoutValue::into_duration)
            .transpose()
            .map_err(|msg| Error::playbook_parse(origin, msg))?;

        let task = Task {
            name: def.name.unwrap_or_default(),
            module: module_name,
            args,
            when: def.when.map(WhenCondition::into_vec).unwrap_or_default(),
            notify: def.notify.into_vec(),
            ignore_errors: def.ignore_errors,
            register: def.register,
            vars: def.vars.unwrap_or_default(),
            timeout,
            role: None,
        };
        Ok((task, def.listen.into_vec()))
    }
}

/// A task that runs only when notified
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Handler {
    pub task: Task,
    /// Topics this handler also answers to
    pub listen: Vec<String>,
}

impl Handler {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            listen: Vec::new(),
        }
    }

    pub fn with_listen(mut self, topic: impl Into<String>) -> Self {
        self.listen.push(topic.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.task.name
    }

    /// Whether notifying `name` triggers this handler
    pub fn answers_to(&self, name: &str) -> bool {
        self.task.name == name || self.listen.iter().any(|l| l == name)
    }
}

/// How many hosts run at a time: a count, a percentage, or a list of
/// either where the last entry repeats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SerialSpec {
    Fixed(usize),
    Percentage(String),
    Progressive(Vec<SerialSpec>),
}

impl SerialSpec {
    /// Resolve one entry to a batch size for `total` hosts
    fn size_for(&self, total: usize) -> Result<usize> {
        let size = match self {
            SerialSpec::Fixed(n) => *n,
            SerialSpec::Percentage(p) => {
                let trimmed = p.trim();
                match trimmed.strip_suffix('%') {
                    Some(pct) => {
                        let pct: f64 = pct.trim().parse().map_err(|_| {
                            Error::Config(format!("invalid serial percentage '{}'", p))
                        })?;
                        let size = ((total as f64) * pct / 100.0).floor() as usize;
                        return Ok(size.clamp(1, total.max(1)));
                    }
                    None => trimmed
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid serial value '{}'", p)))?,
                }
            }
            SerialSpec::Progressive(_) => {
                return Err(Error::Config("serial lists cannot be nested".to_string()))
            }
        };
        let size = if size == 0 { total } else { size };
        Ok(size.clamp(1, total.max(1)))
    }

    /// Split `total` hosts into consecutive batch sizes
    pub fn batch_sizes(&self, total: usize) -> Result<Vec<usize>> {
        let steps: Vec<&SerialSpec> = match self {
            SerialSpec::Progressive(list) if !list.is_empty() => list.iter().collect(),
            SerialSpec::Progressive(_) => return Ok(vec![total]),
            single => vec![single],
        };

        let mut sizes = Vec::new();
        let mut remaining = total;
        let mut step = 0;
        while remaining > 0 {
            let spec = steps[step.min(steps.len() - 1)];
            let size = spec.size_for(total)?.min(remaining);
            sizes.push(size);
            remaining -= size;
            step += 1;
        }
        Ok(sizes)
    }
}

/// A role's loaded content
#[derive(Debug, Clone, Default)]
pub struct Role {
    pub name: String,
    pub defaults: Vars,
    pub vars: Vars,
    /// Parameters given where the role is listed
    pub params: Vars,
    pub tasks: Vec<Task>,
    pub handlers: Vec<Handler>,
}

impl Role {
    /// Load `roles/<name>/` under `base_dir`
    pub fn load(base_dir: &Path, name: &str, params: Vars) -> Result<Self> {
        let dir = base_dir.join("roles").join(name);
        if !dir.is_dir() {
            return Err(Error::RoleNotFound(name.to_string()));
        }
        debug!(role = %name, path = %dir.display(), "Loading role");

        let defaults = load_role_vars(&dir, "defaults")?;
        let vars = load_role_vars(&dir, "vars")?;
        let mut tasks = Vec::new();
        for (mut task, _) in load_role_tasks(&dir, "tasks")? {
            task.role = Some(name.to_string());
            tasks.push(task);
        }
        let mut handlers = Vec::new();
        for (mut task, listen) in load_role_tasks(&dir, "handlers")? {
            task.role = Some(name.to_string());
            handlers.push(Handler { task, listen });
        }

        Ok(Self {
            name: name.to_string(),
            defaults,
            vars,
            params,
            tasks,
            handlers,
        })
    }
}

fn role_main(dir: &Path, section: &str) -> Option<PathBuf> {
    ["main.yml", "main.yaml"]
        .iter()
        .map(|f| dir.join(section).join(f))
        .find(|p| p.is_file())
}

fn load_role_vars(dir: &Path, section: &str) -> Result<Vars> {
    match role_main(dir, section) {
        Some(path) => load_vars_file(path),
        None => Ok(Vars::new()),
    }
}

fn load_role_tasks(dir: &Path, section: &str) -> Result<Vec<(Task, Vec<String>)>> {
    let Some(path) = role_main(dir, section) else {
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(&path)?;
    let defs: Option<Vec<TaskDefinition>> =
        serde_yaml::from_str(&content).map_err(|e| Error::playbook_parse(&path, e.to_string()))?;
    defs.unwrap_or_default()
        .into_iter()
        .map(|def| Task::from_definition(def, &path))
        .collect()
}

/// A play within a playbook
#[derive(Debug, Clone, Default)]
pub struct Play {
    pub name: String,
    /// Host pattern
    pub hosts: String,
    pub vars: Vars,
    /// `vars_files` as written
    pub vars_files: Vec<String>,
    /// Merged content of `vars_files`
    pub vars_files_vars: Vars,
    pub roles: Vec<Role>,
    pub tasks: Vec<Task>,
    pub handlers: Vec<Handler>,
    pub serial: Option<SerialSpec>,
    /// Run notified handlers even on hosts that aborted
    pub force_handlers: bool,
}

impl Play {
    pub fn new(name: impl Into<String>, hosts: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: hosts.into(),
            ..Default::default()
        }
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_serial(mut self, serial: SerialSpec) -> Self {
        self.serial = Some(serial);
        self
    }

    fn from_definition(def: PlayDefinition, base_dir: &Path, origin: &Path) -> Result<Self> {
        let mut vars_files_vars = Vars::new();
        for file in &def.vars_files {
            let path = base_dir.join(file);
            let loaded = load_vars_file(&path).map_err(|e| {
                Error::playbook_parse(origin, format!("vars_files entry '{}': {}", file, e))
            })?;
            vars_files_vars.extend(loaded);
        }

        let mut roles = Vec::new();
        for role in def.roles {
            let (name, params) = match role {
                RoleDefinition::Name(name) => (name, Vars::new()),
                RoleDefinition::Full {
                    role,
                    mut vars,
                    params,
                } => {
                    vars.extend(params);
                    (role, vars)
                }
            };
            roles.push(Role::load(base_dir, &name, params)?);
        }

        let tasks = def
            .tasks
            .unwrap_or_default()
            .into_iter()
            .map(|t| Task::from_definition(t, origin).map(|(task, _)| task))
            .collect::<Result<Vec<_>>>()?;

        let handlers = def
            .handlers
            .unwrap_or_default()
            .into_iter()
            .map(|t| Task::from_definition(t, origin).map(|(task, listen)| Handler { task, listen }))
            .collect::<Result<Vec<_>>>()?;

        if let Some(serial) = &def.serial {
            serial.batch_sizes(1)?;
        }

        Ok(Self {
            name: def.name,
            hosts: def.hosts,
            vars: def.vars.unwrap_or_default(),
            vars_files: def.vars_files,
            vars_files_vars,
            roles,
            tasks,
            handlers,
            serial: def.serial,
            force_handlers: def.force_handlers,
        })
    }

    /// Role tasks first, then the play's own tasks
    pub fn all_tasks(&self) -> impl Iterator<Item = &Task> {
        self.roles
            .iter()
            .flat_map(|r| r.tasks.iter())
            .chain(self.tasks.iter())
    }

    /// Role handlers first, then the play's own, in declaration order
    pub fn all_handlers(&self) -> Vec<Handler> {
        self.roles
            .iter()
            .flat_map(|r| r.handlers.iter())
            .chain(self.handlers.iter())
            .cloned()
            .collect()
    }

    /// The play-level variable scopes for this play
    pub fn scopes(&self, playbook: &Playbook, extra_vars: &Vars, hash: HashBehaviour) -> PlayScopes {
        let mut scopes = PlayScopes {
            playbook_vars: playbook.vars_dir.clone(),
            play_vars: self.vars.clone(),
            vars_files: self.vars_files_vars.clone(),
            extra_vars: extra_vars.clone(),
            ..Default::default()
        };
        for role in &self.roles {
            hash.overlay_all(&mut scopes.role_defaults, &role.defaults);
            hash.overlay_all(&mut scopes.role_vars, &role.vars);
            hash.overlay_all(&mut scopes.role_params, &role.params);
        }
        scopes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_play() {
        let playbook = Playbook::parse(
            r#"
- name: web
  hosts: web
  serial: 2
  vars:
    port: 80
  tasks:
    - name: write config
      copy:
        dest: /etc/app.conf
        content: "port={{ port }}"
      notify: restart
      when:
        - port is defined
        - port > 0
    - command: uptime
      register: up
      ignore_errors: yes
      timeout: 30
  handlers:
    - name: restart
      listen: app changed
      command: systemctl restart app
"#,
            None,
        )
        .unwrap();

        assert_eq!(playbook.plays.len(), 1);
        let play = &playbook.plays[0];
        assert_eq!(play.hosts, "web");
        assert_eq!(play.serial, Some(SerialSpec::Fixed(2)));
        assert_eq!(play.tasks[0].notify, vec!["restart"]);
        assert_eq!(play.tasks[0].when.len(), 2);
        assert_eq!(play.tasks[1].module, "command");
        assert_eq!(play.tasks[1].args, json!("uptime"));
        assert!(play.tasks[1].ignore_errors);
        assert_eq!(play.tasks[1].timeout, Some(Duration::from_secs(30)));
        assert_eq!(play.tasks[1].display_name(), "command");
        assert!(play.handlers[0].answers_to("app changed"));
        assert!(play.handlers[0].answers_to("restart"));
    }

    #[test]
    fn test_unknown_module_rejected_at_load() {
        let err = Playbook::parse("- hosts: all\n  tasks:\n    - apt: {name: nginx}\n", None)
            .unwrap_err();
        assert!(matches!(err, Error::ModuleNotFound(name) if name == "apt"));
    }

    #[test]
    fn test_static_args_checked_at_load() {
        let err = Playbook::parse(
            "- hosts: all\n  tasks:\n    - file: {path: /x, state: sideways}\n",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ModuleArgs { .. }));
    }

    #[test]
    fn test_unknown_task_key_rejected() {
        let err = Playbook::parse(
            "- hosts: all\n  tasks:\n    - debug: {msg: hi}\n      loop: [1, 2]\n",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::PlaybookParse { .. }));
    }

    #[test]
    fn test_timeout_accepts_humantime() {
        let playbook = Playbook::parse(
            "- hosts: all\n  tasks:\n    - pause: {seconds: 1}\n      timeout: 2m\n",
            None,
        )
        .unwrap();
        assert_eq!(playbook.plays[0].tasks[0].timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_serial_batches() {
        assert_eq!(SerialSpec::Fixed(2).batch_sizes(5).unwrap(), vec![2, 2, 1]);
        assert_eq!(
            SerialSpec::Percentage("50%".into()).batch_sizes(5).unwrap(),
            vec![2, 2, 1]
        );
        assert_eq!(
            SerialSpec::Progressive(vec![SerialSpec::Fixed(1), SerialSpec::Percentage("50%".into())])
                .batch_sizes(6)
                .unwrap(),
            vec![1, 3, 2]
        );
        assert_eq!(SerialSpec::Fixed(0).batch_sizes(3).unwrap(), vec![3]);
        assert_eq!(SerialSpec::Percentage("1%".into()).batch_sizes(3).unwrap(), vec![1, 1, 1]);
        assert!(SerialSpec::Percentage("lots".into()).batch_sizes(3).is_err());
    }

    #[test]
    fn test_roles_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let role = dir.path().join("roles/nginx");
        for section in ["defaults", "vars", "tasks", "handlers"] {
            std::fs::create_dir_all(role.join(section)).unwrap();
        }
        std::fs::write(role.join("defaults/main.yml"), "port: 80\nworkers: 2\n").unwrap();
        std::fs::write(role.join("vars/main.yml"), "user: www\n").unwrap();
        std::fs::write(
            role.join("tasks/main.yml"),
            "- name: config\n  copy: {dest: /etc/nginx.conf, content: x}\n  notify: reload nginx\n",
        )
        .unwrap();
        std::fs::write(
            role.join("handlers/main.yml"),
            "- name: reload nginx\n  command: nginx -s reload\n",
        )
        .unwrap();
        let path = dir.path().join("site.yml");
        std::fs::write(
            &path,
            "- hosts: all\n  roles:\n    - role: nginx\n      workers: 8\n  tasks:\n    - debug: {msg: done}\n",
        )
        .unwrap();

        let playbook = Playbook::load(&path).unwrap();
        assert_eq!(playbook.name, "site");
        let play = &playbook.plays[0];
        let names: Vec<String> = play.all_tasks().map(Task::display_name).collect();
        assert_eq!(names, vec!["nginx : config", "debug"]);
        assert_eq!(play.all_handlers()[0].name(), "reload nginx");

        let scopes = play.scopes(&playbook, &Vars::new(), HashBehaviour::Replace);
        assert_eq!(scopes.role_defaults["port"], json!(80));
        assert_eq!(scopes.role_vars["user"], json!("www"));
        assert_eq!(scopes.role_params["workers"], json!(8));
    }

    #[test]
    fn test_missing_role() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.yml");
        std::fs::write(&path, "- hosts: all\n  roles: [ghost]\n").unwrap();
        assert!(matches!(Playbook::load(&path), Err(Error::RoleNotFound(_))));
    }
}
