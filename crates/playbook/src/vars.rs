//! Variable resolution for playbook execution.
//!
//! Three namespaces, looked up in order (first match wins):
//! 1. user variables from the playbook's `variables:` section
//! 2. built-ins (platform, arch, cross-platform paths, ...)
//! 3. registered task results, addressed as `name.property`
//!
//! Substitution understands two forms:
//! - `${NAME}` — process environment variable; left intact when undefined
//! - `{{ expr }}` — `env.NAME`, `task.property`, or a plain variable name
//!
//! Substitution is applied left-to-right and is not recursive.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::VariableError;
use crate::types::{self, Params, TaskResult};

/// `{{ variable }}` — playbook variables, built-ins, task results.
static VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_.]*)\s*\}\}").unwrap());

/// `${ENV_VAR}` — direct environment references.
static ENV_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\}").unwrap());

/// Variable context for a single playbook execution.
///
/// Mutated only by the owning executor: user variables are seeded once at
/// startup, task results are added as tasks register them. Handlers get a
/// shared read view.
#[derive(Debug, Default)]
pub struct Variables {
    user_vars: HashMap<String, String>,
    task_results: HashMap<String, TaskResult>,
    builtins: HashMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        let mut vars = Variables::default();
        vars.init_builtins();
        vars
    }

    fn init_builtins(&mut self) {
        let b = &mut self.builtins;
        b.insert("platform".into(), types::current_platform().to_string());
        b.insert("arch".into(), std::env::consts::ARCH.to_string());
        b.insert("os_family".into(), os_family().to_string());
        if let Some(hostname) = hostname() {
            b.insert("hostname".into(), hostname);
        }

        b.insert("user_home".into(), dir_string(dirs::home_dir()));
        b.insert("user_config".into(), dir_string(dirs::config_dir()));
        b.insert("user_cache".into(), dir_string(dirs::cache_dir()));
        b.insert("system_config".into(), system_config().to_string());
        b.insert(
            "temp_dir".into(),
            std::env::temp_dir().to_string_lossy().into_owned(),
        );
        b.insert("path_sep".into(), std::path::MAIN_SEPARATOR.to_string());
    }

    /// Seed variables from the playbook's `variables:` section.
    ///
    /// `${NAME}` environment references inside values are expanded now, at
    /// load time, so later substitutions see the resolved text.
    pub fn set_user_vars(&mut self, vars: &HashMap<String, String>) {
        for (key, value) in vars {
            let resolved = resolve_env_vars(value);
            self.user_vars.insert(key.clone(), resolved);
        }
    }

    /// Set a single user variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.user_vars.insert(name.into(), value.into());
    }

    /// Store a task result under its `register:` name.
    pub fn set_task_result(&mut self, name: &str, result: &TaskResult) {
        self.task_results.insert(name.to_string(), result.clone());
    }

    /// Look up a variable: user vars first, then built-ins.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.user_vars
            .get(name)
            .or_else(|| self.builtins.get(name))
            .map(String::as_str)
    }

    /// Look up a registered task result.
    pub fn task_result(&self, name: &str) -> Option<&TaskResult> {
        self.task_results.get(name)
    }

    /// Replace all variable references in a string.
    ///
    /// An unknown `{{ name }}` is an error; unknown environment references
    /// are left intact.
    pub fn substitute(&self, input: &str) -> Result<String, VariableError> {
        let resolved = resolve_env_vars(input);

        let mut last_err: Option<VariableError> = None;
        let result = VAR_PATTERN.replace_all(&resolved, |caps: &regex::Captures<'_>| {
            let name = &caps[1];

            // {{ env.VAR }}
            if let Some(env_name) = name.strip_prefix("env.") {
                return match std::env::var(env_name) {
                    Ok(val) if !val.is_empty() => val,
                    _ => caps[0].to_string(),
                };
            }

            // {{ task.property }}
            if let Some((task, property)) = name.split_once('.') {
                if let Some(result) = self.task_results.get(task) {
                    return match task_result_property(result, property) {
                        Ok(val) => val,
                        Err(err) => {
                            last_err = Some(err);
                            caps[0].to_string()
                        }
                    };
                }
            }

            // {{ name }}
            match self.get(name) {
                Some(val) => val.to_string(),
                None => {
                    last_err = Some(VariableError::NotFound(name.to_string()));
                    caps[0].to_string()
                }
            }
        });

        match last_err {
            Some(err) => Err(err),
            None => Ok(result.into_owned()),
        }
    }

    /// Substitute variables in every string leaf of a parameter map,
    /// recursing through nested mappings and sequences. Non-string scalars
    /// pass through untouched.
    pub fn substitute_map(&self, params: &Params) -> Result<Params, VariableError> {
        let mut result = Params::with_capacity(params.len());
        for (key, value) in params {
            result.insert(key.clone(), self.substitute_value(value)?);
        }
        Ok(result)
    }

    fn substitute_value(
        &self,
        value: &serde_yaml::Value,
    ) -> Result<serde_yaml::Value, VariableError> {
        use serde_yaml::Value;
        Ok(match value {
            Value::String(s) => Value::String(self.substitute(s)?),
            Value::Sequence(items) => Value::Sequence(
                items
                    .iter()
                    .map(|item| self.substitute_value(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Mapping(map) => {
                let mut out = serde_yaml::Mapping::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.substitute_value(v)?);
                }
                Value::Mapping(out)
            }
            other => other.clone(),
        })
    }
}

/// Extract a property from a task result for substitution and conditions.
pub fn task_result_property(result: &TaskResult, property: &str) -> Result<String, VariableError> {
    match property {
        "stdout" => Ok(result.stdout.clone()),
        "stderr" => Ok(result.stderr.clone()),
        "exit_code" => Ok(result.exit_code.to_string()),
        "status" => Ok(result.status.to_string()),
        "changed" => Ok(result.changed.to_string()),
        _ => Err(VariableError::UnknownProperty {
            task: result.task_name.clone(),
            property: property.to_string(),
        }),
    }
}

/// Resolve `${ENV_VAR}` references, leaving undefined ones intact.
fn resolve_env_vars(input: &str) -> String {
    ENV_PATTERN
        .replace_all(input, |caps: &regex::Captures<'_>| {
            match std::env::var(&caps[1]) {
                Ok(val) if !val.is_empty() => val,
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn dir_string(dir: Option<std::path::PathBuf>) -> String {
    dir.map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn os_family() -> &'static str {
    types::current_platform()
}

fn system_config() -> &'static str {
    if cfg!(windows) { "C:\\ProgramData" } else { "/etc" }
}

fn hostname() -> Option<String> {
    for key in ["HOSTNAME", "COMPUTERNAME"] {
        if let Ok(name) = std::env::var(key) {
            if !name.is_empty() {
                return Some(name);
            }
        }
    }
    let output = std::process::Command::new("hostname").output().ok()?;
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;

    fn vars_with_user(pairs: &[(&str, &str)]) -> Variables {
        let mut vars = Variables::new();
        for (k, v) in pairs {
            vars.set(*k, *v);
        }
        vars
    }

    #[test]
    fn substitutes_user_variables() {
        let vars = vars_with_user(&[("package", "nginx")]);
        assert_eq!(
            vars.substitute("install {{ package }} now").unwrap(),
            "install nginx now"
        );
        // Whitespace inside the braces is tolerated.
        assert_eq!(vars.substitute("{{package}}").unwrap(), "nginx");
        assert_eq!(vars.substitute("{{  package  }}").unwrap(), "nginx");
    }

    #[test]
    fn user_variables_shadow_builtins() {
        let vars = vars_with_user(&[("platform", "custom")]);
        assert_eq!(vars.substitute("{{ platform }}").unwrap(), "custom");
    }

    #[test]
    fn builtin_platform_resolves() {
        let vars = Variables::new();
        assert_eq!(
            vars.substitute("{{ platform }}").unwrap(),
            types::current_platform()
        );
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let vars = Variables::new();
        let err = vars.substitute("{{ no_such_var }}").unwrap_err();
        assert_eq!(err, VariableError::NotFound("no_such_var".into()));
    }

    #[test]
    fn undefined_env_reference_is_left_intact() {
        let vars = Variables::new();
        assert_eq!(
            vars.substitute("x ${DROVER_UNSET_VAR_9317} y").unwrap(),
            "x ${DROVER_UNSET_VAR_9317} y"
        );
        assert_eq!(
            vars.substitute("{{ env.DROVER_UNSET_VAR_9317 }}").unwrap(),
            "{{ env.DROVER_UNSET_VAR_9317 }}"
        );
    }

    #[test]
    fn env_reference_resolves() {
        // PATH exists on every supported platform.
        let vars = Variables::new();
        let direct = vars.substitute("${PATH}").unwrap();
        let templated = vars.substitute("{{ env.PATH }}").unwrap();
        assert!(!direct.contains("${"));
        assert_eq!(direct, templated);
    }

    #[test]
    fn task_result_properties() {
        let mut vars = Variables::new();
        let result = TaskResult {
            task_name: "probe".into(),
            status: TaskStatus::Completed,
            changed: true,
            stdout: "installed".into(),
            exit_code: 0,
            ..Default::default()
        };
        vars.set_task_result("probe", &result);

        assert_eq!(vars.substitute("{{ probe.stdout }}").unwrap(), "installed");
        assert_eq!(vars.substitute("{{ probe.exit_code }}").unwrap(), "0");
        assert_eq!(vars.substitute("{{ probe.status }}").unwrap(), "completed");
        assert_eq!(vars.substitute("{{ probe.changed }}").unwrap(), "true");

        let err = vars.substitute("{{ probe.bogus }}").unwrap_err();
        assert!(matches!(err, VariableError::UnknownProperty { .. }));
    }

    #[test]
    fn user_vars_expand_env_at_seed_time() {
        let mut vars = Variables::new();
        let mut user = HashMap::new();
        user.insert("bin".to_string(), "${PATH}".to_string());
        vars.set_user_vars(&user);
        assert!(!vars.get("bin").unwrap().contains("${"));
    }

    #[test]
    fn substitute_map_walks_nested_structures() {
        let vars = vars_with_user(&[("dir", "/opt/app")]);
        let yaml = r#"
path: "{{ dir }}/conf"
mode: "0644"
count: 3
nested:
  inner: "{{ dir }}"
list:
  - "{{ dir }}/a"
  - 42
"#;
        let params: Params = serde_yaml::from_str(yaml).unwrap();
        let out = vars.substitute_map(&params).unwrap();

        assert_eq!(out["path"].as_str().unwrap(), "/opt/app/conf");
        assert_eq!(out["count"].as_i64().unwrap(), 3);
        assert_eq!(out["nested"]["inner"].as_str().unwrap(), "/opt/app");
        assert_eq!(out["list"][0].as_str().unwrap(), "/opt/app/a");
        assert_eq!(out["list"][1].as_i64().unwrap(), 42);
    }

    #[test]
    fn substitution_is_not_recursive() {
        let vars = vars_with_user(&[("a", "{{ b }}"), ("b", "value")]);
        // One pass only: the expansion of `a` is not itself expanded.
        assert_eq!(vars.substitute("{{ a }}").unwrap(), "{{ b }}");
    }
}
