//! Action handlers: the code that realizes a task's intent against the OS.
//!
//! Every handler implements [`ActionHandler`]: a platform capability list,
//! pure parameter validation, and an execute step. Handlers are idempotent —
//! they inspect current state, compute a diff, and report `changed: false`
//! when reality already matches the request. They never read playbook
//! variables directly; everything arrives pre-substituted in the parameter
//! map.

pub mod blockinfile;
pub mod command;
pub mod defaults;
pub mod env;
pub mod file;
pub mod lineinfile;
pub mod package;
pub mod registry;
pub mod service;
pub mod settings;
pub mod sysctl;

use anyhow::Result;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::executor::Executor;
use crate::types::{self, Params};
use crate::vars::Variables;

/// Capability interface implemented by every action.
pub trait ActionHandler: Send + Sync {
    /// Platforms this handler can run on; `"all"` matches any.
    fn supports(&self) -> &'static [&'static str];

    /// Pure parameter check, invoked at parse/dry-run time.
    fn validate(&self, params: &Params) -> Result<()>;

    /// Perform the action against the host.
    fn execute(
        &self,
        token: &CancelToken,
        params: &Params,
        vars: &Variables,
    ) -> Result<ActionOutput>;
}

/// What a handler observed and did.
#[derive(Debug, Clone, Default)]
pub struct ActionOutput {
    /// Whether the host's observable state was mutated.
    pub changed: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub message: String,
}

impl ActionOutput {
    /// The host was mutated.
    pub fn changed() -> Self {
        ActionOutput {
            changed: true,
            ..Default::default()
        }
    }

    /// Reality already matched the request.
    pub fn unchanged() -> Self {
        ActionOutput::default()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// A command that ran but did not succeed. Carries the captured output so
/// the task result can still report stdout/stderr and the exit code.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CommandFailed {
    pub message: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Register every built-in handler with an executor.
///
/// Platform-exclusive handlers are registered everywhere; on foreign hosts
/// their `supports()` list simply never matches, and execution fails fast.
pub fn register_all(executor: &mut Executor) {
    executor.register_handler(types::ACTION_COMMAND, Box::new(command::CommandHandler));
    executor.register_handler(types::ACTION_FILE, Box::new(file::FileHandler));
    executor.register_handler(types::ACTION_LINEINFILE, Box::new(lineinfile::LineinfileHandler));
    executor.register_handler(
        types::ACTION_BLOCKINFILE,
        Box::new(blockinfile::BlockinfileHandler),
    );
    executor.register_handler(types::ACTION_ENV, Box::new(env::EnvHandler));
    executor.register_handler(types::ACTION_SERVICE, Box::new(service::ServiceHandler));
    executor.register_handler(types::ACTION_REGISTRY, Box::new(registry::RegistryHandler));
    executor.register_handler(types::ACTION_SYSCTL, Box::new(sysctl::SysctlHandler));
    executor.register_handler(types::ACTION_DEFAULTS, Box::new(defaults::DefaultsHandler));
    executor.register_handler(types::ACTION_SETTINGS, Box::new(settings::SettingsHandler));
    executor.register_handler(types::ACTION_PACKAGE, Box::new(package::PackageHandler));
}

// ---------------------------------------------------------------------------
// Parameter accessors
//
// Params are substituted YAML values; type coercion happens here, at the
// handler boundary, and nowhere above it.
// ---------------------------------------------------------------------------

/// A string parameter, if present and a string.
pub fn str_param<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// A required, non-empty string parameter.
pub fn required_str<'a>(params: &'a Params, key: &str) -> Result<&'a str> {
    match str_param(params, key) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => anyhow::bail!("'{key}' parameter must be a non-empty string"),
    }
}

/// A boolean parameter; accepts YAML booleans and common string spellings
/// (substitution turns everything it touches into strings).
pub fn bool_param(params: &Params, key: &str, default: bool) -> bool {
    match params.get(key) {
        Some(serde_yaml::Value::Bool(b)) => *b,
        Some(serde_yaml::Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => true,
            "false" | "no" | "0" => false,
            _ => default,
        },
        _ => default,
    }
}

/// A numeric parameter as i64; accepts integers, floats and numeric strings.
pub fn int_param(params: &Params, key: &str) -> Option<i64> {
    match params.get(key)? {
        serde_yaml::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_yaml::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Render any scalar parameter as a string, the way it would appear in YAML.
pub fn value_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(yaml: &str) -> Params {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn str_param_ignores_non_strings() {
        let p = params("a: hello\nb: 42\n");
        assert_eq!(str_param(&p, "a"), Some("hello"));
        assert_eq!(str_param(&p, "b"), None);
        assert_eq!(str_param(&p, "missing"), None);
    }

    #[test]
    fn required_str_rejects_empty() {
        let p = params("a: \"\"\nb: ok\n");
        assert!(required_str(&p, "a").is_err());
        assert!(required_str(&p, "missing").is_err());
        assert_eq!(required_str(&p, "b").unwrap(), "ok");
    }

    #[test]
    fn bool_param_accepts_yaml_and_string_forms() {
        let p = params("a: true\nb: \"yes\"\nc: \"0\"\nd: maybe\n");
        assert!(bool_param(&p, "a", false));
        assert!(bool_param(&p, "b", false));
        assert!(!bool_param(&p, "c", true));
        assert!(bool_param(&p, "d", true)); // unparseable keeps the default
        assert!(!bool_param(&p, "missing", false));
    }

    #[test]
    fn int_param_accepts_numbers_and_strings() {
        let p = params("a: 30\nb: \"45\"\nc: 2.9\nd: x\n");
        assert_eq!(int_param(&p, "a"), Some(30));
        assert_eq!(int_param(&p, "b"), Some(45));
        assert_eq!(int_param(&p, "c"), Some(2));
        assert_eq!(int_param(&p, "d"), None);
    }

    #[test]
    fn value_to_string_covers_scalars() {
        let p = params("s: text\nb: false\nn: 7\nnothing: null\n");
        assert_eq!(value_to_string(&p["s"]), "text");
        assert_eq!(value_to_string(&p["b"]), "false");
        assert_eq!(value_to_string(&p["n"]), "7");
        assert_eq!(value_to_string(&p["nothing"]), "");
    }
}
