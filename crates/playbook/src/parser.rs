//! Playbook YAML parsing and schema validation.
//!
//! The parser turns verified YAML text into a [`Playbook`] AST and enforces
//! the schema: required fields, the closed platform and action sets,
//! per-action required parameters, and platform-exclusive actions. It never
//! touches the network or the filesystem.

use crate::error::{ParseError, ValidationError};
use crate::types::{self, Params, Playbook, Task};

/// Schema validator bound to a targeting platform.
#[derive(Debug, Clone)]
pub struct Parser {
    platform: String,
}

impl Default for Parser {
    fn default() -> Self {
        Parser::new()
    }
}

impl Parser {
    /// A parser for the platform this agent is running on.
    pub fn new() -> Self {
        Parser {
            platform: types::current_platform().to_string(),
        }
    }

    /// A parser validating against an explicit platform. Used by tests and
    /// by control-plane-side linting.
    pub fn with_platform(platform: &str) -> Self {
        Parser {
            platform: platform.to_string(),
        }
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Parse YAML content into a validated playbook.
    pub fn parse(&self, content: &str) -> Result<Playbook, ParseError> {
        let mut playbook: Playbook = serde_yaml::from_str(content)?;
        self.validate(&mut playbook)?;
        Ok(playbook)
    }

    /// Validate a parsed playbook, filling in schema defaults.
    pub fn validate(&self, playbook: &mut Playbook) -> Result<(), ParseError> {
        if playbook.version.is_empty() {
            playbook.version = types::SCHEMA_VERSION.to_string();
        }
        if !is_supported_version(&playbook.version) {
            return Err(ValidationError::new(
                "version",
                format!(
                    "version '{}' is not supported, expected '{}'",
                    playbook.version,
                    types::SCHEMA_VERSION
                ),
            )
            .into());
        }

        if playbook.name.is_empty() {
            return Err(ValidationError::new("name", "playbook name is required").into());
        }

        if playbook.tasks.is_empty() {
            return Err(
                ValidationError::new("tasks", "playbook must have at least one task").into(),
            );
        }

        if !playbook.platforms.is_empty() {
            for platform in &playbook.platforms {
                if !types::PLATFORMS.contains(&platform.as_str()) {
                    return Err(ValidationError::new(
                        "platforms",
                        format!("invalid platform '{platform}'"),
                    )
                    .into());
                }
            }
            if !playbook.platforms.iter().any(|p| p == &self.platform) {
                return Err(ParseError::PlatformUnsupported(self.platform.clone()));
            }
        }

        for (i, task) in playbook.tasks.iter().enumerate() {
            self.validate_task(task, &format!("tasks[{i}]"))?;
        }
        for (i, handler) in playbook.handlers.iter().enumerate() {
            self.validate_task(handler, &format!("handlers[{i}]"))?;
        }

        Ok(())
    }

    fn validate_task(&self, task: &Task, field: &str) -> Result<(), ValidationError> {
        if task.name.is_empty() {
            return Err(ValidationError::new(
                format!("{field}.name"),
                "task name is required",
            ));
        }

        if task.action.is_empty() {
            return Err(ValidationError::new(
                format!("{field}.action"),
                "task action is required",
            ));
        }
        if !is_valid_action(&task.action) {
            return Err(ValidationError::new(
                format!("{field}.action"),
                format!("unknown action '{}'", task.action),
            ));
        }

        self.validate_action_platform(&task.action, &task.platform)
            .map_err(|message| ValidationError::new(format!("{field}.action"), message))?;

        validate_action_params(&task.action, &task.params, field)?;

        if task.retries < 0 {
            return Err(ValidationError::new(
                format!("{field}.retries"),
                "retries cannot be negative",
            ));
        }
        if task.retry_delay < 0 {
            return Err(ValidationError::new(
                format!("{field}.retry_delay"),
                "retry_delay cannot be negative",
            ));
        }

        if let Some(rollback) = &task.rollback {
            self.validate_task(rollback, &format!("{field}.rollback"))?;
        }

        Ok(())
    }

    /// Platform-exclusive actions reject when the effective platform (the
    /// task's filter, or this host) is wrong.
    fn validate_action_platform(&self, action: &str, task_platform: &str) -> Result<(), String> {
        let platform = if task_platform.is_empty() {
            self.platform.as_str()
        } else {
            task_platform
        };

        match action {
            types::ACTION_REGISTRY if platform != types::PLATFORM_WINDOWS => {
                Err("registry action is only available on Windows".into())
            }
            types::ACTION_SYSCTL if platform != types::PLATFORM_LINUX => {
                Err("sysctl action is only available on Linux".into())
            }
            types::ACTION_DEFAULTS if platform != types::PLATFORM_DARWIN => {
                Err("defaults action is only available on macOS".into())
            }
            types::ACTION_SETTINGS | types::ACTION_PACKAGE
                if platform != types::PLATFORM_ANDROID =>
            {
                Err(format!("{action} action is only available on Android"))
            }
            _ => Ok(()),
        }
    }
}

/// Per-action required parameters, enforced at parse time.
fn validate_action_params(action: &str, params: &Params, field: &str) -> Result<(), ValidationError> {
    let required: &[&str] = match action {
        types::ACTION_COMMAND => &["command"],
        types::ACTION_FILE | types::ACTION_LINEINFILE | types::ACTION_BLOCKINFILE => &["path"],
        types::ACTION_REGISTRY => &["path"],
        types::ACTION_SYSCTL => &["name"],
        types::ACTION_DEFAULTS => &["domain", "key"],
        types::ACTION_SETTINGS => &["namespace", "key"],
        types::ACTION_ENV | types::ACTION_SERVICE | types::ACTION_PACKAGE => &["name"],
        _ => &[],
    };

    for param in required {
        if !params.contains_key(*param) {
            return Err(ValidationError::new(
                format!("{field}.params.{param}"),
                format!("{action} action requires '{param}' parameter"),
            ));
        }
    }
    Ok(())
}

fn is_supported_version(version: &str) -> bool {
    version == types::SCHEMA_VERSION || version == "1"
}

fn is_valid_action(action: &str) -> bool {
    matches!(
        action,
        types::ACTION_COMMAND
            | types::ACTION_FILE
            | types::ACTION_LINEINFILE
            | types::ACTION_BLOCKINFILE
            | types::ACTION_ENV
            | types::ACTION_SERVICE
            | types::ACTION_REGISTRY
            | types::ACTION_SYSCTL
            | types::ACTION_DEFAULTS
            | types::ACTION_SETTINGS
            | types::ACTION_PACKAGE
    )
}
