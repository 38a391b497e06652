//! Conditional expression evaluation for task `when:` clauses.
//!
//! Supported expressions:
//! - `platform == "windows"`
//! - `probe.exit_code != 0`
//! - `probe.stdout contains "installed"`
//! - `env.DEBUG == "true"`
//! - `count > 3 and (platform == "linux" or platform == "darwin")`
//! - bare values, evaluated by truthiness
//!
//! `or` binds looser than `and`; both short-circuit. Comparison operands are
//! resolved to strings through the variable context; numeric operators parse
//! both sides as floats.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConditionError;
use crate::types;
use crate::vars::{Variables, task_result_property};

static OPERATOR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(==|!=|>=|<=|>|<| contains | not contains | and | or |^not )").unwrap()
});

static IDENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_.]*$").unwrap());

/// Evaluator for condition expressions, bound to a variable context.
pub struct Condition<'a> {
    vars: &'a Variables,
}

impl<'a> Condition<'a> {
    pub fn new(vars: &'a Variables) -> Self {
        Condition { vars }
    }

    /// Parse and evaluate a condition expression.
    pub fn evaluate(&self, expression: &str) -> Result<bool, ConditionError> {
        let expression = expression.trim();

        // Empty condition = always true.
        if expression.is_empty() {
            return Ok(true);
        }
        if expression == "true" {
            return Ok(true);
        }
        if expression == "false" {
            return Ok(false);
        }

        // `or` binds looser than `and`, so it splits first.
        if let Some(parts) = split_on_operator(expression, " or ") {
            for part in parts {
                if self.evaluate(&part)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }

        if let Some(parts) = split_on_operator(expression, " and ") {
            for part in parts {
                if !self.evaluate(&part)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }

        if let Some(inner) = strip_outer_parens(expression) {
            return self.evaluate(inner);
        }

        if let Some(negated) = expression.strip_prefix("not ") {
            return Ok(!self.evaluate(negated)?);
        }

        self.evaluate_comparison(expression)
    }

    fn evaluate_comparison(&self, expression: &str) -> Result<bool, ConditionError> {
        // `not contains` must be probed before `contains`.
        if let Some((left, right)) = split_once_op(expression, " not contains ") {
            let left = self.resolve_value(&left)?;
            let right = self.resolve_value(&right)?;
            return Ok(!left.contains(&right));
        }

        if let Some((left, right)) = split_once_op(expression, " contains ") {
            let left = self.resolve_value(&left)?;
            let right = self.resolve_value(&right)?;
            return Ok(left.contains(&right));
        }

        if let Some((left, right)) = split_once_op(expression, " != ") {
            return Ok(self.resolve_value(&left)? != self.resolve_value(&right)?);
        }

        if let Some((left, right)) = split_once_op(expression, " == ") {
            return Ok(self.resolve_value(&left)? == self.resolve_value(&right)?);
        }

        for op in [" >= ", " <= ", " > ", " < "] {
            let Some((left, right)) = split_once_op(expression, op) else {
                continue;
            };
            let left = self.resolve_value(&left)?;
            let right = self.resolve_value(&right)?;

            let (Ok(left), Ok(right)) = (left.parse::<f64>(), right.parse::<f64>()) else {
                return Err(ConditionError::NonNumericOperand(expression.to_string()));
            };

            return Ok(match op.trim() {
                ">=" => left >= right,
                "<=" => left <= right,
                ">" => left > right,
                _ => {
                    debug_assert_eq!(op.trim(), "<");
                    left < right
                }
            });
        }

        // A bare value evaluates by truthiness.
        let value = self.resolve_value(expression)?;
        Ok(is_truthy(&value))
    }

    /// Resolve a value reference to its string form.
    fn resolve_value(&self, reference: &str) -> Result<String, ConditionError> {
        let reference = reference.trim();

        // Quoted string literal.
        if (reference.starts_with('"') && reference.ends_with('"') && reference.len() >= 2)
            || (reference.starts_with('\'') && reference.ends_with('\'') && reference.len() >= 2)
        {
            return Ok(reference[1..reference.len() - 1].to_string());
        }

        // Numeric literal stays textual; comparisons decide how to read it.
        if reference.parse::<f64>().is_ok() {
            return Ok(reference.to_string());
        }

        if reference == "platform" {
            return Ok(types::current_platform().to_string());
        }
        if reference == "arch" {
            return Ok(std::env::consts::ARCH.to_string());
        }

        // env.VAR — undefined resolves to the empty string.
        if let Some(env_name) = reference.strip_prefix("env.") {
            return Ok(std::env::var(env_name).unwrap_or_default());
        }

        // task.property
        if let Some((task, property)) = reference.split_once('.') {
            if let Some(result) = self.vars.task_result(task) {
                return task_result_property(result, property)
                    .map_err(|_| ConditionError::UnknownProperty(property.to_string()));
            }
        }

        if let Some(value) = self.vars.get(reference) {
            return Ok(value.to_string());
        }

        // Unknown reference resolves to empty, which lets playbooks probe
        // for undefined variables.
        Ok(String::new())
    }
}

/// Split an expression on a logical operator, honoring parenthesis depth and
/// quoted strings. Returns None when the operator does not occur at the top
/// level.
fn split_on_operator(expr: &str, op: &str) -> Option<Vec<String>> {
    let bytes = expr.as_bytes();
    let op_bytes = op.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                b'"' | b'\'' => quote = Some(c),
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                _ => {
                    if depth == 0 && bytes[i..].starts_with(op_bytes) {
                        parts.push(expr[start..i].trim().to_string());
                        i += op_bytes.len();
                        start = i;
                        continue;
                    }
                }
            },
        }
        i += 1;
    }

    if parts.is_empty() {
        return None;
    }
    parts.push(expr[start..].trim().to_string());
    Some(parts)
}

/// Plain first-occurrence split for comparison operators.
fn split_once_op(expr: &str, op: &str) -> Option<(String, String)> {
    expr.split_once(op)
        .map(|(l, r)| (l.trim().to_string(), r.trim().to_string()))
}

/// If the whole expression is wrapped in one pair of parentheses, return the
/// inside. `(a) and (b)` is not wrapped; `(a and b)` is.
fn strip_outer_parens(expr: &str) -> Option<&str> {
    if !(expr.starts_with('(') && expr.ends_with(')')) {
        return None;
    }
    let bytes = expr.as_bytes();
    let mut depth = 0usize;
    for (i, &c) in bytes.iter().enumerate() {
        match c {
            b'(' => depth += 1,
            b')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 && i != bytes.len() - 1 {
                    return None; // Outer paren closes before the end.
                }
            }
            _ => {}
        }
    }
    (depth == 0).then(|| &expr[1..expr.len() - 1])
}

/// Truthiness of a resolved string value.
pub fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_lowercase().as_str(),
        "" | "false" | "0" | "no" | "off" | "null" | "nil" | "none"
    )
}

/// Syntax-check a condition without evaluating it. Used during parsing and
/// dry runs to catch malformed expressions early.
pub fn validate_condition(expression: &str) -> Result<(), ConditionError> {
    let expression = expression.trim();

    if expression.is_empty() || expression == "true" || expression == "false" {
        return Ok(());
    }

    let open = expression.matches('(').count();
    let close = expression.matches(')').count();
    if open != close {
        return Err(ConditionError::UnbalancedParens(expression.to_string()));
    }

    if !OPERATOR_PATTERN.is_match(expression) && !is_valid_identifier(expression) {
        return Err(ConditionError::InvalidSyntax(expression.to_string()));
    }

    Ok(())
}

fn is_valid_identifier(s: &str) -> bool {
    let s = s.trim();
    if s.is_empty() {
        return false;
    }
    // Quoted strings and numbers stand alone as valid value expressions.
    if (s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')) {
        return true;
    }
    if s.parse::<f64>().is_ok() {
        return true;
    }
    IDENT_PATTERN.is_match(s)
}
