//! Expression evaluation for `${{ }}` syntax
//!
//! Supports:
//! - ${{ env.VAR_NAME }}
//! - ${{ artifacts.NAME.path }}, ${{ artifacts.NAME.paths }}, ${{ artifacts.NAME.count }}
//! - ${{ run.id }}, ${{ run.number }}, ${{ run.pipeline }}, ${{ run.branch }}
//!
//! Gate conditions additionally support `==`, `!=`, `&&`, `||`, a leading `!`,
//! quoted literals and `always()`. Unknown variables are errors, never empty
//! strings, so a gate cannot silently pass on a missing value.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use super::environment::{Environment, BRANCH_NAME, BUILD_ID, BUILD_NUMBER, JOB_NAME};

static EXPRESSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").unwrap());

/// Errors that can occur during expression evaluation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Invalid expression syntax: {0}")]
    InvalidSyntax(String),
}

/// Interpolate all `${{ }}` expressions in a string
pub fn interpolate(input: &str, env: &Environment) -> Result<String, ExpressionError> {
    let mut result = String::with_capacity(input.len());
    let mut last = 0;

    for cap in EXPRESSION_REGEX.captures_iter(input) {
        let (Some(full), Some(expr)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        result.push_str(&input[last..full.start()]);
        result.push_str(&resolve(expr.as_str().trim(), env)?);
        last = full.end();
    }
    result.push_str(&input[last..]);

    Ok(result)
}

/// Resolve a single expression (without the ${{ }} wrapper)
fn resolve(expr: &str, env: &Environment) -> Result<String, ExpressionError> {
    let parts: Vec<&str> = expr.split('.').collect();

    match parts.as_slice() {
        ["env", name] => env
            .get(name)
            .map(str::to_string)
            .ok_or_else(|| ExpressionError::UnknownVariable(format!("env.{}", name))),

        ["env", ..] => Err(ExpressionError::InvalidSyntax(format!(
            "env expressions must be env.VAR_NAME, got: {}",
            expr
        ))),

        ["artifacts", name, field] => {
            let handle = env.artifact(name).ok_or_else(|| {
                ExpressionError::UnknownVariable(format!("artifacts.{}", name))
            })?;
            match *field {
                "path" => handle
                    .primary()
                    .map(|p| p.display().to_string())
                    .ok_or_else(|| {
                        ExpressionError::UnknownVariable(format!("artifacts.{}.path", name))
                    }),
                "paths" => Ok(handle
                    .paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(" ")),
                "count" => Ok(handle.paths.len().to_string()),
                other => Err(ExpressionError::UnknownVariable(format!(
                    "artifacts.{}.{}",
                    name, other
                ))),
            }
        }

        ["artifacts", ..] => Err(ExpressionError::InvalidSyntax(format!(
            "artifacts expressions must be artifacts.NAME.FIELD, got: {}",
            expr
        ))),

        ["run", field] => {
            let key = match *field {
                "id" => BUILD_ID,
                "number" => BUILD_NUMBER,
                "pipeline" => JOB_NAME,
                "branch" => BRANCH_NAME,
                _ => return Err(ExpressionError::UnknownVariable(expr.to_string())),
            };
            env.get(key)
                .map(str::to_string)
                .ok_or_else(|| ExpressionError::UnknownVariable(expr.to_string()))
        }

        _ => Err(ExpressionError::UnknownVariable(expr.to_string())),
    }
}

/// Check if a condition expression evaluates to true
pub fn evaluate_condition(condition: &str, env: &Environment) -> Result<bool, ExpressionError> {
    let condition = condition.trim();
    if condition.is_empty() {
        return Err(ExpressionError::InvalidSyntax("empty condition".to_string()));
    }

    for alternative in split_top_level(condition, "||") {
        let mut all = true;
        for term in split_top_level(&alternative, "&&") {
            if !evaluate_term(&term, env)? {
                all = false;
                break;
            }
        }
        if all {
            return Ok(true);
        }
    }

    Ok(false)
}

fn evaluate_term(term: &str, env: &Environment) -> Result<bool, ExpressionError> {
    let term = term.trim();
    if term.is_empty() {
        return Err(ExpressionError::InvalidSyntax(
            "missing operand in condition".to_string(),
        ));
    }

    if let Some(rest) = term.strip_prefix('!') {
        if !rest.starts_with('=') {
            return Ok(!evaluate_term(rest, env)?);
        }
    }

    if term == "always()" {
        return Ok(true);
    }

    for (op, equal) in [("==", true), ("!=", false)] {
        let sides = split_top_level(term, op);
        if sides.len() == 2 {
            let left = evaluate_operand(&sides[0], env)?;
            let right = evaluate_operand(&sides[1], env)?;
            return Ok((left == right) == equal);
        }
        if sides.len() > 2 {
            return Err(ExpressionError::InvalidSyntax(format!(
                "chained '{}' comparison: {}",
                op, term
            )));
        }
    }

    Ok(is_truthy(&evaluate_operand(term, env)?))
}

fn evaluate_operand(operand: &str, env: &Environment) -> Result<String, ExpressionError> {
    let operand = operand.trim();
    if operand.is_empty() {
        return Err(ExpressionError::InvalidSyntax(
            "missing operand in comparison".to_string(),
        ));
    }

    let unquoted = strip_quotes(operand).unwrap_or(operand);
    interpolate(unquoted, env)
}

fn strip_quotes(value: &str) -> Option<&str> {
    for quote in ['\'', '"'] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return Some(&value[1..value.len() - 1]);
        }
    }
    None
}

/// Split on `separator` outside of quotes and `${{ }}` blocks
fn split_top_level(input: &str, separator: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_template = false;
    let mut rest = input;

    while let Some(c) = rest.chars().next() {
        if quote.is_none() && !in_template {
            if rest.starts_with("${{") {
                in_template = true;
                current.push_str("${{");
                rest = &rest[3..];
                continue;
            }
            if rest.starts_with(separator) {
                parts.push(std::mem::take(&mut current));
                rest = &rest[separator.len()..];
                continue;
            }
        } else if in_template && rest.starts_with("}}") {
            in_template = false;
            current.push_str("}}");
            rest = &rest[2..];
            continue;
        }

        if !in_template {
            match quote {
                Some(q) if c == q => quote = None,
                None if c == '\'' || c == '"' => quote = Some(c),
                _ => {}
            }
        }

        current.push(c);
        rest = &rest[c.len_utf8()..];
    }

    parts.push(current);
    parts
}

fn is_truthy(value: &str) -> bool {
    !value.is_empty()
        && value != "false"
        && value != "0"
        && value.to_lowercase() != "null"
        && value.to_lowercase() != "none"
}

/// Interpolate all expressions in a map of step parameters
pub fn interpolate_params(
    params: &HashMap<String, serde_yaml::Value>,
    env: &Environment,
) -> Result<HashMap<String, String>, ExpressionError> {
    let mut result = HashMap::new();

    for (key, value) in params {
        let string_value = match value {
            serde_yaml::Value::String(s) => interpolate(s, env)?,
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Null => String::new(),
            _ => serde_yaml::to_string(value).unwrap_or_default(),
        };
        result.insert(key.clone(), string_value);
    }

    Ok(result)
}
