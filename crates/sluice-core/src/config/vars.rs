//! Environment variable expansion for YAML config text.
//!
//! - `$NAME` and `${NAME}` expand to the variable, which must be set
//! - `${NAME:-fallback}` uses the fallback when NAME is unset or empty
//! - `${NAME-fallback}` uses the fallback only when NAME is unset
//! - `$$` is a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

use crate::error::ConfigError;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        | \$\{ ([A-Za-z_][A-Za-z0-9_]*) (?: (:?-) ([^}]*) )? \}
        | \$([A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// Expand every variable reference in `input`.
///
/// Problems are collected rather than short-circuited so a single run reports
/// every missing variable.
pub fn interpolate(input: &str) -> Result<String, ConfigError> {
    let mut problems = Vec::new();

    let expanded = REFERENCE
        .replace_all(input, |caps: &Captures| expand(caps, &mut problems))
        .into_owned();

    if problems.is_empty() {
        Ok(expanded)
    } else {
        Err(ConfigError::EnvInterpolation { errors: problems })
    }
}

fn expand(caps: &Captures, problems: &mut Vec<String>) -> String {
    let whole = &caps[0];
    if whole == "$$" {
        return "$".to_string();
    }

    let Some(name) = caps.get(1).or_else(|| caps.get(4)).map(|m| m.as_str()) else {
        return whole.to_string();
    };
    let fallback_on_empty = caps.get(2).is_some_and(|m| m.as_str() == ":-");
    let fallback = caps.get(3).map(|m| m.as_str());

    match env::var(name) {
        Ok(value) if value.contains(['\n', '\r']) => {
            problems.push(format!("environment variable '{name}' contains a line break"));
            whole.to_string()
        }
        Ok(value) if value.is_empty() && fallback_on_empty => fallback.unwrap_or_default().to_string(),
        Ok(value) => value,
        Err(_) => match fallback {
            Some(fallback) => fallback.to_string(),
            None => {
                problems.push(format!("environment variable '{name}' is not set"));
                whole.to_string()
            }
        },
    }
}
