//! Access rules and their properties-file form.
//!
//! A rule line looks like `workspace.layer.r=ROLE_A,ROLE_B`. The last
//! segment of the key is the mode (`r` or `w`), the rest is the resource
//! path. Trailing `*` path segments address the parent level, so
//! `*.*.r=*` configures the root and `topp.*.w=ROLE_EDITOR` the `topp` node.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use super::{AccessMode, AuthorizedRoles, ANY_ROLE};

/// Rule parsing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("Line {line}: missing '=' in rule")]
    MissingSeparator { line: usize },

    #[error("Line {line}: rule key '{key}' has no access mode suffix")]
    MissingMode { line: usize, key: String },

    #[error("Line {line}: unknown access mode '{mode}'")]
    UnknownMode { line: usize, mode: String },

    #[error("Line {line}: wildcard segment '*' followed by a named segment in '{key}'")]
    WildcardNotTrailing { line: usize, key: String },
}

/// One configured rule: `roles` may act on `path` in `mode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// Resource path segments; empty addresses the root
    #[serde(default)]
    pub path: Vec<String>,
    pub mode: AccessMode,
    #[serde(with = "role_names")]
    pub roles: AuthorizedRoles,
}

impl AccessRule {
    pub fn new<I, S>(path: I, mode: AccessMode, roles: AuthorizedRoles) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            mode,
            roles,
        }
    }

    fn parse_line(line_no: usize, line: &str) -> Result<Self, RuleError> {
        let (key, value) = line
            .split_once('=')
            .ok_or(RuleError::MissingSeparator { line: line_no })?;
        let key = key.trim();

        let mut segments: Vec<&str> = key.split('.').map(str::trim).collect();
        let mode_suffix = match segments.pop() {
            Some(suffix) if !segments.is_empty() => suffix,
            _ => {
                return Err(RuleError::MissingMode {
                    line: line_no,
                    key: key.to_string(),
                })
            }
        };
        let mode = AccessMode::from_suffix(mode_suffix).ok_or_else(|| RuleError::UnknownMode {
            line: line_no,
            mode: mode_suffix.to_string(),
        })?;

        while segments.last() == Some(&ANY_ROLE) {
            segments.pop();
        }
        if segments.contains(&ANY_ROLE) {
            return Err(RuleError::WildcardNotTrailing {
                line: line_no,
                key: key.to_string(),
            });
        }

        Ok(Self::new(
            segments,
            mode,
            AuthorizedRoles::from_names(value.split(',')),
        ))
    }
}

impl FromStr for AccessRule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_line(1, s.trim())
    }
}

/// Parse a whole properties document. Blank lines and `#` / `!` comments are
/// skipped.
pub fn parse_rules(text: &str) -> Result<Vec<AccessRule>, RuleError> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .map(|(line_no, line)| AccessRule::parse_line(line_no, line))
        .collect()
}

/// Roles are written as a list of names in config files, `["*"]` meaning
/// everybody.
mod role_names {
    use super::{AuthorizedRoles, ANY_ROLE};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(roles: &AuthorizedRoles, serializer: S) -> Result<S::Ok, S::Error> {
        match roles {
            AuthorizedRoles::Everybody => serializer.collect_seq([ANY_ROLE]),
            AuthorizedRoles::Roles(names) => serializer.collect_seq(names),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AuthorizedRoles, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        Ok(AuthorizedRoles::from_names(names))
    }
}
