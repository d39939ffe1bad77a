//! Hierarchical resource authorization.
//!
//! Rules are attached to nodes of a tree keyed by resource path segments
//! (`workspace`, `layer`, ...). A node without an explicit rule for a mode
//! inherits the nearest ancestor's rule, and an unconfigured root lets
//! everybody through.
//!
//! ## Usage
//!
//! ```ignore
//! let rules = authz::parse_rules("topp.*.w=ROLE_EDITOR\n")?;
//! let manager = ResourceAccessManager::from_rules(&rules);
//!
//! // anonymous readers are fine, writers need ROLE_EDITOR
//! assert!(manager.can_access(None, "topp.states", AccessMode::Read));
//! assert!(!manager.can_access(None, "topp.states", AccessMode::Write));
//! ```

pub mod manager;
pub mod rules;
pub mod tree;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use keywarden_types::AccessMode;
pub use manager::{load_rule_file, ResourceAccessManager, RuleFileError};
pub use rules::{parse_rules, AccessRule, RuleError};
pub use tree::{NodeRef, SecureTree, SecureTreeBuilder};

/// Role identifier that stands for "no restriction" in rule text.
pub const ANY_ROLE: &str = "*";

/// Effective rule for one access mode.
///
/// `Everybody` is distinct from an empty role set, which admits nobody.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizedRoles {
    Everybody,
    Roles(BTreeSet<String>),
}

impl AuthorizedRoles {
    /// Build a rule from role names; a single `*` anywhere means everybody.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut roles = BTreeSet::new();
        for name in names {
            let name = name.into();
            let name = name.trim();
            if name == ANY_ROLE {
                return Self::Everybody;
            }
            if !name.is_empty() {
                roles.insert(name.to_string());
            }
        }
        Self::Roles(roles)
    }

    pub fn nobody() -> Self {
        Self::Roles(BTreeSet::new())
    }

    pub fn is_everybody(&self) -> bool {
        matches!(self, Self::Everybody)
    }

    /// Whether `principal` satisfies this rule. Anonymous callers only pass
    /// an `Everybody` rule.
    pub fn admits(&self, principal: Option<&Principal>) -> bool {
        match self {
            Self::Everybody => true,
            Self::Roles(roles) => principal
                .map(|p| p.roles.iter().any(|r| roles.contains(r)))
                .unwrap_or(false),
        }
    }
}

/// An authenticated identity carrying zero or more roles.
///
/// Anonymous access is modelled as `None` wherever a principal is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub roles: BTreeSet<String>,
}

impl Principal {
    pub fn new<I, S>(name: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_role_means_everybody() {
        assert_eq!(
            AuthorizedRoles::from_names(["ROLE_A", "*"]),
            AuthorizedRoles::Everybody
        );
        assert_eq!(AuthorizedRoles::from_names(Vec::<String>::new()), AuthorizedRoles::nobody());
    }

    #[test]
    fn test_empty_role_set_admits_nobody() {
        let alice = Principal::new("alice", ["ROLE_A"]);
        assert!(!AuthorizedRoles::nobody().admits(Some(&alice)));
        assert!(!AuthorizedRoles::nobody().admits(None));
    }

    #[test]
    fn test_roles_need_overlap() {
        let rule = AuthorizedRoles::from_names(["ROLE_A", "ROLE_B"]);
        assert!(rule.admits(Some(&Principal::new("a", ["ROLE_B"]))));
        assert!(!rule.admits(Some(&Principal::new("c", ["ROLE_C"]))));
        assert!(!rule.admits(Some(&Principal::new("d", Vec::<String>::new()))));
        assert!(!rule.admits(None));
    }
}
