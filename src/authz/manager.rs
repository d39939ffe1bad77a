//! Publication of authorization tree snapshots.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use super::{parse_rules, AccessMode, AccessRule, Principal, RuleError, SecureTree};

/// Serves access decisions from the current tree snapshot.
///
/// Readers clone the `Arc` and evaluate without holding the lock, so a
/// reload never blocks or tears an in-flight decision.
#[derive(Debug)]
pub struct ResourceAccessManager {
    current: RwLock<Arc<SecureTree>>,
}

impl ResourceAccessManager {
    pub fn new(tree: SecureTree) -> Self {
        Self {
            current: RwLock::new(Arc::new(tree)),
        }
    }

    pub fn from_rules(rules: &[AccessRule]) -> Self {
        Self::new(SecureTree::from_rules(rules))
    }

    /// Load rules from a properties file.
    pub fn from_properties_file(path: &Path) -> Result<Self, RuleFileError> {
        Ok(Self::from_rules(&load_rule_file(path)?))
    }

    /// The tree currently in force.
    pub fn snapshot(&self) -> Arc<SecureTree> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the whole tree. The new tree is built before the lock is
    /// taken.
    pub fn reload(&self, rules: &[AccessRule]) {
        let tree = Arc::new(SecureTree::from_rules(rules));
        let nodes = tree.len();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = tree;
        info!(rules = rules.len(), nodes, "Published new authorization tree");
    }

    /// Decide whether `principal` may act on `resource` in `mode`.
    ///
    /// `resource` is a `.` or `/` separated path such as `topp.states`.
    pub fn can_access(&self, principal: Option<&Principal>, resource: &str, mode: AccessMode) -> bool {
        let tree = self.snapshot();
        let node = tree.root().get_deepest_node(split_resource(resource));
        let allowed = node.can_access(principal, mode);
        debug!(
            resource,
            %mode,
            principal = principal.map(|p| p.name.as_str()).unwrap_or("<anonymous>"),
            allowed,
            "access decision"
        );
        allowed
    }
}

impl Default for ResourceAccessManager {
    fn default() -> Self {
        Self::new(SecureTree::new())
    }
}

/// Errors loading a rule file
#[derive(Debug, thiserror::Error)]
pub enum RuleFileError {
    #[error("Cannot read rule file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// Parse a properties file of `path.mode=ROLES` lines.
pub fn load_rule_file(path: &Path) -> Result<Vec<AccessRule>, RuleFileError> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rules(&text)?)
}

fn split_resource(resource: &str) -> impl Iterator<Item = &str> {
    resource
        .split(['.', '/'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::AuthorizedRoles;
    use crate::testutil::temp_dir;
    use std::thread;

    fn editor_rules() -> Vec<AccessRule> {
        vec![AccessRule::new(
            ["topp"],
            AccessMode::Write,
            AuthorizedRoles::from_names(["ROLE_EDITOR"]),
        )]
    }

    #[test]
    fn test_default_manager_allows_everything() {
        let manager = ResourceAccessManager::default();
        assert!(manager.can_access(None, "any/thing", AccessMode::Write));
        assert!(manager.can_access(None, "", AccessMode::Read));
    }

    #[test]
    fn test_resource_separators() {
        let manager = ResourceAccessManager::from_rules(&editor_rules());
        let editor = Principal::new("ed", ["ROLE_EDITOR"]);
        assert!(!manager.can_access(None, "topp.states", AccessMode::Write));
        assert!(!manager.can_access(None, "topp/states", AccessMode::Write));
        assert!(manager.can_access(Some(&editor), "/topp/states/", AccessMode::Write));
        assert!(manager.can_access(None, "sf.roads", AccessMode::Write));
    }

    #[test]
    fn test_reload_swaps_whole_tree() {
        let manager = ResourceAccessManager::default();
        let before = manager.snapshot();

        manager.reload(&editor_rules());
        assert!(!manager.can_access(None, "topp", AccessMode::Write));

        // a snapshot taken earlier keeps answering with the old rules
        assert!(before.root().get_deepest_node(["topp"]).can_access(None, AccessMode::Write));
    }

    #[test]
    fn test_concurrent_readers_during_reload() {
        let manager = Arc::new(ResourceAccessManager::from_rules(&editor_rules()));
        let editor = Principal::new("ed", ["ROLE_EDITOR"]);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let editor = editor.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        // editors are allowed under both rule sets
                        assert!(manager.can_access(Some(&editor), "topp.states", AccessMode::Write));
                    }
                })
            })
            .collect();

        for _ in 0..20 {
            manager.reload(&[]);
            manager.reload(&editor_rules());
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_from_properties_file() {
        let dir = temp_dir("rules-file");
        let path = dir.join("layers.properties");
        std::fs::write(&path, "*.*.w=ROLE_ADMINISTRATOR\n").unwrap();

        let manager = ResourceAccessManager::from_properties_file(&path).unwrap();
        assert!(!manager.can_access(None, "topp", AccessMode::Write));
        assert!(manager.can_access(None, "topp", AccessMode::Read));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
