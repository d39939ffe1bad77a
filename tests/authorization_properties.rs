use keywarden::authz::{self, AccessRule, AuthorizedRoles, Principal, ResourceAccessManager, SecureTree};
use keywarden::AccessMode;
use proptest::prelude::*;
use proptest::sample::select;

fn segment() -> impl Strategy<Value = String> {
    select(vec!["topp", "sf", "states", "roads"]).prop_map(String::from)
}

fn resource_path() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment(), 1..4)
}

fn access_mode() -> impl Strategy<Value = AccessMode> {
    prop_oneof![Just(AccessMode::Read), Just(AccessMode::Write)]
}

fn roles() -> impl Strategy<Value = AuthorizedRoles> {
    prop_oneof![
        Just(AuthorizedRoles::Everybody),
        prop::collection::btree_set(
            select(vec!["ROLE_A", "ROLE_B", "ROLE_C"]).prop_map(String::from),
            0..3
        )
        .prop_map(AuthorizedRoles::Roles),
    ]
}

fn rule() -> impl Strategy<Value = AccessRule> {
    (resource_path(), access_mode(), roles()).prop_map(|(path, mode, roles)| AccessRule::new(path, mode, roles))
}

/// Longest configured prefix of `query`, last rule winning.
fn expected_roles(rules: &[AccessRule], query: &[String], mode: AccessMode) -> AuthorizedRoles {
    for len in (0..=query.len()).rev() {
        let prefix = &query[..len];
        if let Some(rule) = rules
            .iter()
            .rev()
            .find(|r| r.mode == mode && r.path.as_slice() == prefix)
        {
            return rule.roles.clone();
        }
    }
    AuthorizedRoles::Everybody
}

proptest! {
    #[test]
    fn unconfigured_root_admits_everybody(rules in prop::collection::vec(rule(), 0..12)) {
        let tree = SecureTree::from_rules(&rules);
        for mode in AccessMode::ALL {
            prop_assert!(tree.root().get_authorized_roles(mode).is_everybody());
            prop_assert!(tree.root().can_access(None, mode));
        }
    }

    #[test]
    fn effective_rule_is_nearest_configured_ancestor(
        rules in prop::collection::vec(rule(), 0..12),
        query in resource_path(),
        mode in access_mode(),
    ) {
        let tree = SecureTree::from_rules(&rules);
        let node = tree.root().get_deepest_node(&query);
        let expected = expected_roles(&rules, &query, mode);
        prop_assert_eq!(node.get_authorized_roles(mode), &expected);
    }

    #[test]
    fn deepest_node_is_longest_existing_prefix(
        rules in prop::collection::vec(rule(), 1..12),
        extra in resource_path(),
    ) {
        let tree = SecureTree::from_rules(&rules);
        let configured = &rules[0].path;
        let node = tree.root().get_deepest_node(configured);
        prop_assert_eq!(node.path(), configured.iter().map(String::as_str).collect::<Vec<_>>());

        let mut longer = configured.clone();
        longer.push("unknown-layer".to_string());
        longer.extend(extra);
        prop_assert_eq!(tree.root().get_deepest_node(&longer), node);
    }

    #[test]
    fn manager_decisions_follow_tree(
        rules in prop::collection::vec(rule(), 0..12),
        query in resource_path(),
        mode in access_mode(),
    ) {
        let manager = ResourceAccessManager::from_rules(&rules);
        let expected = expected_roles(&rules, &query, mode);
        let resource = query.join(".");
        let editor = Principal::new("editor", ["ROLE_A"]);

        prop_assert_eq!(manager.can_access(None, &resource, mode), expected.is_everybody());
        prop_assert_eq!(manager.can_access(Some(&editor), &resource, mode), expected.admits(Some(&editor)));
    }
}

#[test]
fn test_layer_properties_document() {
    let rules = authz::parse_rules(
        "# layer security\n\
         *.*.r=*\n\
         *.*.w=ROLE_ADMINISTRATOR\n\
         topp.*.w=ROLE_EDITOR\n\
         topp.states.r=ROLE_TSTATE\n",
    )
    .unwrap();
    let manager = ResourceAccessManager::from_rules(&rules);
    let editor = Principal::new("editor", ["ROLE_EDITOR"]);
    let admin = Principal::new("admin", ["ROLE_ADMINISTRATOR"]);

    assert!(manager.can_access(None, "sf.roads", AccessMode::Read));
    assert!(!manager.can_access(None, "sf.roads", AccessMode::Write));
    assert!(manager.can_access(Some(&admin), "sf.roads", AccessMode::Write));
    assert!(!manager.can_access(Some(&admin), "topp.roads", AccessMode::Write));
    assert!(manager.can_access(Some(&editor), "topp.roads", AccessMode::Write));
    assert!(!manager.can_access(None, "topp.states", AccessMode::Read));
    assert!(!manager.can_access(Some(&editor), "topp/states", AccessMode::Read));
}
