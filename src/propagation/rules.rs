//! Propagation rule model.
//!
//! Rule sets are authored as nested JSON mappings:
//!
//! ```text
//! { "Program": { "Program Managers": { "Relationship R": { "Audit RUD": {} } } } }
//! ```
//!
//! Top-level keys are parent object types, the next level names the role being
//! propagated, and every deeper key is `"<ChildType>[:<Role Name>] <PERMS>"`.
//! The child role defaults to the propagated role's name. Parsing yields a
//! [`RuleSetSpec`]; [`RuleSet::load`] validates it against the role table once and
//! resolves every edge to a role id so traversal never looks at strings again.
//!
//! A `Relationship` edge for which no role exists on type `Relationship` is a
//! plain hop: its children are attached to the enclosing node.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::Deserialize;

use super::graph::RELATIONSHIP;
use crate::errors::PropagationError;
use crate::models::role::AccessControlRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    Create,
    Read,
    Update,
    Delete,
}

impl Permission {
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'C' => Some(Permission::Create),
            'R' => Some(Permission::Read),
            'U' => Some(Permission::Update),
            'D' => Some(Permission::Delete),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Permission::Create => 'C',
            Permission::Read => 'R',
            Permission::Update => 'U',
            Permission::Delete => 'D',
        }
    }
}

/// Parse permission letters such as `"RUD"`.
pub fn parse_grants(letters: &str) -> Result<BTreeSet<Permission>, String> {
    if letters.is_empty() {
        return Err("missing permission letters".to_string());
    }
    letters
        .chars()
        .map(|c| Permission::from_letter(c).ok_or_else(|| format!("unknown permission letter '{c}'")))
        .collect()
}

pub fn format_grants(grants: &BTreeSet<Permission>) -> String {
    grants.iter().map(|p| p.letter()).collect()
}

// ── Unvalidated rule sets ─────────────────────────────────────────

/// One edge of an authored rule tree, before role names are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEdgeSpec {
    pub child_object_type: String,
    /// Role on the child type. `None` inherits the propagated role's name.
    pub role_name: Option<String>,
    pub grants: BTreeSet<Permission>,
    pub children: Vec<RuleEdgeSpec>,
}

impl RuleEdgeSpec {
    pub fn new(child_object_type: impl Into<String>, grants: BTreeSet<Permission>) -> Self {
        RuleEdgeSpec {
            child_object_type: child_object_type.into(),
            role_name: None,
            grants,
            children: Vec::new(),
        }
    }

    /// Build an edge from a rule key such as `"Audit RUD"` or `"Audit:Auditors R"`.
    pub fn parse(key: &str) -> Result<Self, String> {
        let (head, letters) = key
            .trim()
            .rsplit_once(' ')
            .ok_or_else(|| format!("expected '<Type> <PERMS>', got '{key}'"))?;
        let grants = parse_grants(letters.trim())?;
        let (child_type, role_name) = match head.split_once(':') {
            Some((t, r)) => (t.trim(), Some(r.trim().to_string())),
            None => (head.trim(), None),
        };
        if child_type.is_empty() {
            return Err(format!("missing object type in '{key}'"));
        }
        if role_name.as_deref() == Some("") {
            return Err(format!("empty role name in '{key}'"));
        }
        Ok(RuleEdgeSpec {
            child_object_type: child_type.to_string(),
            role_name,
            grants,
            children: Vec::new(),
        })
    }

    pub fn with_role(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = Some(role_name.into());
        self
    }

    pub fn child(mut self, edge: RuleEdgeSpec) -> Self {
        merge_edge_specs(&mut self.children, edge);
        self
    }
}

impl fmt::Display for RuleEdgeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.role_name {
            Some(role) => write!(f, "{}:{} {}", self.child_object_type, role, format_grants(&self.grants)),
            None => write!(f, "{} {}", self.child_object_type, format_grants(&self.grants)),
        }
    }
}

fn merge_edge_specs(edges: &mut Vec<RuleEdgeSpec>, edge: RuleEdgeSpec) {
    let existing = edges
        .iter_mut()
        .find(|e| e.child_object_type == edge.child_object_type && e.role_name == edge.role_name);
    match existing {
        Some(e) => {
            e.grants.extend(edge.grants);
            for child in edge.children {
                merge_edge_specs(&mut e.children, child);
            }
        }
        None => edges.push(edge),
    }
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct RawNode(BTreeMap<String, RawNode>);

fn edges_from_raw(raw: RawNode) -> Result<Vec<RuleEdgeSpec>, String> {
    let mut edges = Vec::new();
    for (key, child) in raw.0 {
        let mut edge = RuleEdgeSpec::parse(&key)?;
        for grandchild in edges_from_raw(child)? {
            merge_edge_specs(&mut edge.children, grandchild);
        }
        merge_edge_specs(&mut edges, edge);
    }
    Ok(edges)
}

/// A rule set as authored: (parent type, role name) to the edges it propagates along.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSetSpec {
    rules: BTreeMap<(String, String), Vec<RuleEdgeSpec>>,
}

impl RuleSetSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, PropagationError> {
        let raw: BTreeMap<String, BTreeMap<String, RawNode>> = serde_json::from_str(json)?;
        let mut spec = RuleSetSpec::new();
        for (parent_type, roles) in raw {
            for (role_name, node) in roles {
                let edges = edges_from_raw(node).map_err(|e| {
                    PropagationError::Configuration(format!("{parent_type} / {role_name}: {e}"))
                })?;
                spec = spec.rule(parent_type.trim(), role_name.trim(), edges);
            }
        }
        Ok(spec)
    }

    pub fn rule(
        mut self,
        parent_type: impl Into<String>,
        role_name: impl Into<String>,
        edges: Vec<RuleEdgeSpec>,
    ) -> Self {
        let slot = self.rules.entry((parent_type.into(), role_name.into())).or_default();
        for edge in edges {
            merge_edge_specs(slot, edge);
        }
        self
    }

    /// Fold another rule set (e.g. a different feature area) into this one.
    pub fn merge(&mut self, other: RuleSetSpec) {
        for (key, edges) in other.rules {
            let slot = self.rules.entry(key).or_default();
            for edge in edges {
                merge_edge_specs(slot, edge);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ── Validated rule sets ───────────────────────────────────────────

/// One hop of a validated rule tree: grant `role_id` on related objects of
/// `child_object_type`, then continue with `node`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEdge {
    pub child_object_type: String,
    pub role_name: String,
    pub role_id: i64,
    pub grants: BTreeSet<Permission>,
    pub node: RuleNode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleNode {
    edges: Vec<RuleEdge>,
}

impl RuleNode {
    pub fn edges(&self) -> &[RuleEdge] {
        &self.edges
    }

    pub fn is_leaf(&self) -> bool {
        self.edges.is_empty()
    }

    /// Role ids are unique within a node, so a role id identifies an edge.
    pub fn edge_for_role(&self, role_id: i64) -> Option<&RuleEdge> {
        self.edges.iter().find(|e| e.role_id == role_id)
    }

    pub fn mentions_type(&self, object_type: &str) -> bool {
        self.edges.iter().any(|e| e.child_object_type == object_type)
    }

    fn push_merged(&mut self, edge: RuleEdge) {
        match self.edges.iter_mut().find(|e| e.role_id == edge.role_id) {
            Some(existing) => {
                existing.grants.extend(edge.grants);
                for child in edge.node.edges {
                    existing.node.push_merged(child);
                }
            }
            None => self.edges.push(edge),
        }
    }
}

#[derive(Debug, Clone)]
struct RootRule {
    parent_type: String,
    role_name: String,
    node: RuleNode,
}

/// Process-wide, immutable propagation rules keyed by the propagated role.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    roots: HashMap<i64, RootRule>,
}

struct RoleIndex<'a>(HashMap<&'a str, HashMap<&'a str, i64>>);

impl<'a> RoleIndex<'a> {
    fn new(roles: &'a [AccessControlRole]) -> Self {
        let mut by_type: HashMap<&str, HashMap<&str, i64>> = HashMap::new();
        for r in roles {
            by_type.entry(r.object_type.as_str()).or_default().insert(r.name.as_str(), r.id);
        }
        RoleIndex(by_type)
    }

    fn get(&self, name: &str, object_type: &str) -> Option<i64> {
        self.0.get(object_type).and_then(|names| names.get(name)).copied()
    }
}

impl RuleSet {
    /// Validate `spec` against the known roles. Any edge naming a role that
    /// does not exist for its object type is a configuration error.
    pub fn load(spec: &RuleSetSpec, roles: &[AccessControlRole]) -> Result<Self, PropagationError> {
        let index = RoleIndex::new(roles);
        let mut roots = HashMap::new();

        for ((parent_type, role_name), edges) in &spec.rules {
            let role_id = index.get(role_name, parent_type).ok_or_else(|| {
                PropagationError::Configuration(format!(
                    "role '{role_name}' is not defined for object type '{parent_type}'"
                ))
            })?;
            let mut node = RuleNode::default();
            build_node(&mut node, edges, role_name, &index, &format!("{parent_type} / {role_name}"))?;
            roots.insert(
                role_id,
                RootRule {
                    parent_type: parent_type.clone(),
                    role_name: role_name.clone(),
                    node,
                },
            );
        }

        log::info!("Loaded propagation rules for {} roles", roots.len());
        Ok(RuleSet { roots })
    }

    pub fn from_json(json: &str, roles: &[AccessControlRole]) -> Result<Self, PropagationError> {
        Self::load(&RuleSetSpec::from_json(json)?, roles)
    }

    /// Subtree propagated when `role_name` is granted on an object of `parent_type`.
    pub fn lookup(&self, parent_type: &str, role_name: &str) -> Option<&RuleNode> {
        self.roots
            .values()
            .find(|r| r.parent_type == parent_type && r.role_name == role_name)
            .map(|r| &r.node)
    }

    pub fn for_role(&self, role_id: i64) -> Option<&RuleNode> {
        self.roots.get(&role_id).map(|r| &r.node)
    }

    /// Follow a chain of role ids from a root role down the tree. `path[0]` is
    /// the root grant's role, each further id the role of one propagated hop.
    pub fn node_at(&self, path: &[i64]) -> Option<&RuleNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.for_role(*first)?;
        for role_id in rest {
            node = &node.edge_for_role(*role_id)?.node;
        }
        Some(node)
    }

    /// Permissions granted by the last hop of `path`.
    pub fn grants_at(&self, path: &[i64]) -> Option<&BTreeSet<Permission>> {
        let (last, parents) = path.split_last()?;
        let node = self.node_at(parents)?;
        node.edge_for_role(*last).map(|e| &e.grants)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

fn build_node(
    node: &mut RuleNode,
    specs: &[RuleEdgeSpec],
    inherited_role: &str,
    index: &RoleIndex<'_>,
    context: &str,
) -> Result<(), PropagationError> {
    for spec in specs {
        let role_name = spec.role_name.as_deref().unwrap_or(inherited_role);
        let here = format!("{context} / {spec}");
        match index.get(role_name, &spec.child_object_type) {
            Some(role_id) => {
                let mut child = RuleNode::default();
                build_node(&mut child, &spec.children, role_name, index, &here)?;
                node.push_merged(RuleEdge {
                    child_object_type: spec.child_object_type.clone(),
                    role_name: role_name.to_string(),
                    role_id,
                    grants: spec.grants.clone(),
                    node: child,
                });
            }
            None if spec.child_object_type == RELATIONSHIP => {
                build_node(node, &spec.children, role_name, index, &here)?;
            }
            None => {
                return Err(PropagationError::Configuration(format!(
                    "{here}: role '{role_name}' is not defined for object type '{}'",
                    spec.child_object_type
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(id: i64, name: &str, object_type: &str) -> AccessControlRole {
        AccessControlRole {
            id,
            name: name.to_string(),
            object_type: object_type.to_string(),
            mandatory: false,
            non_editable: false,
            default_to_current_user: false,
        }
    }

    fn roles() -> Vec<AccessControlRole> {
        vec![
            role(1, "Admin", "Program"),
            role(2, "Admin", "Audit"),
            role(3, "Admin", "Assessment"),
            role(4, "Auditors", "Assessment"),
        ]
    }

    #[test]
    fn parses_edge_keys() {
        let edge = RuleEdgeSpec::parse("Audit RUD").unwrap();
        assert_eq!(edge.child_object_type, "Audit");
        assert_eq!(edge.role_name, None);
        assert_eq!(format_grants(&edge.grants), "RUD");

        let edge = RuleEdgeSpec::parse("Assessment:Audit Captains R").unwrap();
        assert_eq!(edge.child_object_type, "Assessment");
        assert_eq!(edge.role_name.as_deref(), Some("Audit Captains"));
        assert_eq!(edge.grants, BTreeSet::from([Permission::Read]));
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(RuleEdgeSpec::parse("Audit").is_err());
        assert!(RuleEdgeSpec::parse("Audit RWX").is_err());
        assert!(RuleEdgeSpec::parse(":Admin R").is_err());
        assert!(RuleEdgeSpec::parse("Audit: R").is_err());
    }

    #[test]
    fn relationship_without_role_is_a_plain_hop() {
        let json = r#"{"Program": {"Admin": {"Relationship RUD": {"Audit RUD": {}}}}}"#;
        let rules = RuleSet::from_json(json, &roles()).unwrap();
        let node = rules.lookup("Program", "Admin").unwrap();
        assert_eq!(node.edges().len(), 1);
        assert_eq!(node.edges()[0].child_object_type, "Audit");
        assert_eq!(node.edges()[0].role_id, 2);
        assert!(node.edges()[0].node.is_leaf());
    }

    #[test]
    fn relationship_with_role_is_a_grant_target() {
        let mut all = roles();
        all.push(role(9, "Admin", RELATIONSHIP));
        let json = r#"{"Program": {"Admin": {"Relationship R": {"Audit RUD": {}}}}}"#;
        let rules = RuleSet::from_json(json, &all).unwrap();
        let node = rules.for_role(1).unwrap();
        assert_eq!(node.edges()[0].child_object_type, RELATIONSHIP);
        assert_eq!(node.edges()[0].node.edges()[0].role_id, 2);
    }

    #[test]
    fn missing_role_is_a_configuration_error() {
        let json = r#"{"Program": {"Admin": {"Relationship R": {"Control RUD": {}}}}}"#;
        match RuleSet::from_json(json, &roles()) {
            Err(PropagationError::Configuration(msg)) => assert!(msg.contains("Control")),
            other => panic!("expected configuration error, got {other:?}"),
        }

        let json = r#"{"Program": {"Owner": {}}}"#;
        assert!(matches!(
            RuleSet::from_json(json, &roles()),
            Err(PropagationError::Configuration(_))
        ));
    }

    #[test]
    fn role_override_resolves_other_role() {
        let json = r#"{"Program": {"Admin": {"Relationship R": {"Audit RUD": {"Assessment:Auditors R": {}}}}}}"#;
        let rules = RuleSet::from_json(json, &roles()).unwrap();
        let node = rules.node_at(&[1, 2]).unwrap();
        assert_eq!(node.edges()[0].role_id, 4);
        assert_eq!(rules.grants_at(&[1, 2, 4]), Some(&BTreeSet::from([Permission::Read])));
        assert!(rules.node_at(&[1, 3]).is_none());
    }

    #[test]
    fn merged_rule_sets_union_their_edges() {
        let mut spec = RuleSetSpec::from_json(r#"{"Program": {"Admin": {"Audit R": {}}}}"#).unwrap();
        spec.merge(RuleSetSpec::from_json(r#"{"Program": {"Admin": {"Audit UD": {"Assessment R": {}}}}}"#).unwrap());
        let rules = RuleSet::load(&spec, &roles()).unwrap();
        let node = rules.lookup("Program", "Admin").unwrap();
        assert_eq!(node.edges().len(), 1);
        assert_eq!(format_grants(&node.edges()[0].grants), "RUD");
        assert!(node.edges()[0].node.mentions_type("Assessment"));
    }
}
