//! get / get-config filtering.
//!
//! Two forms: subtree filters (RFC 6241 §6, an embedded shape matched
//! against the datastore) and xpath selects (conditional on the
//! `:xpath` capability).

use crate::message::{Filter, RpcError};
use crate::path::Path;
use crate::tree::{entry_matches_keys, DataNode};

/// Apply a filter to a result root (a `<data>`-shaped container whose
/// children are the forest). `None` returns the full copy.
pub fn apply(root: &DataNode, filter: Option<&Filter>) -> Result<DataNode, RpcError> {
    match filter {
        None => Ok(root.clone()),
        Some(Filter::Subtree(spec)) => Ok(subtree(root, spec)),
        Some(Filter::XPath(select)) => xpath(root, select),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subtree filters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Project `root` through the filter's match forest.
pub fn subtree(root: &DataNode, spec: &DataNode) -> DataNode {
    let mut out = DataNode {
        name: root.name.clone(),
        namespace: root.namespace.clone(),
        value: None,
        attrs: Vec::new(),
        children: Vec::new(),
    };
    // An empty filter selects nothing (RFC 6241 §6.4.2).
    if spec.children.is_empty() {
        return out;
    }
    out.children = project_children(root, &spec.children);
    out
}

/// Match the filter siblings against one data node's children.
fn project_children(data: &DataNode, filter_children: &[DataNode]) -> Vec<DataNode> {
    let mut out = Vec::new();
    for data_child in &data.children {
        // Every filter sibling naming this child gets a chance; first
        // successful projection wins.
        for spec in filter_children {
            if !data_child.matches(spec.namespace.as_deref(), &spec.name) {
                continue;
            }
            if let Some(projected) = project_node(data_child, spec) {
                out.push(projected);
                break;
            }
        }
    }
    out
}

/// Project one data node through one filter node, or rule it out.
fn project_node(data: &DataNode, spec: &DataNode) -> Option<DataNode> {
    // Selection node: empty element selects the whole subtree.
    if spec.children.is_empty() && spec.value.is_none() {
        return Some(data.clone());
    }

    // Content-match leaf: include when values agree.
    if let Some(wanted) = &spec.value {
        return match &data.value {
            Some(actual) if actual == wanted => Some(data.clone()),
            _ => None,
        };
    }

    // Containment node. Content-match children act as conditions on the
    // data node; the rest select within it.
    let (conditions, selectors): (Vec<&DataNode>, Vec<&DataNode>) = spec
        .children
        .iter()
        .partition(|c| c.value.is_some() && c.children.is_empty());

    for condition in &conditions {
        let hit = data.children.iter().any(|c| {
            c.matches(condition.namespace.as_deref(), &condition.name)
                && c.value == condition.value
        });
        if !hit {
            return None;
        }
    }

    // Conditions alone select the entire matching entry.
    if selectors.is_empty() {
        return Some(data.clone());
    }

    let selected = {
        let selector_nodes: Vec<DataNode> = selectors.iter().map(|s| (*s).clone()).collect();
        project_children(data, &selector_nodes)
    };
    if selected.is_empty() {
        return None;
    }

    let mut out = DataNode {
        name: data.name.clone(),
        namespace: data.namespace.clone(),
        value: None,
        attrs: Vec::new(),
        children: Vec::new(),
    };
    // Matched conditions are echoed so list entries stay identifiable.
    for condition in conditions {
        if let Some(leaf) = data
            .children
            .iter()
            .find(|c| c.matches(condition.namespace.as_deref(), &condition.name))
        {
            out.children.push(leaf.clone());
        }
    }
    out.children.extend(selected);
    Some(out)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// XPath filters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Select by path, keeping the ancestor chain (with list keys) so the
/// result is a well-formed projection of the datastore.
pub fn xpath(root: &DataNode, select: &str) -> Result<DataNode, RpcError> {
    let path = Path::parse(select)
        .map_err(|e| RpcError::invalid_value(format!("bad xpath filter: {e}")))?;

    let mut out = DataNode {
        name: root.name.clone(),
        namespace: root.namespace.clone(),
        value: None,
        attrs: Vec::new(),
        children: Vec::new(),
    };
    let Some(first) = path.steps.first() else {
        return Ok(out);
    };
    for child in &root.children {
        if child.name == first.name && entry_matches_keys(child, &first.keys) {
            if let Some(projected) = project_path(child, &path.steps[1..], &first.keys) {
                out.children.push(projected);
            }
        }
    }
    Ok(out)
}

/// `prev_keys` are the predicates that selected `node`; their leaves are
/// echoed in the projection so list entries stay addressable.
fn project_path(
    node: &DataNode,
    steps: &[crate::path::Step],
    prev_keys: &[(String, String)],
) -> Option<DataNode> {
    let Some(step) = steps.first() else {
        return Some(node.clone());
    };

    let mut out = DataNode {
        name: node.name.clone(),
        namespace: node.namespace.clone(),
        value: None,
        attrs: Vec::new(),
        children: Vec::new(),
    };
    for (key, _) in prev_keys {
        if let Some(leaf) = node.child(key) {
            out.children.push(leaf.clone());
        }
    }
    let echoed = out.children.len();

    for child in node.children_named(&step.name) {
        if entry_matches_keys(child, &step.keys) {
            if let Some(projected) = project_path(child, &steps[1..], &step.keys) {
                out.children.push(projected);
            }
        }
    }

    if out.children.len() == echoed {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml;

    const IF_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-interfaces";

    fn data_root() -> DataNode {
        let raw = format!(
            r#"<data><interfaces xmlns="{IF_NS}"><interface><name>eth0</name><type>ethernetCsmacd</type><enabled>true</enabled></interface><interface><name>lo0</name><type>softwareLoopback</type><enabled>true</enabled></interface></interfaces></data>"#
        );
        xml::parse(raw.as_bytes()).unwrap()
    }

    fn filter_spec(body: &str) -> DataNode {
        xml::parse(format!(r#"<filter type="subtree">{body}</filter>"#).as_bytes()).unwrap()
    }

    #[test]
    fn selection_node_takes_whole_subtree() {
        let out = subtree(&data_root(), &filter_spec(&format!(r#"<interfaces xmlns="{IF_NS}"/>"#)));
        let interfaces = out.child("interfaces").unwrap();
        assert_eq!(interfaces.children_named("interface").count(), 2);
    }

    #[test]
    fn content_match_narrows_list() {
        let out = subtree(
            &data_root(),
            &filter_spec(&format!(
                r#"<interfaces xmlns="{IF_NS}"><interface><name>eth0</name></interface></interfaces>"#
            )),
        );
        let interfaces = out.child("interfaces").unwrap();
        let entries: Vec<_> = interfaces.children_named("interface").collect();
        assert_eq!(entries.len(), 1);
        // Content-match-only filter returns the complete entry.
        assert_eq!(entries[0].child_value("type"), Some("ethernetCsmacd"));
    }

    #[test]
    fn content_match_plus_selector_prunes_fields() {
        let out = subtree(
            &data_root(),
            &filter_spec(&format!(
                r#"<interfaces xmlns="{IF_NS}"><interface><name>eth0</name><enabled/></interface></interfaces>"#
            )),
        );
        let entries: Vec<_> = out
            .child("interfaces")
            .unwrap()
            .children_named("interface")
            .collect();
        assert_eq!(entries.len(), 1);
        let entry = entries[0];
        // Key echoed, selector included, everything else pruned.
        assert_eq!(entry.child_value("name"), Some("eth0"));
        assert_eq!(entry.child_value("enabled"), Some("true"));
        assert!(entry.child("type").is_none());
    }

    #[test]
    fn no_match_yields_empty_data() {
        let out = subtree(
            &data_root(),
            &filter_spec(&format!(
                r#"<interfaces xmlns="{IF_NS}"><interface><name>wan9</name></interface></interfaces>"#
            )),
        );
        assert!(out.child("interfaces").is_none() || out.child("interfaces").unwrap().children.is_empty());
    }

    #[test]
    fn empty_filter_selects_nothing() {
        let out = subtree(&data_root(), &filter_spec(""));
        assert!(out.children.is_empty());
    }

    #[test]
    fn xpath_selects_entry_with_keys_echoed() {
        let out = xpath(&data_root(), "/interfaces/interface[name='lo0']/type").unwrap();
        let entry = out
            .child("interfaces")
            .unwrap()
            .child("interface")
            .unwrap();
        assert_eq!(entry.child_value("name"), Some("lo0"));
        assert_eq!(entry.child_value("type"), Some("softwareLoopback"));
        assert!(entry.child("enabled").is_none());
    }

    #[test]
    fn xpath_no_match_is_empty() {
        let out = xpath(&data_root(), "/interfaces/interface[name='wan9']").unwrap();
        assert!(out
            .child("interfaces")
            .map(|i| i.children.is_empty())
            .unwrap_or(true));
    }

    #[test]
    fn xpath_rejects_malformed_select() {
        assert!(xpath(&data_root(), "interfaces/interface").is_err());
    }
}
