//! Schema validation of configuration subtrees.
//!
//! Strictness is scoped: operation bodies whose namespace maps to a
//! loaded module are validated fully; protocol envelopes stay lenient
//! and are never passed through here.

use crate::message::{ErrorTag, ErrorType, RpcError};
use crate::schema::{SchemaNode, SchemaNodeKind, SchemaRegistry};
use crate::tree::DataNode;

/// Validate a configuration forest (the children of `<config>`, or of a
/// datastore root) against the registry.
pub fn validate_config_forest(
    forest: &[DataNode],
    registry: &SchemaRegistry,
) -> Result<(), RpcError> {
    for node in forest {
        let ns = node.namespace.as_deref().ok_or_else(|| {
            RpcError::new(ErrorType::Protocol, ErrorTag::UnknownNamespace)
                .with_message(format!("<{}> carries no namespace", node.name))
        })?;
        let schema = registry.root(ns, &node.name).ok_or_else(|| {
            if registry.module_for_namespace(ns).is_some() {
                RpcError::new(ErrorType::Application, ErrorTag::UnknownElement)
                    .with_path(format!("/{}", node.name))
            } else {
                RpcError::new(ErrorType::Protocol, ErrorTag::UnknownNamespace)
                    .with_message(format!("no module for namespace {ns}"))
            }
        })?;
        validate_node(node, schema, &format!("/{}", node.name))?;
    }
    Ok(())
}

fn validate_node(node: &DataNode, schema: &SchemaNode, path: &str) -> Result<(), RpcError> {
    match &schema.kind {
        SchemaNodeKind::Leaf(ty) | SchemaNodeKind::LeafList(ty) => {
            if !node.children.is_empty() {
                return Err(RpcError::new(ErrorType::Application, ErrorTag::BadElement)
                    .with_path(path.to_string())
                    .with_message("leaf node carries child elements"));
            }
            let value = node.value.as_deref().unwrap_or("");
            if !ty.accepts(value) {
                return Err(RpcError::new(ErrorType::Application, ErrorTag::InvalidValue)
                    .with_path(path.to_string())
                    .with_message(format!("`{value}` is not a valid {}", ty.name())));
            }
        }
        SchemaNodeKind::Container => {
            validate_children(node, schema, path)?;
            check_sibling_uniqueness(node, schema, path)?;
        }
        SchemaNodeKind::List { keys } => {
            for key in keys.iter() {
                let present = node
                    .child(key)
                    .map(|k| k.value.is_some())
                    .unwrap_or(false);
                if !present {
                    return Err(RpcError::new(
                        ErrorType::Application,
                        ErrorTag::MissingElement,
                    )
                    .with_path(path.to_string())
                    .with_message(format!("list entry lacks key leaf <{key}>"))
                    .with_info("bad-element", *key));
                }
            }
            validate_children(node, schema, path)?;
            check_sibling_uniqueness(node, schema, path)?;
        }
    }
    Ok(())
}

fn validate_children(node: &DataNode, schema: &SchemaNode, path: &str) -> Result<(), RpcError> {
    for child in &node.children {
        let child_schema = schema.child(&child.name).ok_or_else(|| {
            RpcError::new(ErrorType::Application, ErrorTag::UnknownElement)
                .with_path(format!("{path}/{}", child.name))
        })?;
        // Augmented nodes carry their defining module's namespace; a
        // mismatch means the peer pointed at the wrong module.
        if let Some(ns) = child.namespace.as_deref() {
            if ns != child_schema.namespace && ns != schema.namespace {
                return Err(RpcError::new(ErrorType::Protocol, ErrorTag::UnknownNamespace)
                    .with_path(format!("{path}/{}", child.name))
                    .with_message(format!("unexpected namespace {ns}")));
            }
        }
        validate_node(child, child_schema, &format!("{path}/{}", child.name))?;
    }
    Ok(())
}

/// Non-list siblings must be unique; list entries must have distinct
/// key tuples.
fn check_sibling_uniqueness(
    node: &DataNode,
    schema: &SchemaNode,
    path: &str,
) -> Result<(), RpcError> {
    for (i, child) in node.children.iter().enumerate() {
        let Some(child_schema) = schema.child(&child.name) else {
            continue;
        };
        for other in &node.children[..i] {
            if other.name != child.name {
                continue;
            }
            let duplicate = match &child_schema.kind {
                SchemaNodeKind::List { keys } => keys
                    .iter()
                    .all(|k| child.child_value(k) == other.child_value(k)),
                SchemaNodeKind::LeafList(_) => child.value == other.value,
                _ => true,
            };
            if duplicate {
                return Err(RpcError::new(ErrorType::Application, ErrorTag::BadElement)
                    .with_path(format!("{path}/{}", child.name))
                    .with_message("duplicate sibling entry"));
            }
        }
    }
    Ok(())
}
