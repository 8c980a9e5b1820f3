//! edit-config tree operations.
//!
//! Applies an edit forest to a datastore root. Each element may carry
//! an `operation` attribute; absent, the request's default operation
//! applies. The caller owns snapshotting: `rollback-on-error` and
//! `test-only` are implemented above this layer by cloning the root.

use crate::message::{DefaultOperation, ErrorTag, ErrorType, RpcError};
use crate::schema::{SchemaNode, SchemaNodeKind, SchemaRegistry};
use crate::tree::DataNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditOp {
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
    /// `default-operation="none"`: the element is a navigation point.
    None,
}

impl EditOp {
    fn from_default(default: DefaultOperation) -> Self {
        match default {
            DefaultOperation::Merge => EditOp::Merge,
            DefaultOperation::Replace => EditOp::Replace,
            DefaultOperation::None => EditOp::None,
        }
    }

    fn from_attr(value: &str) -> Option<Self> {
        match value {
            "merge" => Some(EditOp::Merge),
            "replace" => Some(EditOp::Replace),
            "create" => Some(EditOp::Create),
            "delete" => Some(EditOp::Delete),
            "remove" => Some(EditOp::Remove),
            _ => None,
        }
    }
}

/// Apply an edit forest (`<config>` children) to a datastore root.
///
/// Returns every error encountered. With `continue_on_error` unset the
/// walk stops at the first error (already-applied siblings stay
/// applied, per `stop-on-error`); set, it records and keeps going.
pub fn apply_edit(
    root: &mut DataNode,
    config: &DataNode,
    default: DefaultOperation,
    continue_on_error: bool,
    registry: &SchemaRegistry,
) -> Vec<RpcError> {
    let mut errors = Vec::new();
    apply_forest(
        root,
        None,
        &config.children,
        EditOp::from_default(default),
        continue_on_error,
        registry,
        "",
        &mut errors,
    );
    errors
}

#[allow(clippy::too_many_arguments)]
fn apply_forest(
    target: &mut DataNode,
    parent_schema: Option<&SchemaNode>,
    config_children: &[DataNode],
    inherited: EditOp,
    continue_on_error: bool,
    registry: &SchemaRegistry,
    path: &str,
    errors: &mut Vec<RpcError>,
) {
    for child in config_children {
        let child_path = format!("{path}/{}", child.name);

        let schema = match resolve_schema(parent_schema, child, registry) {
            Ok(schema) => schema,
            Err(err) => {
                errors.push(err.with_path(child_path));
                if continue_on_error {
                    continue;
                }
                return;
            }
        };

        let op = match child.attr("operation") {
            Some(raw) => match EditOp::from_attr(raw) {
                Some(op) => op,
                None => {
                    errors.push(
                        RpcError::new(ErrorType::Protocol, ErrorTag::BadAttribute)
                            .with_path(child_path)
                            .with_message(format!("bad operation attribute `{raw}`")),
                    );
                    if continue_on_error {
                        continue;
                    }
                    return;
                }
            },
            None => inherited,
        };

        if let Err(err) = apply_node(target, schema, child, op, continue_on_error, registry, &child_path, errors) {
            errors.push(err);
            if !continue_on_error {
                return;
            }
        }
        if !errors.is_empty() && !continue_on_error {
            return;
        }
    }
}

fn resolve_schema<'a>(
    parent_schema: Option<&'a SchemaNode>,
    node: &DataNode,
    registry: &'a SchemaRegistry,
) -> Result<&'a SchemaNode, RpcError> {
    match parent_schema {
        Some(parent) => parent
            .child(&node.name)
            .ok_or_else(|| RpcError::new(ErrorType::Application, ErrorTag::UnknownElement)),
        None => {
            let ns = node.namespace.as_deref().ok_or_else(|| {
                RpcError::new(ErrorType::Protocol, ErrorTag::UnknownNamespace)
            })?;
            registry
                .root(ns, &node.name)
                .ok_or_else(|| RpcError::new(ErrorType::Application, ErrorTag::UnknownElement))
        }
    }
}

/// Locate the index of the target child corresponding to a config node.
fn find_target(target: &DataNode, schema: &SchemaNode, config: &DataNode) -> Option<usize> {
    match &schema.kind {
        SchemaNodeKind::List { keys } => {
            let wanted: Vec<(String, String)> = keys
                .iter()
                .filter_map(|k| {
                    config
                        .child_value(k)
                        .map(|v| (k.to_string(), v.to_string()))
                })
                .collect();
            target.children.iter().position(|c| {
                c.name == config.name
                    && wanted
                        .iter()
                        .all(|(k, v)| c.child_value(k) == Some(v.as_str()))
            })
        }
        SchemaNodeKind::LeafList(_) => target
            .children
            .iter()
            .position(|c| c.name == config.name && c.value == config.value),
        _ => target.children.iter().position(|c| c.name == config.name),
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_node(
    target: &mut DataNode,
    schema: &SchemaNode,
    config: &DataNode,
    op: EditOp,
    continue_on_error: bool,
    registry: &SchemaRegistry,
    path: &str,
    errors: &mut Vec<RpcError>,
) -> Result<(), RpcError> {
    let existing = find_target(target, schema, config);

    match op {
        EditOp::Merge => match existing {
            Some(idx) => {
                let node = &mut target.children[idx];
                if matches!(
                    schema.kind,
                    SchemaNodeKind::Leaf(_) | SchemaNodeKind::LeafList(_)
                ) {
                    node.value = config.value.clone();
                } else {
                    merge_into(node, schema, config, continue_on_error, registry, path, errors);
                }
                Ok(())
            }
            None => {
                target.children.push(config.cloned_without_edit_attrs());
                Ok(())
            }
        },
        EditOp::Replace => {
            if let Some(idx) = existing {
                target.children.remove(idx);
            }
            target.children.push(config.cloned_without_edit_attrs());
            Ok(())
        }
        EditOp::Create => match existing {
            Some(_) => Err(RpcError::data_exists(path.to_string())),
            None => {
                target.children.push(config.cloned_without_edit_attrs());
                Ok(())
            }
        },
        EditOp::Delete => match existing {
            Some(idx) => {
                target.children.remove(idx);
                Ok(())
            }
            None => Err(RpcError::data_missing(path.to_string())),
        },
        EditOp::Remove => {
            if let Some(idx) = existing {
                target.children.remove(idx);
            }
            Ok(())
        }
        EditOp::None => match existing {
            Some(idx) => {
                let node = &mut target.children[idx];
                apply_forest(
                    node,
                    Some(schema),
                    &config.children,
                    EditOp::None,
                    continue_on_error,
                    registry,
                    path,
                    errors,
                );
                Ok(())
            }
            None => Err(RpcError::data_missing(path.to_string())),
        },
    }
}

/// Recursive merge: existing children keep their place, config children
/// descend with the merge operation still in effect.
fn merge_into(
    node: &mut DataNode,
    schema: &SchemaNode,
    config: &DataNode,
    continue_on_error: bool,
    registry: &SchemaRegistry,
    path: &str,
    errors: &mut Vec<RpcError>,
) {
    apply_forest(
        node,
        Some(schema),
        &config.children,
        EditOp::Merge,
        continue_on_error,
        registry,
        path,
        errors,
    );
}
