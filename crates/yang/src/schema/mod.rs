//! The schema registry (process-wide catalog of loaded YANG modules).
//!
//! Built once at startup from the bundled module table, then shared
//! read-only behind an `Arc`. Each module carries its compiled
//! schema-node tree plus the YANG source text served by `get-schema`.

mod modules;

use netd_domain::capability::module_capability_uri;

use crate::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("schema module not found: {name}{}", fmt_revision(.revision))]
    SchemaNotFound {
        name: String,
        revision: Option<String>,
    },

    #[error("schema conflict: module {name} loaded at revision {loaded}, requested {requested}")]
    SchemaConflict {
        name: String,
        loaded: String,
        requested: String,
    },

    #[error("no schema node at {0}")]
    NodeNotFound(String),
}

fn fmt_revision(revision: &Option<String>) -> String {
    match revision {
        Some(r) => format!("@{r}"),
        None => String::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Leaf value types used by the bundled modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafType {
    String,
    Boolean,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Enumeration(&'static [&'static str]),
}

impl LeafType {
    /// Check a lexical value against the type.
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            LeafType::String => true,
            LeafType::Boolean => matches!(value, "true" | "false"),
            LeafType::Uint8 => value.parse::<u8>().is_ok(),
            LeafType::Uint16 => value.parse::<u16>().is_ok(),
            LeafType::Uint32 => value.parse::<u32>().is_ok(),
            LeafType::Uint64 => value.parse::<u64>().is_ok(),
            LeafType::Int8 => value.parse::<i8>().is_ok(),
            LeafType::Int16 => value.parse::<i16>().is_ok(),
            LeafType::Int32 => value.parse::<i32>().is_ok(),
            LeafType::Int64 => value.parse::<i64>().is_ok(),
            LeafType::Enumeration(variants) => variants.contains(&value),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LeafType::String => "string",
            LeafType::Boolean => "boolean",
            LeafType::Uint8 => "uint8",
            LeafType::Uint16 => "uint16",
            LeafType::Uint32 => "uint32",
            LeafType::Uint64 => "uint64",
            LeafType::Int8 => "int8",
            LeafType::Int16 => "int16",
            LeafType::Int32 => "int32",
            LeafType::Int64 => "int64",
            LeafType::Enumeration(_) => "enumeration",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaNodeKind {
    Container,
    Leaf(LeafType),
    LeafList(LeafType),
    List { keys: Vec<&'static str> },
}

/// One node in a module's compiled schema tree.
#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub name: &'static str,
    /// Defining module's namespace. Differs from the parent's for
    /// augmented nodes (e.g. ietf-ip under ietf-interfaces).
    pub namespace: &'static str,
    pub kind: SchemaNodeKind,
    /// `false` for operational state (`config false` in YANG).
    pub config: bool,
    pub children: Vec<SchemaNode>,
}

impl SchemaNode {
    pub fn child(&self, name: &str) -> Option<&SchemaNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, SchemaNodeKind::List { .. })
    }

    pub fn list_keys(&self) -> &[&'static str] {
        match &self.kind {
            SchemaNodeKind::List { keys } => keys,
            _ => &[],
        }
    }

    pub fn leaf_type(&self) -> Option<&LeafType> {
        match &self.kind {
            SchemaNodeKind::Leaf(t) | SchemaNodeKind::LeafList(t) => Some(t),
            _ => None,
        }
    }
}

/// A loaded YANG module.
#[derive(Debug, Clone)]
pub struct SchemaModule {
    pub name: &'static str,
    pub namespace: &'static str,
    pub revision: &'static str,
    pub features: Vec<String>,
    /// Raw YANG source, served by `get-schema`.
    pub source: &'static str,
    /// Top-level data nodes.
    pub roots: Vec<SchemaNode>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct SchemaRegistry {
    modules: Vec<SchemaModule>,
}

impl SchemaRegistry {
    /// Registry with every bundled module loaded.
    pub fn bundled() -> Self {
        SchemaRegistry {
            modules: modules::bundled_modules(),
        }
    }

    /// Look up a module, optionally pinning a revision. A revision
    /// mismatch against the loaded module is a conflict, not a miss.
    pub fn load_module(
        &self,
        name: &str,
        revision: Option<&str>,
    ) -> Result<&SchemaModule, SchemaError> {
        let module = self
            .modules
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| SchemaError::SchemaNotFound {
                name: name.to_string(),
                revision: revision.map(str::to_string),
            })?;
        if let Some(requested) = revision {
            if requested != module.revision {
                return Err(SchemaError::SchemaConflict {
                    name: name.to_string(),
                    loaded: module.revision.to_string(),
                    requested: requested.to_string(),
                });
            }
        }
        Ok(module)
    }

    pub fn modules(&self) -> &[SchemaModule] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&SchemaModule> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn module_for_namespace(&self, namespace: &str) -> Option<&SchemaModule> {
        self.modules.iter().find(|m| m.namespace == namespace)
    }

    /// Capability URIs for every loaded module, in load order.
    pub fn capability_uris(&self) -> Vec<String> {
        self.modules
            .iter()
            .map(|m| module_capability_uri(m.namespace, m.name, m.revision, &m.features))
            .collect()
    }

    /// YANG source text for `get-schema`. `version` must match the
    /// module revision when given.
    pub fn source_text(
        &self,
        identifier: &str,
        version: Option<&str>,
    ) -> Result<&'static str, SchemaError> {
        self.load_module(identifier, version).map(|m| m.source)
    }

    /// Resolve an absolute path to its schema node. The first step picks
    /// the module (by prefix when present, else by root-name search).
    pub fn resolve(&self, path: &Path) -> Result<&SchemaNode, SchemaError> {
        let mut steps = path.steps.iter();
        let first = steps
            .next()
            .ok_or_else(|| SchemaError::NodeNotFound(path.to_string()))?;

        let root = match &first.module {
            Some(module_name) => self
                .module(module_name)
                .ok_or_else(|| SchemaError::SchemaNotFound {
                    name: module_name.clone(),
                    revision: None,
                })?
                .roots
                .iter()
                .find(|r| r.name == first.name),
            None => self
                .modules
                .iter()
                .flat_map(|m| m.roots.iter())
                .find(|r| r.name == first.name),
        }
        .ok_or_else(|| SchemaError::NodeNotFound(path.to_string()))?;

        let mut node = root;
        for step in steps {
            node = node
                .child(&step.name)
                .ok_or_else(|| SchemaError::NodeNotFound(path.to_string()))?;
        }
        Ok(node)
    }

    /// Schema root for a (namespace, name) pair, used when descending
    /// into an operation body.
    pub fn root(&self, namespace: &str, name: &str) -> Option<&SchemaNode> {
        self.module_for_namespace(namespace)
            .and_then(|m| m.roots.iter().find(|r| r.name == name))
            .or_else(|| {
                // Augmented roots keep their defining module's namespace.
                self.modules
                    .iter()
                    .flat_map(|m| m.roots.iter())
                    .find(|r| r.name == name && r.namespace == namespace)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_has_interfaces() {
        let reg = SchemaRegistry::bundled();
        let module = reg.module("ietf-interfaces").unwrap();
        assert_eq!(module.revision, "2018-02-20");
        assert!(module.source.contains("module ietf-interfaces"));
    }

    #[test]
    fn load_module_conflict_on_wrong_revision() {
        let reg = SchemaRegistry::bundled();
        assert!(reg.load_module("ietf-interfaces", Some("2018-02-20")).is_ok());
        let err = reg
            .load_module("ietf-interfaces", Some("1999-01-01"))
            .unwrap_err();
        assert!(matches!(err, SchemaError::SchemaConflict { .. }));
        let err = reg.load_module("ietf-frobnicator", None).unwrap_err();
        assert!(matches!(err, SchemaError::SchemaNotFound { .. }));
    }

    #[test]
    fn resolve_interface_list() {
        let reg = SchemaRegistry::bundled();
        let path = Path::parse("/ietf-interfaces:interfaces/interface").unwrap();
        let node = reg.resolve(&path).unwrap();
        assert!(node.is_list());
        assert_eq!(node.list_keys(), ["name"]);
    }

    #[test]
    fn capability_uris_cover_all_modules() {
        let reg = SchemaRegistry::bundled();
        let uris = reg.capability_uris();
        assert_eq!(uris.len(), reg.modules().len());
        assert!(uris
            .iter()
            .any(|u| u.contains("module=ietf-yang-library")));
    }

    #[test]
    fn leaf_types_accept_and_reject() {
        assert!(LeafType::Boolean.accepts("true"));
        assert!(!LeafType::Boolean.accepts("yes"));
        assert!(LeafType::Uint8.accepts("255"));
        assert!(!LeafType::Uint8.accepts("256"));
        assert!(LeafType::Enumeration(&["up", "down"]).accepts("up"));
        assert!(!LeafType::Enumeration(&["up", "down"]).accepts("sideways"));
    }
}
