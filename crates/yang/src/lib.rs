//! Schema registry and data-tree codec for netd.
//!
//! Everything that crosses a NETCONF session is a tree of nodes checked
//! against the loaded YANG modules: this crate owns the schema registry
//! (C1), the generic data tree and its XML codec, the typed
//! request/response/error/filter layer on top (C2), and the pure tree
//! algorithms the datastores build on (subtree/xpath filtering,
//! edit-config operations, validation).

pub mod edit;
pub mod filter;
pub mod message;
pub mod path;
pub mod schema;
pub mod tree;
pub mod validate;
pub mod xml;
pub mod yanglib;

pub use message::{
    Commit, Datastore, EditConfig, ErrorSeverity, ErrorTag, ErrorType, Filter, Hello, Message,
    Request, Response, RpcError,
};
pub use path::Path;
pub use schema::{SchemaError, SchemaRegistry};
pub use tree::DataNode;
pub use xml::CodecError;

/// The NETCONF base namespace every envelope lives in.
pub const NETCONF_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// Namespace of the ietf-netconf-monitoring module (`get-schema`).
pub const MONITORING_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring";
