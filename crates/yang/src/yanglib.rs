//! YANG library (RFC 8525 legacy `modules-state`) tree builder.

use crate::schema::SchemaRegistry;
use crate::tree::DataNode;

const YANGLIB_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-yang-library";

/// Build `/ietf-yang-library:modules-state` for the loaded registry.
/// Served under `get`; the module-set-id is a stable digest of the
/// loaded module list, so clients can cache across reconnects.
pub fn modules_state(registry: &SchemaRegistry) -> DataNode {
    let mut root = DataNode::container("modules-state")
        .with_namespace(YANGLIB_NS)
        .with_child(DataNode::leaf("module-set-id", module_set_id(registry)));

    for module in registry.modules() {
        let mut entry = DataNode::container("module")
            .with_child(DataNode::leaf("name", module.name))
            .with_child(DataNode::leaf("revision", module.revision))
            .with_child(DataNode::leaf("namespace", module.namespace))
            .with_child(DataNode::leaf("conformance-type", "implement"));
        for feature in &module.features {
            entry.push(DataNode::leaf("feature", feature));
        }
        root.push(entry);
    }
    root
}

/// FNV-1a over `name@revision` pairs; stable across runs for the same
/// module set.
fn module_set_id(registry: &SchemaRegistry) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for module in registry.modules() {
        for byte in module
            .name
            .bytes()
            .chain(std::iter::once(b'@'))
            .chain(module.revision.bytes())
            .chain(std::iter::once(b';'))
        {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    format!("{hash:016x}")
}
