//! The bundled module table.
//!
//! Modules are compiled here programmatically; the matching YANG source
//! under `schemas/` is embedded for `get-schema`. The trees are the
//! subsets netd implements, not the full IETF models; see DESIGN.md.

use super::{LeafType, SchemaModule, SchemaNode, SchemaNodeKind};

pub const NS_INTERFACES: &str = "urn:ietf:params:xml:ns:yang:ietf-interfaces";
pub const NS_IP: &str = "urn:ietf:params:xml:ns:yang:ietf-ip";
pub const NS_ROUTING: &str = "urn:ietf:params:xml:ns:yang:ietf-routing";
pub const NS_NETWORK_INSTANCE: &str = "urn:ietf:params:xml:ns:yang:ietf-network-instance";
pub const NS_YANG_LIBRARY: &str = "urn:ietf:params:xml:ns:yang:ietf-yang-library";
pub const NS_MONITORING: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring";

// ── node builders ───────────────────────────────────────────────────

fn container(name: &'static str, ns: &'static str, children: Vec<SchemaNode>) -> SchemaNode {
    SchemaNode {
        name,
        namespace: ns,
        kind: SchemaNodeKind::Container,
        config: true,
        children,
    }
}

fn list(
    name: &'static str,
    ns: &'static str,
    keys: Vec<&'static str>,
    children: Vec<SchemaNode>,
) -> SchemaNode {
    SchemaNode {
        name,
        namespace: ns,
        kind: SchemaNodeKind::List { keys },
        config: true,
        children,
    }
}

fn leaf(name: &'static str, ns: &'static str, ty: LeafType) -> SchemaNode {
    SchemaNode {
        name,
        namespace: ns,
        kind: SchemaNodeKind::Leaf(ty),
        config: true,
        children: Vec::new(),
    }
}

fn leaf_list(name: &'static str, ns: &'static str, ty: LeafType) -> SchemaNode {
    SchemaNode {
        name,
        namespace: ns,
        kind: SchemaNodeKind::LeafList(ty),
        config: true,
        children: Vec::new(),
    }
}

fn state(mut node: SchemaNode) -> SchemaNode {
    node.config = false;
    node
}

// ── module table ────────────────────────────────────────────────────

pub(super) fn bundled_modules() -> Vec<SchemaModule> {
    vec![
        ietf_interfaces(),
        ietf_ip(),
        ietf_routing(),
        ietf_network_instance(),
        ietf_yang_library(),
        ietf_netconf_monitoring(),
    ]
}

fn ietf_interfaces() -> SchemaModule {
    let ns = NS_INTERFACES;
    let interface = list(
        "interface",
        ns,
        vec!["name"],
        vec![
            leaf("name", ns, LeafType::String),
            leaf("description", ns, LeafType::String),
            leaf("type", ns, LeafType::String),
            leaf("enabled", ns, LeafType::Boolean),
            state(leaf(
                "oper-status",
                ns,
                LeafType::Enumeration(&[
                    "up",
                    "down",
                    "testing",
                    "unknown",
                    "dormant",
                    "not-present",
                    "lower-layer-down",
                ]),
            )),
            // Augmented in by ietf-ip.
            container(
                "ipv4",
                NS_IP,
                vec![
                    leaf("enabled", NS_IP, LeafType::Boolean),
                    list(
                        "address",
                        NS_IP,
                        vec!["ip"],
                        vec![
                            leaf("ip", NS_IP, LeafType::String),
                            leaf("prefix-length", NS_IP, LeafType::Uint8),
                        ],
                    ),
                ],
            ),
        ],
    );
    SchemaModule {
        name: "ietf-interfaces",
        namespace: ns,
        revision: "2018-02-20",
        features: Vec::new(),
        source: include_str!("../../schemas/ietf-interfaces.yang"),
        roots: vec![container("interfaces", ns, vec![interface])],
    }
}

fn ietf_ip() -> SchemaModule {
    // The ipv4 subtree is grafted into ietf-interfaces above; this entry
    // exists so the module is advertised and its source is servable.
    SchemaModule {
        name: "ietf-ip",
        namespace: NS_IP,
        revision: "2018-02-22",
        features: Vec::new(),
        source: include_str!("../../schemas/ietf-ip.yang"),
        roots: Vec::new(),
    }
}

fn ietf_routing() -> SchemaModule {
    let ns = NS_ROUTING;
    let route = list(
        "route",
        ns,
        vec!["destination-prefix"],
        vec![
            leaf("destination-prefix", ns, LeafType::String),
            leaf("next-hop", ns, LeafType::String),
            leaf("outgoing-interface", ns, LeafType::String),
            leaf("metric", ns, LeafType::Uint32),
        ],
    );
    SchemaModule {
        name: "ietf-routing",
        namespace: ns,
        revision: "2018-03-13",
        features: Vec::new(),
        source: include_str!("../../schemas/ietf-routing.yang"),
        roots: vec![container(
            "routing",
            ns,
            vec![container("static-routes", ns, vec![route])],
        )],
    }
}

fn ietf_network_instance() -> SchemaModule {
    let ns = NS_NETWORK_INSTANCE;
    let instance = list(
        "network-instance",
        ns,
        vec!["name"],
        vec![
            leaf("name", ns, LeafType::String),
            leaf("description", ns, LeafType::String),
            leaf_list("interface", ns, LeafType::String),
        ],
    );
    SchemaModule {
        name: "ietf-network-instance",
        namespace: ns,
        revision: "2019-01-21",
        features: Vec::new(),
        source: include_str!("../../schemas/ietf-network-instance.yang"),
        roots: vec![container("network-instances", ns, vec![instance])],
    }
}

fn ietf_yang_library() -> SchemaModule {
    let ns = NS_YANG_LIBRARY;
    let module = list(
        "module",
        ns,
        vec!["name", "revision"],
        vec![
            leaf("name", ns, LeafType::String),
            leaf("revision", ns, LeafType::String),
            leaf("namespace", ns, LeafType::String),
            leaf(
                "conformance-type",
                ns,
                LeafType::Enumeration(&["implement", "import"]),
            ),
            leaf_list("feature", ns, LeafType::String),
        ],
    );
    SchemaModule {
        name: "ietf-yang-library",
        namespace: ns,
        revision: "2019-01-04",
        features: Vec::new(),
        source: include_str!("../../schemas/ietf-yang-library.yang"),
        roots: vec![state(container(
            "modules-state",
            ns,
            vec![leaf("module-set-id", ns, LeafType::String), module],
        ))],
    }
}

fn ietf_netconf_monitoring() -> SchemaModule {
    let ns = NS_MONITORING;
    let schema = list(
        "schema",
        ns,
        vec!["identifier", "version", "format"],
        vec![
            leaf("identifier", ns, LeafType::String),
            leaf("version", ns, LeafType::String),
            leaf("format", ns, LeafType::String),
            leaf("namespace", ns, LeafType::String),
            leaf(
                "location",
                ns,
                LeafType::Enumeration(&["NETCONF"]),
            ),
        ],
    );
    SchemaModule {
        name: "ietf-netconf-monitoring",
        namespace: ns,
        revision: "2010-10-04",
        features: Vec::new(),
        source: include_str!("../../schemas/ietf-netconf-monitoring.yang"),
        roots: vec![state(container(
            "netconf-state",
            ns,
            vec![container("schemas", ns, vec![schema])],
        ))],
    }
}
