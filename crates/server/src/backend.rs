//! Native backend interface.
//!
//! The backend is the external collaborator that reads and programs the
//! host network stack. The daemon only ever talks to this trait;
//! platform implementations register under the `native-backend`
//! extension capability. Two are built in: `null` (accepts everything,
//! enumerates nothing) and `memory` (records applies, scriptable
//! failures; the test double).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use netd_domain::config::BackendKind;
use netd_domain::descriptor::{
    InterfaceDescriptor, RouteDescriptor, VrfDescriptor,
};
use netd_yang::tree::DataNode;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct ApplyError {
    pub reason: String,
}

impl ApplyError {
    pub fn new(reason: impl Into<String>) -> Self {
        ApplyError {
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait NativeBackend: Send + Sync {
    async fn enumerate_interfaces(&self) -> Result<Vec<InterfaceDescriptor>, ApplyError>;
    async fn enumerate_routes(&self) -> Result<Vec<RouteDescriptor>, ApplyError>;
    async fn enumerate_vrfs(&self) -> Result<Vec<VrfDescriptor>, ApplyError>;

    /// Reconcile the host against `new`, given that `previous` is what
    /// was last applied. Both are datastore roots.
    async fn apply_diff(&self, previous: &DataNode, new: &DataNode) -> Result<(), ApplyError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in backends
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accepts every apply and reports an empty host.
pub struct NullBackend;

#[async_trait]
impl NativeBackend for NullBackend {
    async fn enumerate_interfaces(&self) -> Result<Vec<InterfaceDescriptor>, ApplyError> {
        Ok(Vec::new())
    }

    async fn enumerate_routes(&self) -> Result<Vec<RouteDescriptor>, ApplyError> {
        Ok(Vec::new())
    }

    async fn enumerate_vrfs(&self) -> Result<Vec<VrfDescriptor>, ApplyError> {
        Ok(Vec::new())
    }

    async fn apply_diff(&self, _previous: &DataNode, _new: &DataNode) -> Result<(), ApplyError> {
        Ok(())
    }
}

/// In-memory backend: seeded descriptors, a log of applied roots, and
/// scriptable apply failures.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    interfaces: Vec<InterfaceDescriptor>,
    routes: Vec<RouteDescriptor>,
    vrfs: Vec<VrfDescriptor>,
    applied: Vec<DataNode>,
    fail_next: Option<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_interfaces(&self, interfaces: Vec<InterfaceDescriptor>) {
        self.inner.lock().interfaces = interfaces;
    }

    pub fn seed_routes(&self, routes: Vec<RouteDescriptor>) {
        self.inner.lock().routes = routes;
    }

    pub fn seed_vrfs(&self, vrfs: Vec<VrfDescriptor>) {
        self.inner.lock().vrfs = vrfs;
    }

    /// Make the next `apply_diff` fail with the given reason.
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.inner.lock().fail_next = Some(reason.into());
    }

    pub fn applied_count(&self) -> usize {
        self.inner.lock().applied.len()
    }

    pub fn last_applied(&self) -> Option<DataNode> {
        self.inner.lock().applied.last().cloned()
    }
}

#[async_trait]
impl NativeBackend for MemoryBackend {
    async fn enumerate_interfaces(&self) -> Result<Vec<InterfaceDescriptor>, ApplyError> {
        Ok(self.inner.lock().interfaces.clone())
    }

    async fn enumerate_routes(&self) -> Result<Vec<RouteDescriptor>, ApplyError> {
        Ok(self.inner.lock().routes.clone())
    }

    async fn enumerate_vrfs(&self) -> Result<Vec<VrfDescriptor>, ApplyError> {
        Ok(self.inner.lock().vrfs.clone())
    }

    async fn apply_diff(&self, _previous: &DataNode, new: &DataNode) -> Result<(), ApplyError> {
        let mut state = self.inner.lock();
        if let Some(reason) = state.fail_next.take() {
            return Err(ApplyError::new(reason));
        }
        state.applied.push(new.clone());
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Extension mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Capability → implementation map, the shape the extension loader
/// fills in. Only `native-backend` implementations exist today.
pub struct BackendRegistry {
    backends: HashMap<&'static str, Arc<dyn NativeBackend>>,
}

impl BackendRegistry {
    pub fn builtin() -> Self {
        let mut backends: HashMap<&'static str, Arc<dyn NativeBackend>> = HashMap::new();
        backends.insert("null", Arc::new(NullBackend));
        backends.insert("memory", Arc::new(MemoryBackend::new()));
        BackendRegistry { backends }
    }

    pub fn select(&self, kind: BackendKind) -> Arc<dyn NativeBackend> {
        let name = match kind {
            BackendKind::Null => "null",
            BackendKind::Memory => "memory",
        };
        Arc::clone(
            self.backends
                .get(name)
                .expect("builtin backends always registered"),
        )
    }

    pub fn register(&mut self, name: &'static str, backend: Arc<dyn NativeBackend>) {
        self.backends.insert(name, backend);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Descriptor → tree builders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const IF_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-interfaces";
const IP_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-ip";
const RT_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-routing";
const NI_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-network-instance";

/// Build a full configuration forest from backend enumerations. Used to
/// seed the startup store when no startup document exists yet.
pub async fn enumerate_to_forest(
    backend: &dyn NativeBackend,
) -> Result<Vec<DataNode>, ApplyError> {
    let mut forest = Vec::new();

    let interfaces = backend.enumerate_interfaces().await?;
    if !interfaces.is_empty() {
        let mut root = DataNode::container("interfaces").with_namespace(IF_NS);
        for descriptor in &interfaces {
            root.push(interface_entry(descriptor, false));
        }
        forest.push(root);
    }

    let routes = backend.enumerate_routes().await?;
    if !routes.is_empty() {
        let mut static_routes = DataNode::container("static-routes");
        for route in &routes {
            static_routes.push(route_entry(route));
        }
        forest.push(
            DataNode::container("routing")
                .with_namespace(RT_NS)
                .with_child(static_routes),
        );
    }

    let vrfs = backend.enumerate_vrfs().await?;
    if !vrfs.is_empty() {
        let mut root = DataNode::container("network-instances").with_namespace(NI_NS);
        for vrf in &vrfs {
            root.push(vrf_entry(vrf));
        }
        forest.push(root);
    }

    Ok(forest)
}

/// Render one interface descriptor; `with_state` adds `oper-status`.
pub fn interface_entry(descriptor: &InterfaceDescriptor, with_state: bool) -> DataNode {
    let mut entry = DataNode::container("interface")
        .with_child(DataNode::leaf("name", &descriptor.name))
        .with_child(DataNode::leaf("type", &descriptor.if_type))
        .with_child(DataNode::leaf("enabled", descriptor.enabled.to_string()));
    if let Some(description) = &descriptor.description {
        entry.push(DataNode::leaf("description", description));
    }
    if with_state {
        entry.push(DataNode::leaf(
            "oper-status",
            descriptor.oper_status.as_str(),
        ));
    }
    if !descriptor.addresses.is_empty() {
        let mut ipv4 = DataNode::container("ipv4").with_namespace(IP_NS);
        for address in &descriptor.addresses {
            ipv4.push(
                DataNode::container("address")
                    .with_child(DataNode::leaf("ip", &address.ip))
                    .with_child(DataNode::leaf(
                        "prefix-length",
                        address.prefix_length.to_string(),
                    )),
            );
        }
        entry.push(ipv4);
    }
    entry
}

fn route_entry(route: &RouteDescriptor) -> DataNode {
    let mut entry = DataNode::container("route")
        .with_child(DataNode::leaf("destination-prefix", &route.destination));
    if let Some(next_hop) = &route.next_hop {
        entry.push(DataNode::leaf("next-hop", next_hop));
    }
    if let Some(interface) = &route.outgoing_interface {
        entry.push(DataNode::leaf("outgoing-interface", interface));
    }
    if let Some(metric) = route.metric {
        entry.push(DataNode::leaf("metric", metric.to_string()));
    }
    entry
}

fn vrf_entry(vrf: &VrfDescriptor) -> DataNode {
    let mut entry =
        DataNode::container("network-instance").with_child(DataNode::leaf("name", &vrf.name));
    if let Some(description) = &vrf.description {
        entry.push(DataNode::leaf("description", description));
    }
    for interface in &vrf.interfaces {
        entry.push(DataNode::leaf("interface", interface));
    }
    entry
}

/// Overlay operational state onto a configuration snapshot for `get`:
/// `oper-status` on configured interfaces, plus entries for interfaces
/// the host has but the config does not mention.
pub async fn merge_operational(
    data_root: &mut DataNode,
    backend: &dyn NativeBackend,
) -> Result<(), ApplyError> {
    let descriptors = backend.enumerate_interfaces().await?;
    if descriptors.is_empty() {
        return Ok(());
    }

    if data_root.child("interfaces").is_none() {
        data_root.push(DataNode::container("interfaces").with_namespace(IF_NS));
    }
    let interfaces = data_root
        .child_mut("interfaces")
        .expect("inserted above");

    for descriptor in &descriptors {
        let existing = interfaces
            .children
            .iter_mut()
            .find(|c| c.name == "interface" && c.child_value("name") == Some(&descriptor.name));
        match existing {
            Some(entry) => {
                if entry.child("oper-status").is_none() {
                    entry.push(DataNode::leaf(
                        "oper-status",
                        descriptor.oper_status.as_str(),
                    ));
                }
            }
            None => interfaces.push(interface_entry(descriptor, true)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netd_domain::descriptor::OperStatus;

    fn eth0() -> InterfaceDescriptor {
        InterfaceDescriptor {
            name: "eth0".into(),
            if_type: "ethernetCsmacd".into(),
            enabled: true,
            oper_status: OperStatus::Up,
            description: None,
            addresses: Vec::new(),
        }
    }

    #[tokio::test]
    async fn memory_backend_records_and_rejects() {
        let backend = MemoryBackend::new();
        let root = DataNode::container("data");
        backend.apply_diff(&root, &root).await.unwrap();
        assert_eq!(backend.applied_count(), 1);

        backend.reject_next("vrf not supported");
        let err = backend.apply_diff(&root, &root).await.unwrap_err();
        assert_eq!(err.reason, "vrf not supported");
        // Failure is one-shot.
        backend.apply_diff(&root, &root).await.unwrap();
        assert_eq!(backend.applied_count(), 2);
    }

    #[tokio::test]
    async fn merge_operational_adds_status_and_unconfigured() {
        let backend = MemoryBackend::new();
        backend.seed_interfaces(vec![eth0(), {
            let mut lo = eth0();
            lo.name = "lo0".into();
            lo.if_type = "softwareLoopback".into();
            lo
        }]);

        // eth0 configured, lo0 only present on the host.
        let mut root = DataNode::container("data").with_child(
            DataNode::container("interfaces")
                .with_namespace(IF_NS)
                .with_child(
                    DataNode::container("interface")
                        .with_child(DataNode::leaf("name", "eth0"))
                        .with_child(DataNode::leaf("enabled", "true")),
                ),
        );
        merge_operational(&mut root, &backend).await.unwrap();

        let interfaces = root.child("interfaces").unwrap();
        let eth0 = interfaces
            .find_entry("interface", &[("name".into(), "eth0".into())])
            .unwrap();
        assert_eq!(eth0.child_value("oper-status"), Some("up"));
        assert!(interfaces
            .find_entry("interface", &[("name".into(), "lo0".into())])
            .is_some());
    }

    #[tokio::test]
    async fn enumerate_to_forest_builds_all_roots() {
        let backend = MemoryBackend::new();
        backend.seed_interfaces(vec![eth0()]);
        backend.seed_routes(vec![RouteDescriptor {
            destination: "0.0.0.0/0".into(),
            next_hop: Some("192.0.2.254".into()),
            outgoing_interface: Some("eth0".into()),
            metric: Some(10),
            vrf: None,
        }]);
        backend.seed_vrfs(vec![VrfDescriptor {
            name: "mgmt".into(),
            description: None,
            interfaces: vec!["eth0".into()],
        }]);

        let forest = enumerate_to_forest(&backend).await.unwrap();
        assert_eq!(forest.len(), 3);
        assert_eq!(forest[0].name, "interfaces");
        assert_eq!(forest[1].name, "routing");
        assert_eq!(forest[2].name, "network-instances");
    }
}
