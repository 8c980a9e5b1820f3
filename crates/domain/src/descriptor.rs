//! Descriptors exchanged with native backends.
//!
//! Field names follow the standard YANG models for interfaces
//! (ietf-interfaces), routes (ietf-routing), and routing instances
//! (ietf-network-instance), so backend enumerations map 1:1 onto the
//! operational data trees the server serves.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interfaces
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    pub name: String,
    /// ianaift identity suffix, e.g. `ethernetCsmacd`, `softwareLoopback`.
    pub if_type: String,
    pub enabled: bool,
    pub oper_status: OperStatus,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub addresses: Vec<AddressDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperStatus {
    Up,
    Down,
    Testing,
    Unknown,
    Dormant,
    NotPresent,
    LowerLayerDown,
}

impl OperStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperStatus::Up => "up",
            OperStatus::Down => "down",
            OperStatus::Testing => "testing",
            OperStatus::Unknown => "unknown",
            OperStatus::Dormant => "dormant",
            OperStatus::NotPresent => "not-present",
            OperStatus::LowerLayerDown => "lower-layer-down",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressDescriptor {
    pub ip: String,
    pub prefix_length: u8,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    /// Destination prefix, e.g. `10.0.0.0/8` or `::/0`.
    pub destination: String,
    #[serde(default)]
    pub next_hop: Option<String>,
    #[serde(default)]
    pub outgoing_interface: Option<String>,
    #[serde(default)]
    pub metric: Option<u32>,
    /// Owning routing instance; `None` is the default VRF.
    #[serde(default)]
    pub vrf: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing instances
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Interfaces bound to this instance.
    #[serde(default)]
    pub interfaces: Vec<String>,
}
