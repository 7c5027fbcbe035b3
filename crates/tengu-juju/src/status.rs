//! Typed view of `juju status --format json`

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Markers that identify a nested container machine id (e.g. `1/lxc/0`)
const CONTAINER_MARKERS: [&str; 3] = ["/lxc/", "kvm/", "/lxd/"];

/// Whether a machine id denotes a container rather than a physical host
pub fn is_container(machine_id: &str) -> bool {
    CONTAINER_MARKERS.iter().any(|m| machine_id.contains(m))
}

/// Top-level status document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    #[serde(default)]
    pub machines: BTreeMap<String, MachineStatus>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineStatus {
    #[serde(default, rename = "dns-name", skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub containers: BTreeMap<String, MachineStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charm: Option<String>,
    #[serde(default, rename = "service-status")]
    pub service_status: WorkloadStatus,
    #[serde(default)]
    pub units: BTreeMap<String, UnitStatus>,
}

impl ServiceStatus {
    /// Machines hosting this service's units, deduplicated
    pub fn unit_machines(&self) -> Vec<String> {
        let mut machines: Vec<String> = self
            .units
            .values()
            .filter_map(|u| u.machine.clone())
            .collect();
        machines.sort();
        machines.dedup();
        machines
    }
}

/// Workload status reported by the charm
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    #[serde(default)]
    pub current: String,
    #[serde(default)]
    pub message: String,
}

impl WorkloadStatus {
    pub fn kind(&self) -> StatusKind {
        StatusKind::from(self.current.as_str())
    }

    /// Whether the status is set and its message contains `target`, ignoring case
    pub fn reports(&self, target: &str) -> bool {
        !self.current.is_empty()
            && !self.message.is_empty()
            && self
                .message
                .to_lowercase()
                .contains(&target.to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Active,
    Blocked,
    Maintenance,
    Waiting,
    Error,
    Unknown,
}

impl From<&str> for StatusKind {
    fn from(current: &str) -> Self {
        match current {
            "active" => Self::Active,
            "blocked" => Self::Blocked,
            "maintenance" => Self::Maintenance,
            "waiting" => Self::Waiting,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Maintenance => "maintenance",
            Self::Waiting => "waiting",
            Self::Error => "error",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    /// Subordinate units carry no machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
}

impl StatusDocument {
    /// Machine id -> units placed on it, inverted from the unit -> machine data
    pub fn machine_unit_map(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for service in self.services.values() {
            for (unit, status) in &service.units {
                if let Some(machine) = &status.machine {
                    map.entry(machine.clone()).or_default().push(unit.clone());
                }
            }
        }
        map
    }

    /// Ids of every container, at any nesting depth
    pub fn containers(&self) -> Vec<String> {
        fn collect(machines: &BTreeMap<String, MachineStatus>, out: &mut Vec<String>) {
            for machine in machines.values() {
                out.extend(machine.containers.keys().cloned());
                collect(&machine.containers, out);
            }
        }

        let mut out = vec![];
        collect(&self.machines, &mut out);
        out
    }
}
