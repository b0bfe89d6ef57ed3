//! Ordered, immutable deployment plans
//!
//! A [`Plan`] is a cleanup phase followed by a build phase. Every
//! [`OperationStep`] is idempotent against the host and carries the step
//! that undoes it, or a marker that only a snapshot restore can.

use crate::error::{Error, Result};
use crate::topology::{BondMode, Cidr, PlaneName};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::IpAddr;

/// A single change to the host network
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StepKind {
    DeleteConnection {
        name: String,
    },
    CreateBond {
        name: String,
        mode: BondMode,
        mtu: u32,
    },
    AttachSlave {
        connection: String,
        interface: String,
        bond: String,
        mtu: u32,
    },
    CreateBridge {
        name: String,
        mtu: u32,
    },
    AssignIp {
        connection: String,
        address: Option<Cidr>,
        gateway: Option<IpAddr>,
        dns: Vec<IpAddr>,
    },
    /// VLAN sub-interface on a bond, enslaved to a bridge
    CreateVlan {
        connection: String,
        interface: String,
        parent: String,
        vlan: u16,
        bridge: String,
        mtu: u32,
    },
    /// Make a bond a port of a bridge (untagged planes)
    AttachToBridge {
        port: String,
        bridge: String,
    },
    /// Minimal addressed interface directly on the management bond
    CreateRescue {
        connection: String,
        parent: String,
        vlan: Option<u16>,
        address: Option<Cidr>,
        gateway: Option<IpAddr>,
        dns: Vec<IpAddr>,
        mtu: u32,
        bond_mode: BondMode,
    },
    /// Recreate a connection from an archived definition
    ImportConnection {
        name: String,
        file_name: String,
        #[serde(skip)]
        contents: String,
    },
}

impl StepKind {
    /// Short operation label, stable across releases
    pub fn label(&self) -> &'static str {
        match self {
            Self::DeleteConnection { .. } => "delete",
            Self::CreateBond { .. } => "create-bond",
            Self::AttachSlave { .. } => "attach-slave",
            Self::CreateBridge { .. } => "create-bridge",
            Self::AssignIp { .. } => "assign-ip",
            Self::CreateVlan { .. } => "create-vlan",
            Self::AttachToBridge { .. } => "attach-bridge",
            Self::CreateRescue { .. } => "create-rescue",
            Self::ImportConnection { .. } => "import",
        }
    }

    /// The connection the step operates on
    pub fn connection(&self) -> &str {
        match self {
            Self::DeleteConnection { name }
            | Self::CreateBond { name, .. }
            | Self::CreateBridge { name, .. }
            | Self::ImportConnection { name, .. } => name,
            Self::AttachSlave { connection, .. }
            | Self::AssignIp { connection, .. }
            | Self::CreateVlan { connection, .. }
            | Self::CreateRescue { connection, .. } => connection,
            Self::AttachToBridge { port, .. } => port,
        }
    }

    /// Connection or interface this step brings into existence
    pub fn creates(&self) -> Option<&str> {
        match self {
            Self::CreateBond { name, .. } | Self::CreateBridge { name, .. } => Some(name),
            Self::AttachSlave { connection, .. }
            | Self::CreateVlan { connection, .. }
            | Self::CreateRescue { connection, .. } => Some(connection),
            Self::ImportConnection { name, .. } => Some(name),
            Self::DeleteConnection { .. }
            | Self::AssignIp { .. }
            | Self::AttachToBridge { .. } => None,
        }
    }

    /// Names that must already exist when this step runs
    pub fn requires(&self) -> Vec<&str> {
        match self {
            Self::AttachSlave { bond, .. } => vec![bond.as_str()],
            Self::AssignIp { connection, .. } => vec![connection.as_str()],
            Self::CreateVlan { parent, bridge, .. } => vec![parent.as_str(), bridge.as_str()],
            Self::AttachToBridge { port, bridge } => vec![port.as_str(), bridge.as_str()],
            Self::CreateRescue {
                parent,
                vlan: Some(_),
                ..
            } => vec![parent.as_str()],
            Self::CreateRescue { vlan: None, .. } => Vec::new(),
            Self::DeleteConnection { .. }
            | Self::CreateBond { .. }
            | Self::CreateBridge { .. }
            | Self::ImportConnection { .. } => Vec::new(),
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::DeleteConnection { .. })
    }

    /// The step that undoes this one
    pub fn reverse(&self) -> Reversal {
        match self.creates() {
            Some(name) => Reversal::Step(StepKind::DeleteConnection {
                name: name.to_string(),
            }),
            None => Reversal::RequiresSnapshot,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteConnection { name } => write!(f, "delete connection {name}"),
            Self::CreateBond { name, mode, mtu } => {
                write!(f, "create bond {name} ({mode}, mtu {mtu})")
            }
            Self::AttachSlave {
                interface, bond, ..
            } => write!(f, "attach {interface} to bond {bond}"),
            Self::CreateBridge { name, mtu } => write!(f, "create bridge {name} (mtu {mtu})"),
            Self::AssignIp {
                connection,
                address,
                gateway,
                ..
            } => {
                write!(f, "assign ")?;
                match address {
                    Some(addr) => write!(f, "{addr}")?,
                    None => write!(f, "no address")?,
                }
                if let Some(gw) = gateway {
                    write!(f, " gw {gw}")?;
                }
                write!(f, " to {connection}")
            }
            Self::CreateVlan {
                interface,
                vlan,
                parent,
                bridge,
                ..
            } => write!(
                f,
                "create vlan {interface} (id {vlan}) on {parent} into bridge {bridge}"
            ),
            Self::AttachToBridge { port, bridge } => {
                write!(f, "attach {port} to bridge {bridge}")
            }
            Self::CreateRescue {
                connection,
                parent,
                vlan,
                ..
            } => match vlan {
                Some(id) => write!(f, "create rescue {connection} on {parent} (vlan {id})"),
                None => write!(f, "create rescue {connection} on {parent}"),
            },
            Self::ImportConnection { name, .. } => write!(f, "import connection {name}"),
        }
    }
}

/// How a step is undone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reversal {
    Step(StepKind),
    /// Only restoring a snapshot brings back the prior state
    RequiresSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Cleanup,
    Build,
}

/// A step placed in a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationStep {
    pub kind: StepKind,
    pub phase: Phase,
    /// Plane the step belongs to, when it belongs to one
    pub plane: Option<PlaneName>,
    pub reverse: Reversal,
}

impl OperationStep {
    pub fn cleanup(kind: StepKind, plane: Option<PlaneName>) -> Self {
        Self::new(kind, Phase::Cleanup, plane)
    }

    pub fn build(kind: StepKind, plane: Option<PlaneName>) -> Self {
        Self::new(kind, Phase::Build, plane)
    }

    fn new(kind: StepKind, phase: Phase, plane: Option<PlaneName>) -> Self {
        let reverse = kind.reverse();
        Self {
            kind,
            phase,
            plane,
            reverse,
        }
    }
}

impl fmt::Display for OperationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.plane {
            Some(plane) => write!(f, "[{plane}] {}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// An ordered list of steps: cleanup first, then build.
///
/// Plans are produced by the compiler and never change afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    cleanup: Vec<OperationStep>,
    build: Vec<OperationStep>,
}

impl Plan {
    pub(crate) fn new(cleanup: Vec<OperationStep>, build: Vec<OperationStep>) -> Self {
        Self { cleanup, build }
    }

    pub fn cleanup(&self) -> &[OperationStep] {
        &self.cleanup
    }

    pub fn build(&self) -> &[OperationStep] {
        &self.build
    }

    /// All steps in execution order
    pub fn steps(&self) -> impl Iterator<Item = &OperationStep> {
        self.cleanup.iter().chain(self.build.iter())
    }

    pub fn len(&self) -> usize {
        self.cleanup.len() + self.build.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cleanup.is_empty() && self.build.is_empty()
    }

    /// Planes any step is attributed to
    pub fn planes(&self) -> BTreeSet<PlaneName> {
        self.steps().filter_map(|s| s.plane).collect()
    }

    /// Every connection name a step operates on or requires
    pub fn referenced_names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        for step in self.steps() {
            names.insert(step.kind.connection());
            names.extend(step.kind.requires());
        }
        names
    }

    /// Count build steps by label
    pub fn count(&self, label: &str) -> usize {
        self.build.iter().filter(|s| s.kind.label() == label).count()
    }

    /// Verify that anything created by the plan is created before a later
    /// step depends on it, and never created twice.
    pub fn check_ordering(&self) -> Result<()> {
        let created_at: HashMap<&str, usize> = {
            let mut map = HashMap::new();
            for (index, step) in self.steps().enumerate() {
                if let Some(name) = step.kind.creates()
                    && map.insert(name, index).is_some()
                {
                    return Err(Error::compile(format!("{name} is created twice")));
                }
            }
            map
        };

        for (index, step) in self.steps().enumerate() {
            for required in step.kind.requires() {
                if let Some(&created) = created_at.get(required)
                    && created >= index
                {
                    return Err(Error::compile(format!(
                        "step '{}' runs before {required} is created",
                        step.kind
                    )));
                }
            }
        }
        Ok(())
    }
}
