//! Typed description of the target host network
//!
//! A [`Topology`] is a set of [`NetworkPlane`]s, one per [`PlaneName`].
//! Each plane is a bond over one or more physical interfaces, plugged into
//! a bridge either directly (untagged) or through a VLAN sub-interface
//! (tagged).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Linux interface names are limited to IFNAMSIZ - 1 bytes.
pub const MAX_IFNAME_LEN: usize = 15;

/// Identity of a network plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaneName {
    Storage,
    Management,
    Public,
}

impl PlaneName {
    /// Order in which planes are built
    pub const BUILD_ORDER: [PlaneName; 3] =
        [PlaneName::Storage, PlaneName::Management, PlaneName::Public];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Management => "management",
            Self::Public => "public",
        }
    }
}

impl fmt::Display for PlaneName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaneName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "storage" => Ok(Self::Storage),
            "management" | "mgmt" => Ok(Self::Management),
            "public" => Ok(Self::Public),
            other => Err(Error::invalid(format!("unknown plane '{other}'"))),
        }
    }
}

/// Whether frames on the plane's switch port carry an 802.1Q tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaneMode {
    Tagged,
    Untagged,
}

/// Kernel bonding mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BondMode {
    #[default]
    ActiveBackup,
    #[serde(rename = "802.3ad", alias = "lacp")]
    Lacp,
    BalanceAlb,
    BalanceTlb,
}

impl BondMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActiveBackup => "active-backup",
            Self::Lacp => "802.3ad",
            Self::BalanceAlb => "balance-alb",
            Self::BalanceTlb => "balance-tlb",
        }
    }

    /// Value for the `bond.options` connection property
    pub fn options(&self) -> String {
        format!("mode={},miimon=100", self.as_str())
    }
}

impl fmt::Display for BondMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An address with prefix length, e.g. `10.1.41.10/24`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    address: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn new(address: IpAddr, prefix: u8) -> Result<Self> {
        let max = if address.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(Error::Parse {
                message: format!("prefix /{prefix} out of range for {address}"),
            });
        }
        Ok(Self { address, prefix })
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }
}

impl FromStr for Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(|| Error::Parse {
            message: format!("'{s}' is not in address/prefix form"),
        })?;
        let address: IpAddr = addr.parse().map_err(|_| Error::Parse {
            message: format!("'{addr}' is not an IP address"),
        })?;
        let prefix: u8 = prefix.parse().map_err(|_| Error::Parse {
            message: format!("'{prefix}' is not a prefix length"),
        })?;
        Self::new(address, prefix)
    }
}

impl TryFrom<String> for Cidr {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Cidr> for String {
    fn from(value: Cidr) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

fn default_mtu() -> u32 {
    1500
}

/// One plane of the host network: bond, slaves, bridge and addressing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkPlane {
    pub name: PlaneName,
    pub bond: String,
    /// Physical interfaces enslaved to the bond, in attach order
    pub slaves: Vec<String>,
    pub bridge: String,
    pub mode: PlaneMode,
    /// VLAN id; set iff `mode` is tagged
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    /// Bridge address; public bridges are usually address-less
    #[serde(default)]
    pub ip: Option<Cidr>,
    #[serde(default)]
    pub gateway: Option<IpAddr>,
    #[serde(default)]
    pub dns: Vec<IpAddr>,
    #[serde(default)]
    pub bond_mode: BondMode,
}

impl NetworkPlane {
    /// Untagged plane with no addressing, mainly for building topologies in code
    pub fn untagged(
        name: PlaneName,
        bond: impl Into<String>,
        slaves: &[&str],
        bridge: impl Into<String>,
        mtu: u32,
    ) -> Self {
        Self {
            name,
            bond: bond.into(),
            slaves: slaves.iter().map(|s| s.to_string()).collect(),
            bridge: bridge.into(),
            mode: PlaneMode::Untagged,
            vlan: None,
            mtu,
            ip: None,
            gateway: None,
            dns: Vec::new(),
            bond_mode: BondMode::default(),
        }
    }

    /// Tagged plane with no addressing
    pub fn tagged(
        name: PlaneName,
        bond: impl Into<String>,
        slaves: &[&str],
        bridge: impl Into<String>,
        vlan: u16,
        mtu: u32,
    ) -> Self {
        Self {
            mode: PlaneMode::Tagged,
            vlan: Some(vlan),
            ..Self::untagged(name, bond, slaves, bridge, mtu)
        }
    }

    pub fn with_ip(mut self, ip: Cidr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_dns(mut self, dns: Vec<IpAddr>) -> Self {
        self.dns = dns;
        self
    }

    pub fn is_tagged(&self) -> bool {
        self.mode == PlaneMode::Tagged
    }

    /// Whether the bridge gets an address or gateway assigned. Validation
    /// rejects a gateway or DNS servers without an address.
    pub fn has_addressing(&self) -> bool {
        self.ip.is_some() || self.gateway.is_some()
    }

    /// Connection name for a bond slave
    pub fn slave_connection(&self, interface: &str) -> String {
        format!("{}-slave-{}", self.bond, interface)
    }

    /// Connection name of the VLAN sub-interface, if tagged
    pub fn vlan_connection(&self) -> Option<String> {
        self.vlan.map(|id| format!("{}-vlan{}", self.bond, id))
    }

    /// Kernel interface name of the VLAN sub-interface, if tagged
    pub fn vlan_interface(&self) -> Option<String> {
        self.vlan.map(|id| format!("{}.{}", self.bond, id))
    }

    /// Every connection name this plane defines
    pub fn connection_names(&self) -> Vec<String> {
        let mut names = vec![self.bond.clone()];
        names.extend(self.slaves.iter().map(|s| self.slave_connection(s)));
        names.push(self.bridge.clone());
        names.extend(self.vlan_connection());
        names
    }

    /// Check the per-plane invariants
    pub fn validate(&self) -> Result<()> {
        let plane = self.name;
        match (self.mode, self.vlan) {
            (PlaneMode::Tagged, None) => {
                return Err(Error::invalid(format!(
                    "{plane} plane is tagged but has no vlan id"
                )));
            }
            (PlaneMode::Untagged, Some(id)) => {
                return Err(Error::invalid(format!(
                    "{plane} plane is untagged but sets vlan {id}"
                )));
            }
            (PlaneMode::Tagged, Some(id)) if !(1..=4094).contains(&id) => {
                return Err(Error::invalid(format!(
                    "{plane} plane vlan {id} is outside 1-4094"
                )));
            }
            _ => {}
        }

        if self.slaves.is_empty() {
            return Err(Error::invalid(format!(
                "{plane} plane has no physical slaves"
            )));
        }
        if self.mtu == 0 {
            return Err(Error::invalid(format!("{plane} plane mtu must be positive")));
        }
        if self.ip.is_none() {
            if let Some(gateway) = self.gateway {
                return Err(Error::invalid(format!(
                    "{plane} plane sets gateway {gateway} but has no ip address"
                )));
            }
            if !self.dns.is_empty() {
                return Err(Error::invalid(format!(
                    "{plane} plane sets dns servers but has no ip address"
                )));
            }
        }

        let mut ifnames: Vec<&str> = vec![self.bond.as_str(), self.bridge.as_str()];
        ifnames.extend(self.slaves.iter().map(String::as_str));
        for name in ifnames {
            if name.is_empty() || name.len() > MAX_IFNAME_LEN || name.contains(['/', ' ', ':']) {
                return Err(Error::invalid(format!(
                    "{plane} plane interface name '{name}' is not a valid interface name"
                )));
            }
        }
        if let Some(vlan_if) = self.vlan_interface()
            && vlan_if.len() > MAX_IFNAME_LEN
        {
            return Err(Error::invalid(format!(
                "{plane} plane vlan interface '{vlan_if}' exceeds {MAX_IFNAME_LEN} characters"
            )));
        }

        let mut seen = BTreeSet::new();
        for slave in &self.slaves {
            if !seen.insert(slave) {
                return Err(Error::invalid(format!(
                    "{plane} plane lists slave {slave} twice"
                )));
            }
        }
        Ok(())
    }
}

/// The full target network: one plane per [`PlaneName`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topology {
    planes: Vec<NetworkPlane>,
}

impl Topology {
    /// Build a topology without validating it.
    ///
    /// The compiler validates before producing a plan; use [`Topology::validated`]
    /// to fail earlier.
    pub fn new(planes: Vec<NetworkPlane>) -> Self {
        Self { planes }
    }

    /// Build and fully validate a topology
    pub fn validated(planes: Vec<NetworkPlane>) -> Result<Self> {
        let topology = Self::new(planes);
        topology.validate()?;
        topology.check_names()?;
        Ok(topology)
    }

    /// Planes in input order
    pub fn planes(&self) -> &[NetworkPlane] {
        &self.planes
    }

    pub fn plane(&self, name: PlaneName) -> Option<&NetworkPlane> {
        self.planes.iter().find(|p| p.name == name)
    }

    /// Planes in the fixed build order: storage, management, public
    pub fn in_build_order(&self) -> impl Iterator<Item = &NetworkPlane> {
        PlaneName::BUILD_ORDER
            .into_iter()
            .filter_map(|name| self.plane(name))
    }

    /// The plane that owns the default gateway
    pub fn gateway_plane(&self) -> Option<&NetworkPlane> {
        self.in_build_order().find(|p| p.gateway.is_some())
    }

    /// The default gateway address
    pub fn default_gateway(&self) -> Option<IpAddr> {
        self.gateway_plane().and_then(|p| p.gateway)
    }

    /// Every physical interface used as a slave
    pub fn physical_slaves(&self) -> impl Iterator<Item = &str> {
        self.planes
            .iter()
            .flat_map(|p| p.slaves.iter().map(String::as_str))
    }

    /// Find the plane that defines a connection or interface name
    pub fn plane_for(&self, name: &str) -> Option<PlaneName> {
        self.planes
            .iter()
            .find(|p| {
                p.connection_names().iter().any(|n| n == name)
                    || p.slaves.iter().any(|s| s == name)
                    || p.vlan_interface().as_deref() == Some(name)
            })
            .map(|p| p.name)
    }

    /// Check structural invariants.
    ///
    /// Fails with [`Error::InvalidTopology`].
    pub fn validate(&self) -> Result<()> {
        if self.planes.is_empty() {
            return Err(Error::invalid("topology has no planes"));
        }

        let mut names = BTreeSet::new();
        for plane in &self.planes {
            if !names.insert(plane.name) {
                return Err(Error::invalid(format!(
                    "{} plane is defined more than once",
                    plane.name
                )));
            }
            plane.validate()?;
        }

        if self.plane(PlaneName::Management).is_none() {
            return Err(Error::invalid(
                "topology has no management plane to fall back to",
            ));
        }

        let gateways: Vec<_> = self
            .planes
            .iter()
            .filter(|p| p.gateway.is_some())
            .map(|p| p.name.as_str())
            .collect();
        match gateways.len() {
            1 => Ok(()),
            0 => Err(Error::invalid("no plane owns the default gateway")),
            _ => Err(Error::invalid(format!(
                "default gateway is set on several planes: {}",
                gateways.join(", ")
            ))),
        }
    }

    /// Check that interface and connection names do not collide across planes.
    ///
    /// Fails with [`Error::Compile`].
    pub fn check_names(&self) -> Result<()> {
        let mut owner: std::collections::BTreeMap<String, PlaneName> =
            std::collections::BTreeMap::new();

        for plane in &self.planes {
            let mut claimed = plane.connection_names();
            claimed.extend(plane.slaves.iter().cloned());
            claimed.extend(plane.vlan_interface());

            let mut local = BTreeSet::new();
            for name in claimed {
                if !local.insert(name.clone()) {
                    return Err(Error::compile(format!(
                        "name {name} is used twice in the {} plane",
                        plane.name
                    )));
                }
                if let Some(other) = owner.insert(name.clone(), plane.name) {
                    return Err(Error::compile(format!(
                        "name {name} is used by both the {other} and {} planes",
                        plane.name
                    )));
                }
            }
        }
        Ok(())
    }
}
