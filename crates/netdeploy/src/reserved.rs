//! Registry of connection names owned by this tool
//!
//! Cleanup only ever deletes connections the registry claims: the
//! conventional `bond*`, `cloudbr*` and `*vlan*` names, the rescue
//! connection, and the exact names a topology is about to (re)create.

use crate::topology::Topology;
use std::collections::BTreeSet;
use std::fmt;

/// Name of the emergency management connection
pub const RESCUE_CONNECTION: &str = "rescue-mgmt";

/// Why a name is claimed by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservedReason {
    /// Starts with a reserved prefix
    Prefix(String),
    /// Contains a reserved infix
    Infix(String),
    /// Is the rescue connection
    Rescue,
    /// Is a name the topology defines or a physical slave it reuses
    Topology,
}

impl fmt::Display for ReservedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix(p) => write!(f, "reserved prefix '{p}'"),
            Self::Infix(i) => write!(f, "reserved infix '{i}'"),
            Self::Rescue => write!(f, "rescue connection"),
            Self::Topology => write!(f, "defined by topology"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReservedNames {
    prefixes: Vec<String>,
    infixes: Vec<String>,
    exact: BTreeSet<String>,
}

impl ReservedNames {
    /// The conventional registry: `bond*`, `cloudbr*`, `*vlan*`, `rescue-mgmt`
    pub fn standard() -> Self {
        Self {
            prefixes: vec!["bond".into(), "cloudbr".into()],
            infixes: vec!["vlan".into()],
            exact: BTreeSet::new(),
        }
    }

    /// Standard registry plus every name the topology defines and every
    /// physical slave it reuses
    pub fn for_topology(topology: &Topology) -> Self {
        let mut names = Self::standard();
        for plane in topology.planes() {
            names.exact.extend(plane.connection_names());
        }
        names
            .exact
            .extend(topology.physical_slaves().map(str::to_string));
        names
    }

    /// Return why `name` is reserved, or `None` if the tool must not touch it
    pub fn matches(&self, name: &str) -> Option<ReservedReason> {
        if name == RESCUE_CONNECTION {
            return Some(ReservedReason::Rescue);
        }
        if self.exact.contains(name) {
            return Some(ReservedReason::Topology);
        }
        if let Some(p) = self.prefixes.iter().find(|p| name.starts_with(p.as_str())) {
            return Some(ReservedReason::Prefix(p.clone()));
        }
        self.infixes
            .iter()
            .find(|i| name.contains(i.as_str()))
            .map(|i| ReservedReason::Infix(i.clone()))
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.matches(name).is_some()
    }
}

impl Default for ReservedNames {
    fn default() -> Self {
        Self::standard()
    }
}
