//! Side-effect-free comparison of a topology against the host

use crate::reserved::{RESCUE_CONNECTION, ReservedNames};
use crate::topology::{NetworkPlane, PlaneName, Topology};
use crate::types::{ConnectionKind, CurrentState, ExistingConnection, ResourceState};
use serde::Serialize;
use std::collections::BTreeSet;

/// A connection the topology expects, and what the host has
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub name: String,
    pub expected: ConnectionKind,
    pub state: ResourceState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaneStatus {
    pub plane: PlaneName,
    pub connections: Vec<ConnectionStatus>,
}

impl PlaneStatus {
    pub fn is_converged(&self) -> bool {
        self.connections.iter().all(|c| c.state.is_present())
    }
}

/// Counts by state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompareSummary {
    pub present: usize,
    pub absent: usize,
    pub wrong_kind: usize,
    pub unexpected: usize,
}

/// Difference between the desired topology and the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonReport {
    pub planes: Vec<PlaneStatus>,
    /// Connections a deploy would delete that the topology does not define
    pub unexpected: Vec<ExistingConnection>,
    /// The emergency connection is still defined
    pub rescue_active: bool,
}

impl ComparisonReport {
    pub fn is_converged(&self) -> bool {
        !self.rescue_active
            && self.unexpected.is_empty()
            && self.planes.iter().all(PlaneStatus::is_converged)
    }

    pub fn summary(&self) -> CompareSummary {
        let mut summary = CompareSummary {
            unexpected: self.unexpected.len(),
            ..Default::default()
        };
        for status in self.planes.iter().flat_map(|p| &p.connections) {
            match status.state {
                ResourceState::Present => summary.present += 1,
                ResourceState::Absent => summary.absent += 1,
                ResourceState::WrongKind { .. } => summary.wrong_kind += 1,
            }
        }
        summary
    }
}

/// Compare `topology` with the connections in `current`
pub fn compare(topology: &Topology, current: &CurrentState) -> ComparisonReport {
    let planes = topology
        .in_build_order()
        .map(|plane| PlaneStatus {
            plane: plane.name,
            connections: expected(plane)
                .into_iter()
                .map(|(name, kind)| {
                    let state = state_of(current, &name, &kind);
                    ConnectionStatus {
                        name,
                        expected: kind,
                        state,
                    }
                })
                .collect(),
        })
        .collect();

    let defined: BTreeSet<String> = topology
        .planes()
        .iter()
        .flat_map(NetworkPlane::connection_names)
        .collect();
    let slaves: BTreeSet<&str> = topology.physical_slaves().collect();
    let registry = ReservedNames::standard();

    let unexpected = current
        .connections()
        .iter()
        .filter(|conn| conn.name != RESCUE_CONNECTION && !defined.contains(&conn.name))
        .filter(|conn| {
            registry.is_reserved(&conn.name)
                || slaves.contains(conn.name.as_str())
                || conn
                    .device
                    .as_deref()
                    .is_some_and(|device| slaves.contains(device))
        })
        .cloned()
        .collect();

    ComparisonReport {
        planes,
        unexpected,
        rescue_active: current.contains(RESCUE_CONNECTION),
    }
}

fn expected(plane: &NetworkPlane) -> Vec<(String, ConnectionKind)> {
    let mut out = vec![(plane.bond.clone(), ConnectionKind::Bond)];
    out.extend(
        plane
            .slaves
            .iter()
            .map(|s| (plane.slave_connection(s), ConnectionKind::Ethernet)),
    );
    out.push((plane.bridge.clone(), ConnectionKind::Bridge));
    out.extend(plane.vlan_connection().map(|v| (v, ConnectionKind::Vlan)));
    out
}

fn state_of(current: &CurrentState, name: &str, kind: &ConnectionKind) -> ResourceState {
    match current.get(name) {
        None => ResourceState::Absent,
        Some(found) if &found.kind == kind => ResourceState::Present,
        Some(found) => ResourceState::WrongKind {
            found: found.kind.clone(),
        },
    }
}
