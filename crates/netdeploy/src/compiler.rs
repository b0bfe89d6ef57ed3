//! Plan compiler
//!
//! Turns a [`Topology`] and the connections currently defined on the host
//! into a [`Plan`]. Compilation is pure: nothing here touches the host.

use crate::error::{Error, Result};
use crate::plan::{OperationStep, Plan, StepKind};
use crate::reserved::{RESCUE_CONNECTION, ReservedNames};
use crate::snapshot::SnapshotContents;
use crate::topology::{NetworkPlane, PlaneName, Topology};
use crate::types::{ConnectionKind, CurrentState, ExistingConnection};
use std::collections::BTreeSet;

/// Compile the plan that moves the host from `current` to `topology`.
///
/// Every reserved connection is deleted first, then each plane is rebuilt
/// from scratch in the order storage, management, public. Compiling again
/// against the resulting host state yields the same build phase.
pub fn compile(topology: &Topology, current: &CurrentState) -> Result<Plan> {
    topology.validate()?;
    topology.check_names()?;

    let registry = ReservedNames::for_topology(topology);
    let slaves: BTreeSet<&str> = topology.physical_slaves().collect();

    let doomed = current.connections().iter().filter(|conn| {
        registry.is_reserved(&conn.name) || holds_slave(conn, &slaves)
    });
    let cleanup = cleanup_steps(doomed, |conn| {
        topology.plane_for(&conn.name).or_else(|| {
            conn.device
                .as_deref()
                .and_then(|device| topology.plane_for(device))
        })
    });

    let build = topology.in_build_order().flat_map(build_plane).collect();

    let plan = Plan::new(cleanup, build);
    plan.check_ordering()?;
    log::debug!(
        "Compiled plan: {} cleanup, {} build steps",
        plan.cleanup().len(),
        plan.build().len()
    );
    Ok(plan)
}

/// Compile the emergency plan that restores management reachability.
///
/// Only the management plane is touched: its bridge and the link into that
/// bridge are deleted and a single rescue connection carrying the plane's
/// addressing is created directly on the management bond.
pub fn compile_rescue(topology: &Topology) -> Result<Plan> {
    topology.validate()?;
    let plane = topology
        .plane(PlaneName::Management)
        .ok_or_else(|| Error::compile("rescue requires a management plane"))?;
    let owner = Some(PlaneName::Management);

    let mut cleanup = vec![OperationStep::cleanup(
        StepKind::DeleteConnection {
            name: plane.bridge.clone(),
        },
        owner,
    )];
    // An untagged bond is a bridge port; its profile is replaced by the rescue.
    let link = plane.vlan_connection().unwrap_or_else(|| plane.bond.clone());
    cleanup.push(OperationStep::cleanup(
        StepKind::DeleteConnection { name: link },
        owner,
    ));
    cleanup.push(OperationStep::cleanup(
        StepKind::DeleteConnection {
            name: RESCUE_CONNECTION.to_string(),
        },
        owner,
    ));

    let rescue = StepKind::CreateRescue {
        connection: RESCUE_CONNECTION.to_string(),
        parent: plane.bond.clone(),
        vlan: plane.vlan,
        address: plane.ip,
        gateway: plane.gateway,
        dns: plane.dns.clone(),
        mtu: plane.mtu,
        bond_mode: plane.bond_mode,
    };

    let plan = Plan::new(cleanup, vec![OperationStep::build(rescue, owner)]);
    plan.check_ordering()?;
    Ok(plan)
}

/// Compile the plan that puts the archived connection definitions back.
///
/// Reserved connections and anything sharing a name with an archived
/// definition are deleted, then each definition is imported in archive order.
pub fn compile_restore(contents: &SnapshotContents, current: &CurrentState) -> Plan {
    let registry = ReservedNames::standard();
    let archived: BTreeSet<&str> = contents.connection_names().collect();

    let doomed = current
        .connections()
        .iter()
        .filter(|conn| registry.is_reserved(&conn.name) || archived.contains(conn.name.as_str()));
    let cleanup = cleanup_steps(doomed, |_| None);

    let mut seen = BTreeSet::new();
    let build = contents
        .connections
        .iter()
        .filter(|def| seen.insert(def.name.as_str()))
        .map(|def| {
            OperationStep::build(
                StepKind::ImportConnection {
                    name: def.name.clone(),
                    file_name: def.file_name.clone(),
                    contents: def.contents.clone(),
                },
                None,
            )
        })
        .collect();

    Plan::new(cleanup, build)
}

fn holds_slave(conn: &ExistingConnection, slaves: &BTreeSet<&str>) -> bool {
    conn.kind == ConnectionKind::Ethernet
        && conn
            .device
            .as_deref()
            .is_some_and(|device| slaves.contains(device))
}

/// Deletion order: rescue, VLANs, ethernet, bridges, bonds, anything else
fn cleanup_rank(conn: &ExistingConnection) -> u8 {
    if conn.name == RESCUE_CONNECTION {
        return 0;
    }
    match conn.kind {
        ConnectionKind::Vlan => 1,
        ConnectionKind::Ethernet => 2,
        ConnectionKind::Bridge => 3,
        ConnectionKind::Bond => 4,
        ConnectionKind::Other(_) => 5,
    }
}

fn cleanup_steps<'a>(
    doomed: impl Iterator<Item = &'a ExistingConnection>,
    plane_of: impl Fn(&ExistingConnection) -> Option<PlaneName>,
) -> Vec<OperationStep> {
    let mut doomed: Vec<_> = doomed.collect();
    doomed.sort_by(|a, b| {
        cleanup_rank(a)
            .cmp(&cleanup_rank(b))
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut seen = BTreeSet::new();
    doomed
        .into_iter()
        .filter(|conn| seen.insert(conn.name.as_str()))
        .map(|conn| {
            OperationStep::cleanup(
                StepKind::DeleteConnection {
                    name: conn.name.clone(),
                },
                plane_of(conn),
            )
        })
        .collect()
}

fn build_plane(plane: &NetworkPlane) -> Vec<OperationStep> {
    let owner = Some(plane.name);
    let mut kinds = vec![StepKind::CreateBond {
        name: plane.bond.clone(),
        mode: plane.bond_mode,
        mtu: plane.mtu,
    }];

    kinds.extend(plane.slaves.iter().map(|slave| StepKind::AttachSlave {
        connection: plane.slave_connection(slave),
        interface: slave.clone(),
        bond: plane.bond.clone(),
        mtu: plane.mtu,
    }));

    kinds.push(StepKind::CreateBridge {
        name: plane.bridge.clone(),
        mtu: plane.mtu,
    });

    if plane.has_addressing() {
        kinds.push(StepKind::AssignIp {
            connection: plane.bridge.clone(),
            address: plane.ip,
            gateway: plane.gateway,
            dns: plane.dns.clone(),
        });
    }

    match (plane.vlan, plane.vlan_connection(), plane.vlan_interface()) {
        (Some(vlan), Some(connection), Some(interface)) => kinds.push(StepKind::CreateVlan {
            connection,
            interface,
            parent: plane.bond.clone(),
            vlan,
            bridge: plane.bridge.clone(),
            mtu: plane.mtu,
        }),
        _ => kinds.push(StepKind::AttachToBridge {
            port: plane.bond.clone(),
            bridge: plane.bridge.clone(),
        }),
    }

    kinds
        .into_iter()
        .map(|kind| OperationStep::build(kind, owner))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::executor;
    use crate::plan::Phase;
    use crate::snapshot::ConnectionDefinition;
    use crate::testing::{FakeHost, scenario_topology};
    use crate::topology::PlaneMode;

    fn labels(steps: &[OperationStep]) -> Vec<&'static str> {
        steps.iter().map(|s| s.kind.label()).collect()
    }

    #[test]
    fn test_scenario_build_phase() {
        let plan = compile(&scenario_topology(), &CurrentState::default()).unwrap();

        assert!(plan.cleanup().is_empty());
        assert_eq!(plan.count("create-bond"), 2);
        assert_eq!(plan.count("attach-slave"), 4);
        assert_eq!(plan.count("create-bridge"), 2);
        assert_eq!(plan.count("attach-bridge"), 1);
        assert_eq!(plan.count("create-vlan"), 1);
        // Management carries the gateway
        assert_eq!(plan.count("assign-ip"), 1);
        assert_eq!(plan.build().len(), 11);

        assert_eq!(
            labels(plan.build()),
            vec![
                "create-bond",
                "attach-slave",
                "attach-slave",
                "create-bridge",
                "attach-bridge",
                "create-bond",
                "attach-slave",
                "attach-slave",
                "create-bridge",
                "assign-ip",
                "create-vlan",
            ]
        );

        let planes: Vec<_> = plan.build().iter().map(|s| s.plane).collect();
        assert!(planes[..5].iter().all(|p| *p == Some(PlaneName::Storage)));
        assert!(planes[5..].iter().all(|p| *p == Some(PlaneName::Management)));
    }

    #[test]
    fn test_slaves_keep_input_order() {
        let plan = compile(&scenario_topology(), &CurrentState::default()).unwrap();
        let slaves: Vec<_> = plan
            .build()
            .iter()
            .filter_map(|s| match &s.kind {
                StepKind::AttachSlave { interface, .. } => Some(interface.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(slaves, vec!["eth0", "eth1", "eth2", "eth3"]);
    }

    #[test]
    fn test_ordering_invariant() {
        let plan = compile(&scenario_topology(), &CurrentState::default()).unwrap();
        let steps: Vec<_> = plan.steps().collect();
        let position = |pred: &dyn Fn(&StepKind) -> bool| steps.iter().position(|s| pred(&s.kind));

        for (index, step) in steps.iter().enumerate() {
            match &step.kind {
                StepKind::AttachSlave { bond, .. } => {
                    let created = position(&|k| {
                        matches!(k, StepKind::CreateBond { name, .. } if name == bond)
                    });
                    assert!(created.unwrap() < index);
                }
                StepKind::AttachToBridge { bridge, .. } | StepKind::CreateVlan { bridge, .. } => {
                    let created = position(&|k| {
                        matches!(k, StepKind::CreateBridge { name, .. } if name == bridge)
                    });
                    assert!(created.unwrap() < index);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_mode_consistency() {
        let mut planes = scenario_topology().planes().to_vec();
        planes[1].vlan = None;
        let err = compile(&Topology::new(planes), &CurrentState::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidTopology { .. }));

        let mut planes = scenario_topology().planes().to_vec();
        planes[0].vlan = Some(40);
        assert_eq!(planes[0].mode, PlaneMode::Untagged);
        let err = compile(&Topology::new(planes), &CurrentState::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidTopology { .. }));
    }

    #[test]
    fn test_cleanup_selects_reserved_and_slaves() {
        let mut wired = ExistingConnection::new("Wired connection 1", ConnectionKind::Ethernet);
        wired.device = Some("eth2".into());
        let mut office = ExistingConnection::new("Wired connection 2", ConnectionKind::Ethernet);
        office.device = Some("eth7".into());

        let current: CurrentState = vec![
            ExistingConnection::new("bond0", ConnectionKind::Bond),
            ExistingConnection::new("cloudbr0", ConnectionKind::Bridge),
            ExistingConnection::new("eth0", ConnectionKind::Ethernet),
            ExistingConnection::new("rescue-mgmt", ConnectionKind::Vlan),
            ExistingConnection::new("mgmt-vlan99", ConnectionKind::Vlan),
            ExistingConnection::new("docker0", ConnectionKind::Bridge),
            ExistingConnection::new("lo", ConnectionKind::Other("loopback".into())),
            wired,
            office,
        ]
        .into_iter()
        .collect();

        let plan = compile(&scenario_topology(), &current).unwrap();
        let deleted: Vec<_> = plan.cleanup().iter().map(|s| s.kind.connection()).collect();
        assert_eq!(
            deleted,
            vec![
                "rescue-mgmt",
                "mgmt-vlan99",
                "Wired connection 1",
                "eth0",
                "cloudbr0",
                "bond0",
            ]
        );
        assert!(plan.cleanup().iter().all(|s| s.phase == Phase::Cleanup));
        assert_eq!(plan.cleanup()[2].plane, Some(PlaneName::Management));
    }

    #[test]
    fn test_cleanup_deduplicates_names() {
        let current: CurrentState = vec![
            ExistingConnection::new("bond0", ConnectionKind::Bond),
            ExistingConnection::new("bond0", ConnectionKind::Bond),
        ]
        .into_iter()
        .collect();
        let plan = compile(&scenario_topology(), &current).unwrap();
        assert_eq!(plan.cleanup().len(), 1);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let current: CurrentState = vec![
            ExistingConnection::new("cloudbr1", ConnectionKind::Bridge),
            ExistingConnection::new("bond1", ConnectionKind::Bond),
        ]
        .into_iter()
        .collect();
        let first = compile(&scenario_topology(), &current).unwrap();
        let second = compile(&scenario_topology(), &current).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_idempotence_after_apply() {
        let topology = scenario_topology();
        let host = FakeHost::default();
        let first = compile(&topology, &host.state()).unwrap();
        let record = executor::apply(&first, false, &host, &mut NoProgress);
        assert!(record.failure().is_none());

        let second = compile(&topology, &host.state()).unwrap();
        assert_eq!(second.build(), first.build());

        let created: BTreeSet<&str> = first.steps().filter_map(|s| s.kind.creates()).collect();
        let deleted: BTreeSet<&str> = second.cleanup().iter().map(|s| s.kind.connection()).collect();
        assert_eq!(created, deleted);
        assert_eq!(deleted.len(), second.cleanup().len());

        // And applying the second plan converges to the same host state
        let before = host.state();
        let record = executor::apply(&second, false, &host, &mut NoProgress);
        assert!(record.failure().is_none());
        let mut after: Vec<_> = host.state().connections().iter().map(|c| c.name.clone()).collect();
        let mut expected: Vec<_> = before.connections().iter().map(|c| c.name.clone()).collect();
        after.sort();
        expected.sort();
        assert_eq!(after, expected);
    }

    #[test]
    fn test_rescue_plan_touches_management_only() {
        let topology = scenario_topology();
        let plan = compile_rescue(&topology).unwrap();

        assert_eq!(
            plan.cleanup()[0].kind,
            StepKind::DeleteConnection {
                name: "cloudbr1".into()
            }
        );
        assert_eq!(plan.build().len(), 1);
        assert!(matches!(
            &plan.build()[0].kind,
            StepKind::CreateRescue { connection, parent, vlan: Some(41), .. }
                if connection == RESCUE_CONNECTION && parent == "bond1"
        ));
        assert!(plan.steps().all(|s| s.plane == Some(PlaneName::Management)));

        let storage = topology.plane(PlaneName::Storage).unwrap();
        let mut forbidden = storage.connection_names();
        forbidden.extend(storage.slaves.iter().cloned());
        for name in plan.referenced_names() {
            assert!(!forbidden.iter().any(|f| f == name), "rescue touched {name}");
        }
    }

    #[test]
    fn test_rescue_plan_untagged_management() {
        let mut planes = scenario_topology().planes().to_vec();
        planes[1].mode = PlaneMode::Untagged;
        planes[1].vlan = None;
        let plan = compile_rescue(&Topology::new(planes)).unwrap();

        let deleted: Vec<_> = plan.cleanup().iter().map(|s| s.kind.connection()).collect();
        assert_eq!(deleted, vec!["cloudbr1", "bond1", RESCUE_CONNECTION]);
        assert!(matches!(
            plan.build()[0].kind,
            StepKind::CreateRescue { vlan: None, .. }
        ));
    }

    #[test]
    fn test_restore_plan() {
        let contents = SnapshotContents {
            connections: vec![
                ConnectionDefinition {
                    name: "Wired connection 1".into(),
                    file_name: "Wired connection 1.nmconnection".into(),
                    contents: "[connection]\nid=Wired connection 1\ntype=ethernet\n".into(),
                },
                ConnectionDefinition {
                    name: "cloudbr1".into(),
                    file_name: "cloudbr1.nmconnection".into(),
                    contents: "[connection]\nid=cloudbr1\ntype=bridge\n".into(),
                },
            ],
            ..Default::default()
        };
        let current: CurrentState = vec![
            ExistingConnection::new("cloudbr1", ConnectionKind::Bridge),
            ExistingConnection::new("Wired connection 1", ConnectionKind::Ethernet),
            ExistingConnection::new("rescue-mgmt", ConnectionKind::Vlan),
            ExistingConnection::new("docker0", ConnectionKind::Bridge),
        ]
        .into_iter()
        .collect();

        let plan = compile_restore(&contents, &current);
        let deleted: Vec<_> = plan.cleanup().iter().map(|s| s.kind.connection()).collect();
        assert_eq!(deleted, vec!["rescue-mgmt", "Wired connection 1", "cloudbr1"]);
        let imported: Vec<_> = plan.build().iter().map(|s| s.kind.connection()).collect();
        assert_eq!(imported, vec!["Wired connection 1", "cloudbr1"]);
        assert!(plan.check_ordering().is_ok());
    }
}
