//! In-memory fakes for the host-facing traits

use crate::backend::{Change, CommandRunner, NetworkBackend, Prober, SnapshotSource, StateReader};
use crate::context::StepObserver;
use crate::error::{Error, Result};
use crate::executor::{ExecutionRecord, StepOutcome};
use crate::oracle::Clock;
use crate::plan::{OperationStep, StepKind};
use crate::snapshot::{ConnectionDefinition, SnapshotContents};
use crate::topology::{NetworkPlane, PlaneName, Topology};
use crate::types::{CommandOutput, ConnectionKind, CurrentState, ExistingConnection};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Storage untagged over eth0/eth1 at MTU 9000, management tagged VLAN 41
/// over eth2/eth3 owning gateway 10.1.41.1
pub fn scenario_topology() -> Topology {
    let storage =
        NetworkPlane::untagged(PlaneName::Storage, "bond0", &["eth0", "eth1"], "cloudbr0", 9000);
    let management = NetworkPlane::tagged(
        PlaneName::Management,
        "bond1",
        &["eth2", "eth3"],
        "cloudbr1",
        41,
        1500,
    )
    .with_ip("10.1.41.10/24".parse().unwrap())
    .with_gateway("10.1.41.1".parse().unwrap())
    .with_dns(vec!["10.1.41.2".parse().unwrap()]);
    Topology::validated(vec![storage, management]).unwrap()
}

/// A host whose connection list changes as steps are applied
#[derive(Debug, Default)]
pub struct FakeHost {
    connections: RefCell<Vec<ExistingConnection>>,
    calls: RefCell<Vec<StepKind>>,
    failures: RefCell<Vec<(&'static str, String)>>,
    capture_fails: Cell<bool>,
}

impl FakeHost {
    pub fn with_connections(connections: Vec<ExistingConnection>) -> Self {
        let host = Self::default();
        *host.connections.borrow_mut() = connections;
        host
    }

    pub fn state(&self) -> CurrentState {
        self.connections.borrow().iter().cloned().collect()
    }

    /// Every step the backend was asked to apply
    pub fn calls(&self) -> Vec<StepKind> {
        self.calls.borrow().clone()
    }

    /// Fail steps with this label on this connection
    pub fn fail_on(&self, label: &'static str, connection: &str) {
        self.failures
            .borrow_mut()
            .push((label, connection.to_string()));
    }

    pub fn fail_capture(&self) {
        self.capture_fails.set(true);
    }

    fn contains(&self, name: &str) -> bool {
        self.connections.borrow().iter().any(|c| c.name == name)
    }

    fn created(step: &StepKind) -> Option<ExistingConnection> {
        let name = step.creates()?;
        let (kind, device) = match step {
            StepKind::CreateBond { .. } => (ConnectionKind::Bond, Some(name.to_string())),
            StepKind::AttachSlave { interface, .. } => {
                (ConnectionKind::Ethernet, Some(interface.clone()))
            }
            StepKind::CreateBridge { .. } => (ConnectionKind::Bridge, Some(name.to_string())),
            StepKind::CreateVlan { interface, .. } => {
                (ConnectionKind::Vlan, Some(interface.clone()))
            }
            StepKind::CreateRescue { vlan, parent, .. } => match vlan {
                Some(id) => (ConnectionKind::Vlan, Some(format!("{parent}.{id}"))),
                None => (ConnectionKind::Bond, Some(parent.clone())),
            },
            StepKind::ImportConnection { contents, .. } => {
                let kind = contents
                    .lines()
                    .find_map(|l| l.strip_prefix("type="))
                    .map_or(ConnectionKind::Other("unknown".into()), ConnectionKind::from_nmcli);
                (kind, None)
            }
            _ => return None,
        };
        Some(ExistingConnection {
            name: name.to_string(),
            kind,
            device,
        })
    }
}

impl StateReader for FakeHost {
    fn current_state(&self) -> Result<CurrentState> {
        Ok(self.state())
    }
}

impl NetworkBackend for FakeHost {
    fn apply(&self, step: &StepKind) -> Result<Change> {
        self.calls.borrow_mut().push(step.clone());

        let fails = self
            .failures
            .borrow()
            .iter()
            .any(|(label, conn)| *label == step.label() && conn == step.connection());
        if fails {
            return Err(Error::CommandFailed {
                command: step.to_string(),
                stderr: "simulated failure".into(),
            });
        }

        match step {
            StepKind::DeleteConnection { name } => {
                let mut connections = self.connections.borrow_mut();
                let before = connections.len();
                connections.retain(|c| &c.name != name);
                if connections.len() == before {
                    Ok(Change::AlreadyInState)
                } else {
                    Ok(Change::Applied)
                }
            }
            StepKind::AssignIp { connection, .. } | StepKind::AttachToBridge { port: connection, .. } => {
                if self.contains(connection) {
                    Ok(Change::Applied)
                } else {
                    Err(Error::ConnectionNotFound {
                        name: connection.clone(),
                    })
                }
            }
            other => {
                let Some(conn) = Self::created(other) else {
                    return Ok(Change::Applied);
                };
                if self.contains(&conn.name) {
                    return Ok(Change::AlreadyInState);
                }
                self.connections.borrow_mut().push(conn);
                Ok(Change::Applied)
            }
        }
    }
}

impl SnapshotSource for FakeHost {
    fn capture(&self) -> Result<SnapshotContents> {
        if self.capture_fails.get() {
            return Err(Error::SnapshotFailed {
                reason: "simulated capture failure".into(),
            });
        }
        let connections = self
            .connections
            .borrow()
            .iter()
            .map(|c| ConnectionDefinition {
                name: c.name.clone(),
                file_name: format!("{}.nmconnection", c.name),
                contents: format!("[connection]\nid={}\ntype={}\n", c.name, c.kind),
            })
            .collect();
        Ok(SnapshotContents {
            connections,
            interfaces: String::new(),
            agent_properties: None,
        })
    }
}

/// Prober with scripted answers; falls back to a fixed answer once drained
#[derive(Debug)]
pub struct FakeProber {
    script: RefCell<VecDeque<bool>>,
    fallback: bool,
    calls: Cell<usize>,
}

impl FakeProber {
    pub fn reachable() -> Self {
        Self::sequence(Vec::new()).with_fallback(true)
    }

    pub fn unreachable() -> Self {
        Self::sequence(Vec::new())
    }

    pub fn sequence(answers: Vec<bool>) -> Self {
        Self {
            script: RefCell::new(answers.into()),
            fallback: false,
            calls: Cell::new(0),
        }
    }

    fn with_fallback(mut self, answer: bool) -> Self {
        self.fallback = answer;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Prober for FakeProber {
    fn probe_once(&self, target: IpAddr, _timeout: Duration) -> Result<Duration> {
        self.calls.set(self.calls.get() + 1);
        let answer = self
            .script
            .borrow_mut()
            .pop_front()
            .unwrap_or(self.fallback);
        if answer {
            Ok(Duration::from_millis(1))
        } else {
            Err(Error::CommandFailed {
                command: format!("ping {target}"),
                stderr: "no reply".into(),
            })
        }
    }
}

/// Clock that only moves when slept on
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }

    /// Total time slept so far
    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.offset.set(self.offset.get() + duration);
    }
}

/// Command runner that records invocations and replays canned output
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    calls: RefCell<Vec<String>>,
    responses: RefCell<Vec<(String, CommandOutput)>>,
}

impl ScriptedRunner {
    /// Succeed with `stdout` for commands starting with `prefix`
    pub fn respond(&self, prefix: &str, stdout: &str) {
        self.responses.borrow_mut().push((
            prefix.to_string(),
            CommandOutput {
                stdout: stdout.as_bytes().to_vec(),
                stderr: Vec::new(),
                success: true,
            },
        ));
    }

    /// Fail with `stderr` for commands starting with `prefix`
    pub fn fail(&self, prefix: &str, stderr: &str) {
        self.responses.borrow_mut().push((
            prefix.to_string(),
            CommandOutput {
                stdout: Vec::new(),
                stderr: stderr.as_bytes().to_vec(),
                success: false,
            },
        ));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = format!("{program} {}", args.join(" "));
        let output = self
            .responses
            .borrow()
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or(CommandOutput {
                stdout: Vec::new(),
                stderr: Vec::new(),
                success: true,
            });
        self.calls.borrow_mut().push(line);
        Ok(output)
    }
}

/// Observer that remembers what it was told
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub started: Option<(usize, bool)>,
    pub completed: Vec<StepOutcome>,
    pub finished: bool,
}

impl StepObserver for RecordingObserver {
    fn on_plan_start(&mut self, total: usize, dry_run: bool) {
        self.started = Some((total, dry_run));
    }

    fn on_step_start(&mut self, _index: usize, _step: &OperationStep) {}

    fn on_step_complete(&mut self, _index: usize, _step: &OperationStep, outcome: &StepOutcome) {
        self.completed.push(outcome.clone());
    }

    fn on_plan_complete(&mut self, _record: &ExecutionRecord) {
        self.finished = true;
    }
}
