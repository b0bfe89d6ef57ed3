//! NetworkManager backend driven through `nmcli`
//!
//! Connection profiles are created with `nmcli connection add`, reading
//! state with terse `connection show` output. Snapshots read the keyfile
//! directory directly.

use crate::archive;
use crate::backup::restrict_permissions;
use crate::backend::{Change, CommandRunner, NetworkBackend, SnapshotSource, StateReader, SystemRunner};
use crate::error::{Error, ErrorCategory, Result};
use crate::plan::StepKind;
use crate::snapshot::{ConnectionDefinition, SnapshotContents};
use crate::topology::Cidr;
use crate::types::{ConnectionKind, CurrentState, ExistingConnection};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Build a `Vec<String>` from heterogeneous displayable arguments
macro_rules! args {
    ($($arg:expr),* $(,)?) => {
        vec![$($arg.to_string()),*]
    };
}

/// Where NetworkManager keeps keyfile connection profiles
pub const DEFAULT_KEYFILE_DIR: &str = "/etc/NetworkManager/system-connections";

/// Backend for hosts managed by NetworkManager
#[derive(Debug)]
pub struct NmcliBackend<R = SystemRunner> {
    runner: R,
    keyfile_dir: PathBuf,
    agent_properties: Option<PathBuf>,
}

impl NmcliBackend<SystemRunner> {
    pub fn new() -> Self {
        Self::with_runner(SystemRunner)
    }
}

impl Default for NmcliBackend<SystemRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> NmcliBackend<R> {
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner,
            keyfile_dir: PathBuf::from(DEFAULT_KEYFILE_DIR),
            agent_properties: None,
        }
    }

    pub fn keyfile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.keyfile_dir = dir.into();
        self
    }

    /// Include this agent properties file in snapshots
    pub fn agent_properties(mut self, path: Option<PathBuf>) -> Self {
        self.agent_properties = path;
        self
    }

    fn nmcli(&self, args: &[&str], connection: Option<&str>) -> Result<String> {
        self.runner.run_checked("nmcli", args, &|command, stderr| {
            Error::from_nmcli_output(command, stderr, connection)
        })
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.current_state()?.contains(name))
    }

    /// `nmcli connection add` unless a profile with this name exists
    fn add(&self, name: &str, args: &[String]) -> Result<Change> {
        if self.exists(name)? {
            log::debug!("Connection {name} already exists");
            return Ok(Change::AlreadyInState);
        }
        let mut full = vec!["connection", "add"];
        full.extend(args.iter().map(String::as_str));
        self.nmcli(&full, Some(name))?;
        Ok(Change::Applied)
    }

    fn modify(&self, name: &str, args: &[String]) -> Result<()> {
        let mut full = vec!["connection", "modify", "id", name];
        full.extend(args.iter().map(String::as_str));
        self.nmcli(&full, Some(name)).map(|_| ())
    }

    fn up(&self, name: &str) -> Result<()> {
        self.nmcli(&["connection", "up", "id", name], Some(name))
            .map(|_| ())
    }

    fn delete(&self, name: &str) -> Result<Change> {
        match self.nmcli(&["connection", "delete", "id", name], Some(name)) {
            Ok(_) => Ok(Change::Applied),
            Err(e) if e.category() == ErrorCategory::NotFound => Ok(Change::AlreadyInState),
            Err(e) => Err(e),
        }
    }

    fn import(&self, name: &str, file_name: &str, contents: &str) -> Result<Change> {
        if Path::new(file_name).file_name().and_then(|f| f.to_str()) != Some(file_name) {
            return Err(Error::Archive {
                message: format!("'{file_name}' is not a plain file name"),
            });
        }
        if self.exists(name)? {
            return Ok(Change::AlreadyInState);
        }

        let path = self.keyfile_dir.join(file_name);
        fs::write(&path, contents)?;
        restrict_permissions(&path)?;
        let path_str = path.to_string_lossy().into_owned();
        self.nmcli(&["connection", "load", path_str.as_str()], Some(name))?;

        // Ports come up with their controller; a failed activation here is
        // retried by NetworkManager autoconnect.
        if let Err(e) = self.up(name) {
            log::warn!("Imported {name} but could not activate it: {e}");
        }
        Ok(Change::Applied)
    }
}

impl<R: CommandRunner> StateReader for NmcliBackend<R> {
    fn current_state(&self) -> Result<CurrentState> {
        let output = self.nmcli(
            &["-t", "-f", "NAME,TYPE,DEVICE", "connection", "show"],
            None,
        )?;
        Ok(parse_connection_list(&output))
    }
}

impl<R: CommandRunner> NetworkBackend for NmcliBackend<R> {
    fn apply(&self, step: &StepKind) -> Result<Change> {
        match step {
            StepKind::DeleteConnection { name } => self.delete(name),
            StepKind::CreateBond { name, mode, mtu } => self.add(
                name,
                &args![
                    "type", "bond", "con-name", name, "ifname", name,
                    "bond.options", mode.options(),
                    "ethernet.mtu", mtu,
                    "ipv4.method", "disabled", "ipv6.method", "ignore",
                ],
            ),
            StepKind::AttachSlave {
                connection,
                interface,
                bond,
                mtu,
            } => self.add(
                connection,
                &args![
                    "type", "ethernet", "con-name", connection, "ifname", interface,
                    "master", bond, "slave-type", "bond",
                    "ethernet.mtu", mtu,
                ],
            ),
            StepKind::CreateBridge { name, mtu } => self.add(
                name,
                &args![
                    "type", "bridge", "con-name", name, "ifname", name,
                    "bridge.stp", "no",
                    "ethernet.mtu", mtu,
                    "ipv4.method", "disabled", "ipv6.method", "ignore",
                ],
            ),
            StepKind::AssignIp {
                connection,
                address,
                gateway,
                dns,
            } => {
                let args = ip_args(*address, *gateway, dns);
                if args.is_empty() {
                    return Ok(Change::AlreadyInState);
                }
                // modify only edits the profile; re-activate to put it on the link
                self.modify(connection, &args)?;
                self.up(connection)?;
                Ok(Change::Applied)
            }
            StepKind::CreateVlan {
                connection,
                interface,
                parent,
                vlan,
                bridge,
                mtu,
            } => {
                let change = self.add(
                    connection,
                    &args![
                        "type", "vlan", "con-name", connection, "ifname", interface,
                        "dev", parent, "id", vlan,
                        "master", bridge, "slave-type", "bridge",
                        "ethernet.mtu", mtu,
                    ],
                )?;
                self.up(connection)?;
                Ok(change)
            }
            StepKind::AttachToBridge { port, bridge } => {
                self.modify(
                    port,
                    &args!["connection.master", bridge, "connection.slave-type", "bridge"],
                )?;
                self.up(port)?;
                Ok(Change::Applied)
            }
            StepKind::CreateRescue {
                connection,
                parent,
                vlan,
                address,
                gateway,
                dns,
                mtu,
                bond_mode,
            } => {
                let mut args = match vlan {
                    Some(id) => args![
                        "type", "vlan", "con-name", connection,
                        "ifname", format!("{parent}.{id}"),
                        "dev", parent, "id", id,
                    ],
                    None => args![
                        "type", "bond", "con-name", connection, "ifname", parent,
                        "bond.options", bond_mode.options(),
                    ],
                };
                args.extend(args!["ethernet.mtu", mtu]);
                args.extend(ip_args(*address, *gateway, dns));
                let change = self.add(connection, &args)?;
                self.up(connection)?;
                Ok(change)
            }
            StepKind::ImportConnection {
                name,
                file_name,
                contents,
            } => self.import(name, file_name, contents),
        }
    }
}

impl<R: CommandRunner> SnapshotSource for NmcliBackend<R> {
    fn capture(&self) -> Result<SnapshotContents> {
        let mut connections = Vec::new();
        for entry in WalkDir::new(&self.keyfile_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::SnapshotFailed {
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let contents = fs::read_to_string(entry.path()).map_err(|e| Error::SnapshotFailed {
                reason: format!("{}: {e}", entry.path().display()),
            })?;
            let name = archive::connection_id(&contents).unwrap_or_else(|| {
                file_name
                    .strip_suffix(".nmconnection")
                    .unwrap_or(&file_name)
                    .to_string()
            });
            connections.push(ConnectionDefinition {
                name,
                file_name,
                contents,
            });
        }

        let interfaces = match self.runner.run("ip", &["-o", "addr", "show"]) {
            Ok(output) if output.success => output.stdout_str(),
            Ok(output) => {
                log::warn!("ip addr failed: {}", output.stderr_str().trim());
                String::new()
            }
            Err(e) => {
                log::warn!("Could not read interface state: {e}");
                String::new()
            }
        };

        let agent_properties = match &self.agent_properties {
            Some(path) if path.exists() => Some(fs::read_to_string(path)?),
            _ => None,
        };

        Ok(SnapshotContents {
            connections,
            interfaces,
            agent_properties,
        })
    }
}

/// Address properties for `nmcli`; the family follows the address or gateway
fn ip_args(address: Option<Cidr>, gateway: Option<IpAddr>, dns: &[IpAddr]) -> Vec<String> {
    let v6 = address
        .map(|a| a.address())
        .or(gateway)
        .is_some_and(|ip| ip.is_ipv6());
    let family = if v6 { "ipv6" } else { "ipv4" };

    let mut args = Vec::new();
    if let Some(address) = address {
        args.extend(args![
            format!("{family}.method"),
            "manual",
            format!("{family}.addresses"),
            address,
        ]);
    }
    if let Some(gateway) = gateway {
        args.extend(args![format!("{family}.gateway"), gateway]);
    }
    if !dns.is_empty() {
        let servers: Vec<String> = dns.iter().map(ToString::to_string).collect();
        args.extend(args![format!("{family}.dns"), servers.join(",")]);
    }
    args
}

/// Parse `nmcli -t -f NAME,TYPE,DEVICE connection show`
pub fn parse_connection_list(output: &str) -> CurrentState {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields = split_terse(line);
            let name = fields.first()?.clone();
            let kind = ConnectionKind::from_nmcli(fields.get(1).map_or("", String::as_str));
            let device = fields
                .get(2)
                .filter(|d| !d.is_empty() && d.as_str() != "--")
                .cloned();
            Some(ExistingConnection { name, kind, device })
        })
        .collect()
}

/// Split a terse line on unescaped `:`, unescaping `\:` and `\\`
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next()
                    && let Some(field) = fields.last_mut()
                {
                    field.push(next);
                }
            }
            ':' => fields.push(String::new()),
            other => {
                if let Some(field) = fields.last_mut() {
                    field.push(other);
                }
            }
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::testing::{ScriptedRunner, scenario_topology};
    use crate::topology::BondMode;
    use tempfile::TempDir;

    const SHOW: &str = "nmcli -t -f NAME,TYPE,DEVICE connection show";

    #[test]
    fn test_parse_connection_list() {
        let output = "bond0:bond:bond0\n\
                      bond0-slave-eth0:802-3-ethernet:eth0\n\
                      lab\\:uplink:802-3-ethernet:--\n\
                      cloudbr1:bridge:\n";
        let state = parse_connection_list(output);
        assert_eq!(state.connections().len(), 4);
        assert_eq!(state.get("bond0").unwrap().kind, ConnectionKind::Bond);
        assert_eq!(
            state.get("bond0-slave-eth0").unwrap().device.as_deref(),
            Some("eth0")
        );
        let lab = state.get("lab:uplink").unwrap();
        assert_eq!(lab.kind, ConnectionKind::Ethernet);
        assert_eq!(lab.device, None);
        assert_eq!(state.get("cloudbr1").unwrap().device, None);
    }

    #[test]
    fn test_create_bond_arguments() {
        let runner = ScriptedRunner::default();
        let backend = NmcliBackend::with_runner(&runner);
        let change = backend
            .apply(&StepKind::CreateBond {
                name: "bond0".into(),
                mode: BondMode::Lacp,
                mtu: 9000,
            })
            .unwrap();

        assert_eq!(change, Change::Applied);
        assert_eq!(
            runner.calls(),
            vec![
                SHOW.to_string(),
                "nmcli connection add type bond con-name bond0 ifname bond0 \
                 bond.options mode=802.3ad,miimon=100 ethernet.mtu 9000 \
                 ipv4.method disabled ipv6.method ignore"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_existing_connection_is_not_added_again() {
        let runner = ScriptedRunner::default();
        runner.respond(SHOW, "cloudbr0:bridge:cloudbr0\n");
        let backend = NmcliBackend::with_runner(&runner);
        let change = backend
            .apply(&StepKind::CreateBridge {
                name: "cloudbr0".into(),
                mtu: 9000,
            })
            .unwrap();
        assert_eq!(change, Change::AlreadyInState);
        assert_eq!(runner.calls(), vec![SHOW.to_string()]);
    }

    #[test]
    fn test_delete_unknown_is_already_in_state() {
        let runner = ScriptedRunner::default();
        runner.fail(
            "nmcli connection delete",
            "Error: unknown connection 'bond9'.",
        );
        let backend = NmcliBackend::with_runner(&runner);
        let change = backend
            .apply(&StepKind::DeleteConnection {
                name: "bond9".into(),
            })
            .unwrap();
        assert_eq!(change, Change::AlreadyInState);
    }

    #[test]
    fn test_vlan_is_activated() {
        let runner = ScriptedRunner::default();
        let backend = NmcliBackend::with_runner(&runner);
        backend
            .apply(&StepKind::CreateVlan {
                connection: "bond1-vlan41".into(),
                interface: "bond1.41".into(),
                parent: "bond1".into(),
                vlan: 41,
                bridge: "cloudbr1".into(),
                mtu: 1500,
            })
            .unwrap();
        let calls = runner.calls();
        assert!(calls[1].contains("dev bond1 id 41 master cloudbr1 slave-type bridge"));
        assert_eq!(calls[2], "nmcli connection up id bond1-vlan41");
    }

    #[test]
    fn test_activation_failure_is_an_error() {
        let runner = ScriptedRunner::default();
        runner.fail("nmcli connection up", "Error: Connection activation failed");
        let backend = NmcliBackend::with_runner(&runner);
        let err = backend
            .apply(&StepKind::AttachToBridge {
                port: "bond0".into(),
                bridge: "cloudbr0".into(),
            })
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Apply);
    }

    #[test]
    fn test_ip_args() {
        let args = ip_args(
            Some("10.1.41.10/24".parse().unwrap()),
            Some("10.1.41.1".parse().unwrap()),
            &["10.1.41.2".parse().unwrap(), "10.1.41.3".parse().unwrap()],
        );
        assert_eq!(
            args,
            vec![
                "ipv4.method",
                "manual",
                "ipv4.addresses",
                "10.1.41.10/24",
                "ipv4.gateway",
                "10.1.41.1",
                "ipv4.dns",
                "10.1.41.2,10.1.41.3",
            ]
        );
        let v6 = ip_args(Some("fd00::10/64".parse().unwrap()), None, &[]);
        assert_eq!(v6[0], "ipv6.method");
    }

    #[test]
    fn test_untagged_rescue_is_a_bond_profile() {
        let runner = ScriptedRunner::default();
        let backend = NmcliBackend::with_runner(&runner);
        backend
            .apply(&StepKind::CreateRescue {
                connection: "rescue-mgmt".into(),
                parent: "bond1".into(),
                vlan: None,
                address: Some("10.1.41.10/24".parse().unwrap()),
                gateway: Some("10.1.41.1".parse().unwrap()),
                dns: Vec::new(),
                mtu: 1500,
                bond_mode: BondMode::ActiveBackup,
            })
            .unwrap();
        let calls = runner.calls();
        assert!(calls[1].starts_with(
            "nmcli connection add type bond con-name rescue-mgmt ifname bond1"
        ));
        assert!(calls[1].contains("ipv4.addresses 10.1.41.10/24"));
        assert_eq!(calls[2], "nmcli connection up id rescue-mgmt");
    }

    #[test]
    fn test_bridge_is_activated_after_addressing() {
        let runner = ScriptedRunner::default();
        let backend = NmcliBackend::with_runner(&runner);
        let plan = compile(&scenario_topology(), &CurrentState::default()).unwrap();
        for step in plan.steps() {
            backend.apply(&step.kind).unwrap();
        }

        let calls = runner.calls();
        let position = |prefix: &str| {
            calls
                .iter()
                .position(|c| c.starts_with(prefix))
                .unwrap_or_else(|| panic!("no call starting with {prefix}"))
        };
        let added = position("nmcli connection add type bridge con-name cloudbr1");
        let addressed = position("nmcli connection modify id cloudbr1 ipv4.method manual");
        let activated = position("nmcli connection up id cloudbr1");
        assert!(added < addressed);
        assert!(addressed < activated);
        assert!(calls[addressed].contains("ipv4.addresses 10.1.41.10/24"));
        assert!(calls[addressed].contains("ipv4.gateway 10.1.41.1"));
        assert!(calls[addressed].contains("ipv4.dns 10.1.41.2"));
        // The address-less storage bridge is never modified
        assert!(!calls.iter().any(|c| c.starts_with("nmcli connection modify id cloudbr0")));
    }

    #[test]
    fn test_capture_reads_keyfiles() {
        let temp = TempDir::new().unwrap();
        let keyfiles = temp.path().join("system-connections");
        fs::create_dir(&keyfiles).unwrap();
        fs::write(
            keyfiles.join("cloudbr1.nmconnection"),
            "[connection]\nid=cloudbr1\ntype=bridge\n",
        )
        .unwrap();
        fs::write(keyfiles.join("legacy"), "[ethernet]\n").unwrap();
        fs::create_dir(keyfiles.join("nested")).unwrap();
        let props = temp.path().join("agent.properties");
        fs::write(&props, "private.network.device=cloudbr1\n").unwrap();

        let runner = ScriptedRunner::default();
        runner.respond("ip -o addr show", "1: lo    inet 127.0.0.1/8\n");
        let backend = NmcliBackend::with_runner(&runner)
            .keyfile_dir(&keyfiles)
            .agent_properties(Some(props));

        let contents = backend.capture().unwrap();
        let names: Vec<_> = contents.connection_names().collect();
        assert_eq!(names, vec!["cloudbr1", "legacy"]);
        assert!(contents.interfaces.contains("127.0.0.1"));
        assert_eq!(
            contents.agent_properties.as_deref(),
            Some("private.network.device=cloudbr1\n")
        );
    }

    #[test]
    fn test_import_writes_private_keyfile() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::default();
        let backend = NmcliBackend::with_runner(&runner).keyfile_dir(temp.path());

        let change = backend
            .apply(&StepKind::ImportConnection {
                name: "cloudbr1".into(),
                file_name: "cloudbr1.nmconnection".into(),
                contents: "[connection]\nid=cloudbr1\n".into(),
            })
            .unwrap();
        assert_eq!(change, Change::Applied);

        let path = temp.path().join("cloudbr1.nmconnection");
        assert_eq!(fs::read_to_string(&path).unwrap(), "[connection]\nid=cloudbr1\n");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        assert!(runner.calls().iter().any(|c| c.starts_with("nmcli connection load")));
    }

    #[test]
    fn test_import_rejects_path_traversal() {
        let temp = TempDir::new().unwrap();
        let runner = ScriptedRunner::default();
        let backend = NmcliBackend::with_runner(&runner).keyfile_dir(temp.path());
        let err = backend
            .apply(&StepKind::ImportConnection {
                name: "x".into(),
                file_name: "../x".into(),
                contents: String::new(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Archive { .. }));
    }
}
