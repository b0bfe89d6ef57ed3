//! gzip-compressed tar encoding of [`SnapshotContents`]
//!
//! Layout:
//!
//! ```text
//! connections/<file_name>   one entry per connection definition
//! interfaces.txt            interface state text
//! agent.properties          optional
//! ```

use crate::error::{Error, Result};
use crate::snapshot::{ConnectionDefinition, SnapshotContents};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::Read;
use std::path::{Component, Path};

const CONNECTIONS_DIR: &str = "connections";
const INTERFACES_FILE: &str = "interfaces.txt";
const AGENT_FILE: &str = "agent.properties";

/// Serialize snapshot contents into a single blob
pub fn pack(contents: &SnapshotContents) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    {
        let mut builder = tar::Builder::new(&mut encoder);
        for conn in &contents.connections {
            check_file_name(&conn.file_name)?;
            append(
                &mut builder,
                &format!("{CONNECTIONS_DIR}/{}", conn.file_name),
                conn.contents.as_bytes(),
                0o600,
            )?;
        }
        append(&mut builder, INTERFACES_FILE, contents.interfaces.as_bytes(), 0o644)?;
        if let Some(props) = &contents.agent_properties {
            append(&mut builder, AGENT_FILE, props.as_bytes(), 0o644)?;
        }
        builder.finish().map_err(archive_err)?;
    }
    encoder.finish().map_err(archive_err)
}

/// Decode a blob produced by [`pack`]
pub fn unpack(data: &[u8]) -> Result<SnapshotContents> {
    let mut archive = tar::Archive::new(GzDecoder::new(data));
    let mut contents = SnapshotContents::default();

    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let path = entry.path().map_err(archive_err)?.into_owned();
        let mut text = String::new();
        entry.read_to_string(&mut text).map_err(archive_err)?;

        if path == Path::new(INTERFACES_FILE) {
            contents.interfaces = text;
        } else if path == Path::new(AGENT_FILE) {
            contents.agent_properties = Some(text);
        } else if let Ok(rest) = path.strip_prefix(CONNECTIONS_DIR) {
            let file_name = rest.to_string_lossy().into_owned();
            check_file_name(&file_name)?;
            let name = connection_id(&text).unwrap_or_else(|| strip_extension(&file_name));
            contents.connections.push(ConnectionDefinition {
                name,
                file_name,
                contents: text,
            });
        } else {
            log::debug!("Ignoring unknown archive entry {}", path.display());
        }
    }
    Ok(contents)
}

/// Read `id=` from the `[connection]` section of a keyfile
pub fn connection_id(keyfile: &str) -> Option<String> {
    let mut in_connection = false;
    for line in keyfile.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_connection = line == "[connection]";
            continue;
        }
        if in_connection
            && let Some(value) = line.strip_prefix("id=")
        {
            return Some(value.trim().to_string());
        }
    }
    None
}

fn strip_extension(file_name: &str) -> String {
    file_name
        .strip_suffix(".nmconnection")
        .unwrap_or(file_name)
        .to_string()
}

fn check_file_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(Error::Archive {
            message: format!("'{name}' is not a plain file name"),
        }),
    }
}

fn append<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    data: &[u8],
    mode: u32,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    builder
        .append_data(&mut header, path, data)
        .map_err(archive_err)
}

fn archive_err(e: std::io::Error) -> Error {
    Error::Archive {
        message: e.to_string(),
    }
}
