use anyhow::{Context, Result};
use hostpkg_core::TraceSnapshot;
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::{InstallState, PackageStateRecord, PrefixLayout, StateData};

pub fn write_package_state(layout: &PrefixLayout, record: &PackageStateRecord) -> Result<PathBuf> {
    let mut payload = String::new();
    payload.push_str(&format!("name={}\n", record.name));
    payload.push_str(&format!("version={}\n", record.version));
    payload.push_str(&format!("state={}\n", record.state.as_str()));
    if let Some(previous) = &record.data.previous_version {
        payload.push_str(&format!("previous_version={}\n", previous));
    }
    if record.data.reboot_pending {
        payload.push_str("reboot_pending=true\n");
    }
    payload.push_str(&format!("updated_at_unix={}\n", record.updated_at_unix));

    let path = layout.state_path(&record.name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    // A crash mid-write must leave the previous record readable.
    let staged = path.with_extension("state.part");
    fs::write(&staged, payload.as_bytes())
        .with_context(|| format!("failed to write package state: {}", staged.display()))?;
    fs::rename(&staged, &path)
        .with_context(|| format!("failed to commit package state: {}", path.display()))?;
    Ok(path)
}

pub fn read_package_state(layout: &PrefixLayout, name: &str) -> Result<Option<PackageStateRecord>> {
    let path = layout.state_path(name);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read package state: {}", path.display()));
        }
    };
    let record = parse_package_state(&raw)
        .with_context(|| format!("failed to parse package state: {}", path.display()))?;
    Ok(Some(record))
}

pub fn remove_package_state(layout: &PrefixLayout, name: &str) -> Result<bool> {
    let path = layout.state_path(name);
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => {
            Err(err).with_context(|| format!("failed to remove package state: {}", path.display()))
        }
    }
}

pub fn write_trace_snapshot(
    layout: &PrefixLayout,
    name: &str,
    snapshot: &TraceSnapshot,
) -> Result<PathBuf> {
    let payload = snapshot.to_json_vec()?;
    let path = layout.trace_path(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let staged = path.with_extension("json.part");
    fs::write(&staged, &payload)
        .with_context(|| format!("failed to write trace: {}", staged.display()))?;
    fs::rename(&staged, &path)
        .with_context(|| format!("failed to commit trace: {}", path.display()))?;
    Ok(path)
}

pub fn read_trace_snapshot(layout: &PrefixLayout, name: &str) -> Result<Option<TraceSnapshot>> {
    let path = layout.trace_path(name);
    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read trace: {}", path.display()));
        }
    };
    let snapshot = TraceSnapshot::from_json_slice(&raw)
        .with_context(|| format!("failed to parse trace: {}", path.display()))?;
    Ok(Some(snapshot))
}

pub fn remove_trace_snapshot(layout: &PrefixLayout, name: &str) -> Result<bool> {
    let path = layout.trace_path(name);
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("failed to remove trace: {}", path.display())),
    }
}

pub(crate) fn parse_package_state(raw: &str) -> Result<PackageStateRecord> {
    let mut name = None;
    let mut version = None;
    let mut state = None;
    let mut previous_version = None;
    let mut reboot_pending = false;
    let mut updated_at_unix = None;

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        match k {
            "name" => name = Some(v.to_string()),
            "version" => version = Some(v.to_string()),
            "state" => state = Some(InstallState::parse(v)?),
            "previous_version" if !v.is_empty() => previous_version = Some(v.to_string()),
            "reboot_pending" => reboot_pending = v == "true",
            "updated_at_unix" => {
                updated_at_unix = Some(v.parse().context("updated_at_unix must be u64")?)
            }
            _ => {}
        }
    }

    Ok(PackageStateRecord {
        name: name.context("missing name")?,
        version: version.unwrap_or_default(),
        state: state.context("missing state")?,
        data: StateData {
            previous_version,
            reboot_pending,
        },
        updated_at_unix: updated_at_unix.unwrap_or(0),
    })
}
