//! Facts about the machine, read once at startup from `/sys` and `/proc`.
//!
//! Every reader takes the filesystem root so tests can point it at a
//! temporary tree.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{config::Firmware, error::Result};

// ── Block devices ─────────────────────────────────────────────────────────────

/// Kernel-managed pseudo devices that are never install targets.
const SKIPPED_PREFIXES: [&str; 3] = ["loop", "ram", "zram"];

/// `/sys/block/*/size` counts 512-byte sectors regardless of the device.
const SECTOR_SIZE: u64 = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String, // sda
    pub vendor: String,
    pub model: String,
    pub size_bytes: u64,
}

impl DeviceInfo {
    /// One-line label shown in the arrow-key selector.
    pub fn display(&self) -> String {
        let desc = format!("{} {}", self.vendor, self.model);
        let desc = desc.trim();
        format!(
            "{:<12}  {:>10}   {}",
            format!("/dev/{}", self.name),
            human_size(self.size_bytes),
            if desc.is_empty() { "-" } else { desc }
        )
    }
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Every whole-disk block device, sorted by name.
pub fn list_block_devices(root: &Path) -> Result<Vec<DeviceInfo>> {
    let block = root.join("sys/block");
    let mut devices = Vec::new();

    for entry in fs::read_dir(&block)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if SKIPPED_PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }

        let dir = entry.path();
        let sectors = read_trimmed(&dir.join("size"))
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        if sectors == 0 {
            tracing::debug!(device = %name, "skipping empty block device");
            continue;
        }

        devices.push(DeviceInfo {
            vendor: read_trimmed(&dir.join("device/vendor")).unwrap_or_default(),
            model: read_trimmed(&dir.join("device/model")).unwrap_or_default(),
            size_bytes: sectors * SECTOR_SIZE,
            name,
        });
    }

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}

// ── Network ───────────────────────────────────────────────────────────────────

/// Interface names except loopback, sorted. Missing `/sys/class/net` yields
/// an empty list.
pub fn network_interfaces(root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root.join("sys/class/net")) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n != "lo")
        .collect();
    names.sort();
    names
}

// ── Firmware ──────────────────────────────────────────────────────────────────

pub fn detect_firmware(root: &Path) -> Firmware {
    if root.join("sys/firmware/efi").is_dir() {
        Firmware::Uefi
    } else {
        Firmware::Bios
    }
}

// ── Process environment ───────────────────────────────────────────────────────

fn proc_path(root: &Path, file: &str) -> PathBuf {
    root.join("proc/self").join(file)
}

/// Real UID from a `/proc/self/status` dump.
fn parse_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find(|l| l.starts_with("Uid:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse::<u32>().ok())
}

/// Unreadable status counts as non-root.
pub fn is_root(root: &Path) -> bool {
    read_trimmed(&proc_path(root, "status"))
        .and_then(|s| parse_uid(&s))
        .is_some_and(|uid| uid == 0)
}

/// Mount points listed in a `/proc/self/mounts` dump.
fn mount_points(mounts: &str) -> impl Iterator<Item = &str> {
    mounts.lines().filter_map(|l| l.split_whitespace().nth(1))
}

/// Whether anything is mounted at `target` or below it.
pub fn mount_is_used(root: &Path, target: &str) -> Result<bool> {
    let mounts = fs::read_to_string(proc_path(root, "mounts"))?;
    let nested = format!("{}/", target.trim_end_matches('/'));
    let used = mount_points(&mounts).any(|m| m == target || m.starts_with(&nested));
    Ok(used)
}
