//! Asks every question and assembles a [`Configuration`]. Nothing on the
//! machine is changed here.

use strum::IntoEnumIterator;

use crate::{
    config::{
        validate_hostname, validate_keyboard_layout, validate_timezone, validate_username,
        Configuration, DesktopEnvironment, DiskSelection, Encryption, Firmware, Token,
    },
    error::{InstallerError, Result},
    prompt::Prompter,
    sysfs::{human_size, DeviceInfo},
};

pub const DEFAULT_TIMEZONE: &str = "Europe/Berlin";
pub const DEFAULT_KEYBOARD_LAYOUT: &str = "de";

const TOKEN_SLOTS: [u8; 2] = [1, 2];

fn ask_encryption(p: &mut dyn Prompter, disk: &str) -> Result<Option<Encryption>> {
    if !p.yes_no(&format!("Encrypt disk {}?", disk), false)? {
        return Ok(None);
    }

    let token = if p.yes_no("Use a YubiKey for encryption?", false)? {
        let items: Vec<String> = TOKEN_SLOTS.iter().map(|s| format!("Slot {}", s)).collect();
        let idx = p.select("Which YubiKey slot holds the challenge-response secret?", &items, 1)?;
        Some(Token {
            slot: TOKEN_SLOTS[idx.min(TOKEN_SLOTS.len() - 1)],
        })
    } else {
        None
    };

    // With a token the passphrase is an optional second factor.
    let label = if token.is_some() {
        "Encryption passphrase (leave empty for YubiKey only)"
    } else {
        "Encryption passphrase"
    };
    let passphrase = p.secret_confirmed(label, token.is_some())?;

    Ok(Some(Encryption { passphrase, token }))
}

/// Runs the full question sequence.
pub fn collect(
    p: &mut dyn Prompter,
    devices: &[DeviceInfo],
    firmware: Firmware,
    network_interfaces: Vec<String>,
) -> Result<Configuration> {
    if devices.is_empty() {
        return Err(InstallerError::NoDisks);
    }

    let items: Vec<String> = devices.iter().map(DeviceInfo::display).collect();
    let idx = p.select("Select disk to install NixOS to", &items, 0)?;
    let device = devices.get(idx).ok_or(InstallerError::Cancelled)?;

    let encryption = match firmware {
        Firmware::Uefi => ask_encryption(p, &device.name)?,
        Firmware::Bios => None,
    };

    let hostname = p.text("Hostname", None, validate_hostname)?;
    let timezone = p.text("Timezone", Some(DEFAULT_TIMEZONE), validate_timezone)?;

    let desktops: Vec<DesktopEnvironment> = DesktopEnvironment::iter().collect();
    let names: Vec<String> = desktops.iter().map(|d| d.display_name().to_string()).collect();
    let desktop = desktops[p.select("Select desktop environment", &names, 0)?.min(desktops.len() - 1)];

    let keyboard_layout = p.text(
        "Keyboard layout",
        Some(DEFAULT_KEYBOARD_LAYOUT),
        validate_keyboard_layout,
    )?;
    let username = p.text("Username", None, validate_username)?;
    let password = p.secret_confirmed("Password", false)?;

    let conf = Configuration {
        disk: DiskSelection {
            name: device.name.clone(),
            size_bytes: device.size_bytes,
            vendor: device.vendor.clone(),
            model: device.model.clone(),
            encryption,
        },
        hostname,
        timezone,
        username,
        password,
        keyboard_layout,
        desktop,
        firmware,
        network_interfaces,
    };
    tracing::debug!(disk = %conf.disk.name, firmware = %conf.firmware, "selection complete");
    Ok(conf)
}

/// Rows for the summary box. Secrets are masked.
pub fn summary_rows(conf: &Configuration) -> Vec<(&'static str, String)> {
    let encryption = match &conf.disk.encryption {
        None => "no".to_string(),
        Some(Encryption { token: None, .. }) => "LUKS".to_string(),
        Some(Encryption {
            token: Some(t),
            passphrase,
        }) if passphrase.is_empty() => format!("LUKS + YubiKey slot {}", t.slot),
        Some(Encryption { token: Some(t), .. }) => {
            format!("LUKS + YubiKey slot {} + passphrase", t.slot)
        }
    };

    vec![
        ("Boot mode", conf.firmware.to_string()),
        (
            "Disk",
            format!("{} ({})", conf.disk.device_path(), human_size(conf.disk.size_bytes)),
        ),
        ("Encryption", encryption),
        ("Hostname", conf.hostname.clone()),
        ("Timezone", conf.timezone.clone()),
        ("Desktop", conf.desktop.display_name().to_string()),
        ("Keyboard", conf.keyboard_layout.clone()),
        ("Username", conf.username.clone()),
        ("Password", conf.password.masked()),
    ]
}
