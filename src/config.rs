use std::fmt;

use strum::{Display, EnumIter};

use crate::error::{InstallerError, Result};

// ── Secrets ───────────────────────────────────────────────────────────────────

/// A passphrase or password. Never printed by `Debug`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// One `*` per character, for summaries.
    pub fn masked(&self) -> String {
        "*".repeat(self.0.chars().count())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

// ── Enumerations ──────────────────────────────────────────────────────────────

/// Boot mode of the machine running the installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Firmware {
    #[strum(serialize = "UEFI")]
    Uefi,
    #[strum(serialize = "BIOS")]
    Bios,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum DesktopEnvironment {
    #[strum(serialize = "xfce")]
    Xfce,
    #[strum(serialize = "gnome")]
    Gnome,
    #[strum(serialize = "none")]
    None,
}

impl DesktopEnvironment {
    /// The NixOS options that enable this desktop.
    pub fn nix_expression(self) -> &'static str {
        match self {
            DesktopEnvironment::Xfce => {
                "services.xserver.enable = true;\n  \
                 services.xserver.desktopManager.xfce.enable = true;\n  \
                 services.displayManager.defaultSession = \"xfce\";"
            }
            DesktopEnvironment::Gnome => {
                "services.xserver.enable = true;\n  \
                 services.xserver.desktopManager.gnome.enable = true;\n  \
                 services.xserver.displayManager.gdm.enable = true;"
            }
            DesktopEnvironment::None => "",
        }
    }

    /// Human-readable label shown to the user.
    pub fn display_name(self) -> &'static str {
        match self {
            DesktopEnvironment::Xfce => "XFCE (lightweight)",
            DesktopEnvironment::Gnome => "GNOME",
            DesktopEnvironment::None => "None (console only)",
        }
    }
}

// ── Disk selection ────────────────────────────────────────────────────────────

/// Hardware token settings. Only reachable through [`Encryption`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub slot: u8,
}

/// Present only when the disk is to be encrypted, so nothing downstream can
/// read a passphrase or token slot for a plain disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encryption {
    pub passphrase: Secret,
    pub token: Option<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSelection {
    /// Kernel name, e.g. `sda` or `nvme0n1`.
    pub name: String,
    pub size_bytes: u64,
    pub vendor: String,
    pub model: String,
    pub encryption: Option<Encryption>,
}

impl DiskSelection {
    pub fn encrypt(&self) -> bool {
        self.encryption.is_some()
    }

    pub fn device_path(&self) -> String {
        format!("/dev/{}", self.name)
    }
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Everything the user chose, plus facts detected once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub disk: DiskSelection,
    pub hostname: String,
    pub timezone: String,
    pub username: String,
    pub password: Secret,
    pub keyboard_layout: String,
    pub desktop: DesktopEnvironment,
    pub firmware: Firmware,
    pub network_interfaces: Vec<String>,
}

impl Configuration {
    pub fn is_uefi(&self) -> bool {
        self.firmware == Firmware::Uefi
    }

    /// Checks every user-entered field. A configuration that fails here must
    /// never reach the composer.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(InstallerError::InvalidConfig(msg));

        let name_ok = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
        if self.disk.name.is_empty() || !self.disk.name.chars().all(name_ok) {
            return invalid(format!("bad disk name '{}'", self.disk.name));
        }
        if let Err(e) = validate_hostname(&self.hostname) {
            return invalid(e);
        }
        if let Err(e) = validate_timezone(&self.timezone) {
            return invalid(e);
        }
        if let Err(e) = validate_username(&self.username) {
            return invalid(e);
        }
        if let Err(e) = validate_keyboard_layout(&self.keyboard_layout) {
            return invalid(e);
        }
        if let Some(ref enc) = self.disk.encryption {
            if self.firmware == Firmware::Bios {
                return invalid("disk encryption requires a UEFI system".into());
            }
            match enc.token {
                Some(t) if !(1..=2).contains(&t.slot) => {
                    return invalid(format!("token slot must be 1 or 2, got {}", t.slot));
                }
                None if enc.passphrase.is_empty() => {
                    return invalid("an encryption passphrase is required".into());
                }
                _ => {}
            }
        }
        Ok(())
    }
}

// ── Validators ────────────────────────────────────────────────────────────────
//
// Each returns the message shown under the prompt when input is rejected.

pub fn validate_hostname(s: &str) -> std::result::Result<(), String> {
    if s.is_empty() || s.len() > 253 {
        return Err("hostname must be 1-253 characters".into());
    }
    let label_ok = |l: &str| {
        !l.is_empty()
            && l.len() <= 63
            && l.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !l.starts_with('-')
            && !l.ends_with('-')
    };
    if !s.split('.').all(label_ok) {
        return Err("invalid hostname".into());
    }
    Ok(())
}

pub fn validate_username(s: &str) -> std::result::Result<(), String> {
    let body = s.strip_suffix('$').unwrap_or(s);
    let mut chars = body.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let rest_ok =
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

    if s.len() > 32 || !first_ok || !rest_ok {
        return Err("invalid username".into());
    }
    Ok(())
}

pub fn validate_timezone(s: &str) -> std::result::Result<(), String> {
    // Accepted by tz lookups elsewhere but not wanted in a NixOS config.
    if s.is_empty() || s == "UTC" || s == "Local" {
        return Err("not allowed".into());
    }
    let segment_ok = |seg: &str| {
        !seg.is_empty()
            && seg
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-'))
    };
    if !s.split('/').all(segment_ok) {
        return Err("invalid timezone".into());
    }
    Ok(())
}

pub fn validate_keyboard_layout(s: &str) -> std::result::Result<(), String> {
    if s.is_empty()
        || !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ',' | '+' | '-'))
    {
        return Err("invalid keyboard layout".into());
    }
    Ok(())
}
