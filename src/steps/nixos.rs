use crate::{
    config::{Configuration, Firmware},
    steps::{
        append_file,
        partition::plan_partitions,
        secret_input, shell, write_file, Step,
    },
};

const CONFIGURATION_TEMPLATE: &str = include_str!("../../templates/configuration.nix");

pub const CONFIG_FILE: &str = "/mnt/etc/nixos/configuration.nix";
pub const HARDWARE_FILE: &str = "/mnt/etc/nixos/hardware-configuration.nix";

pub const USER_PASSWORD: &str = "USER_PASSWORD";
pub const PASSWORD_HASH: &str = "PASSWORD_HASH";

// ── Templating ────────────────────────────────────────────────────────────────

/// Replaces each `{{name}}` with its value in one pass. Unknown placeholders
/// stay verbatim and inserted values are not rescanned.
pub fn render_template(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let name = after[..close].trim();
        match vars.iter().find(|(k, _)| *k == name) {
            Some((_, v)) => out.push_str(v),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}

fn bootloader(firmware: Firmware) -> &'static str {
    match firmware {
        Firmware::Uefi => {
            "boot.loader.systemd-boot.enable = true;\n  \
             boot.loader.efi.canTouchEfiVariables = true;"
        }
        Firmware::Bios => "boot.loader.grub.enable = true;",
    }
}

fn boot_device(conf: &Configuration) -> String {
    match conf.firmware {
        Firmware::Uefi => "nodev".to_string(),
        Firmware::Bios => conf.disk.device_path(),
    }
}

fn interface_lines(interfaces: &[String]) -> String {
    interfaces
        .iter()
        .map(|i| format!("networking.interfaces.\"{}\".useDHCP = true;", i))
        .collect::<Vec<_>>()
        .join("\n  ")
}

/// The rendered `configuration.nix`. The password hash is left as a capture
/// token and filled in when the file is written.
pub fn custom_configuration(conf: &Configuration) -> String {
    let vars = [
        ("bootloader", bootloader(conf.firmware).to_string()),
        ("boot_device", boot_device(conf)),
        ("hostname", conf.hostname.clone()),
        ("network_interfaces", interface_lines(&conf.network_interfaces)),
        ("timezone", conf.timezone.clone()),
        ("desktop", conf.desktop.nix_expression().to_string()),
        ("keyboard_layout", conf.keyboard_layout.clone()),
        ("username", conf.username.clone()),
        ("password_hash", format!("${}", PASSWORD_HASH)),
    ];
    render_template(CONFIGURATION_TEMPLATE, &vars)
}

/// Boot-time unlock settings for a token-protected root, appended to
/// `hardware-configuration.nix`. `None` without a token.
pub fn token_unlock_stanza(conf: &Configuration) -> Option<String> {
    let enc = conf.disk.encryption.as_ref()?;
    let token = enc.token?;

    let parts = plan_partitions(&conf.disk.name, conf.firmware);
    let boot = parts.iter().find(|p| p.bootable)?;
    let storage = parts.iter().find(|p| !p.bootable)?;

    Some(format!(
        r#"
// {{
  boot.initrd.kernelModules = [ "vfat" "nls_cp437" "nls_iso8859-1" "usbhid" ];
  boot.initrd.luks.yubikeySupport = true;
  boot.initrd.luks.devices = {{
    "{label}" = {{
      device = "{storage}";
      preLVM = true;
      yubikey = {{
        slot = {slot};
        twoFactor = {two_factor};
        storage = {{
          device = "{boot}";
        }};
      }};
    }};
  }};
}}"#,
        label = storage.label,
        storage = storage.device_path,
        slot = token.slot,
        two_factor = !enc.passphrase.is_empty(),
        boot = boot.device_path,
    ))
}

// ── Steps ─────────────────────────────────────────────────────────────────────

/// Skeleton config, password hash, custom config, then the token stanza.
pub fn configuration_commands(conf: &Configuration) -> Vec<Step> {
    let mut steps = vec![
        shell(
            "Generate default nixos configuration at /mnt",
            "nixos-generate-config --root /mnt",
        ),
        secret_input(
            "Read user password",
            USER_PASSWORD,
            &format!("Password for {}:", conf.username),
            conf.password.expose().to_string(),
        ),
        shell(
            "Hash user password",
            format!(
                "printf '%s' \"${}\" | mkpasswd --method=sha-512 --stdin",
                USER_PASSWORD
            ),
        )
        .captured_secret(PASSWORD_HASH),
        write_file(
            "Generate custom nixos configuration file",
            CONFIG_FILE,
            custom_configuration(conf),
        ),
    ];

    if let Some(stanza) = token_unlock_stanza(conf) {
        steps.push(append_file("Modifying hardware-configuration.nix", HARDWARE_FILE, stanza));
    }

    steps
}

pub fn install_command() -> Step {
    shell("Running nixos-install", "nixos-install --no-root-passwd")
}
