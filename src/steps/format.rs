use crate::{
    config::{DiskSelection, Firmware},
    steps::{
        partition::{plan_partitions, FilesystemKind, Partition},
        secret_input, shell,
        token::{self, Salt},
        Step,
    },
};

/// Capture holding the user's disk passphrase.
pub const LUKS_PASSPHRASE: &str = "LUKS_PASSPHRASE";

// ── mkfs ──────────────────────────────────────────────────────────────────────

/// `mkfs` invocation for `target`. A LUKS mapper device is formatted without
/// a label since the mapper name already carries it.
pub fn mkfs_command(kind: FilesystemKind, target: &str, label: Option<&str>) -> String {
    match (kind, label) {
        (FilesystemKind::Ext4, Some(l)) => format!("mkfs.ext4 -L {} {}", l, target),
        (FilesystemKind::Ext4, None) => format!("mkfs.ext4 {}", target),
        (FilesystemKind::Fat32, Some(l)) => format!("mkfs.fat -F32 -n {} {}", l, target),
        (FilesystemKind::Fat32, None) => format!("mkfs.fat -F32 {}", target),
    }
}

pub fn make_filesystem(p: &Partition) -> Step {
    shell(
        format!("Format {} as {} ({})", p.device_path, p.filesystem.parted_name(), p.label),
        mkfs_command(p.filesystem, &p.device_path, Some(p.label)),
    )
}

pub fn make_mapped_filesystem(p: &Partition) -> Step {
    let mapper = p.mapper_path();
    shell(
        format!("Format {} as {}", mapper, p.filesystem.parted_name()),
        mkfs_command(p.filesystem, &mapper, None),
    )
}

// ── LUKS ──────────────────────────────────────────────────────────────────────

/// `luksFormat`, `luksOpen`, then mkfs on the mapper device. The key comes
/// from the plan state, never from the command literal.
pub fn make_encrypted_filesystem(p: &Partition) -> Vec<Step> {
    vec![
        shell(
            format!("Encrypt {}", p.device_path),
            format!(
                "printf '%s' \"${}\" | cryptsetup luksFormat --batch-mode --type luks2 \
                 --pbkdf argon2id --key-file=- {}",
                LUKS_PASSPHRASE, p.device_path
            ),
        ),
        shell(
            format!("Open LUKS partition {} as {}", p.device_path, p.label),
            format!(
                "printf '%s' \"${}\" | cryptsetup luksOpen {} {} --key-file=-",
                LUKS_PASSPHRASE, p.device_path, p.label
            ),
        ),
        make_mapped_filesystem(p),
    ]
}

/// Loads the passphrase into the plan state. Empty when encrypting with a
/// hardware token alone.
pub fn passphrase_step(disk: &DiskSelection) -> Option<Step> {
    let enc = disk.encryption.as_ref()?;
    Some(secret_input(
        "Read disk encryption passphrase",
        LUKS_PASSPHRASE,
        "Disk encryption passphrase:",
        enc.passphrase.expose().to_string(),
    ))
}

// ── Per-partition formatting ──────────────────────────────────────────────────

/// One sub-sequence per partition. The boot partition is never encrypted.
/// `salt` is only consumed when a hardware token protects the root.
pub fn format_commands(disk: &DiskSelection, firmware: Firmware, salt: &Salt) -> Vec<Step> {
    let mut steps = Vec::new();

    for p in plan_partitions(&disk.name, firmware) {
        match disk.encryption.as_ref() {
            Some(enc) if !p.is_boot() => match enc.token {
                Some(t) => steps.extend(token::token_commands(&p, t.slot, salt)),
                None => steps.extend(make_encrypted_filesystem(&p)),
            },
            _ => steps.push(make_filesystem(&p)),
        }
    }

    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{luks, sample};
    use crate::steps::partition::ROOT_LABEL;
    use proptest::prelude::*;

    fn texts(steps: &[Step]) -> Vec<String> {
        steps.iter().map(|s| s.command_text()).collect()
    }

    proptest! {
        #[test]
        fn different_filesystems_format_differently(
            target in "/dev/[a-z]{3}[0-9]",
            label in "[A-Z]{1,8}",
            labelled in any::<bool>(),
        ) {
            let label = if labelled { Some(label.as_str()) } else { None };
            prop_assert_ne!(
                mkfs_command(FilesystemKind::Ext4, &target, label),
                mkfs_command(FilesystemKind::Fat32, &target, label)
            );
        }
    }

    #[test]
    fn plain_bios_disk() {
        let conf = sample(Firmware::Bios, None);
        let steps = format_commands(&conf.disk, Firmware::Bios, &Salt::from_bytes([0; 16]));
        assert_eq!(texts(&steps), vec!["mkfs.ext4 -L NIXROOT /dev/sda1"]);
        assert!(passphrase_step(&conf.disk).is_none());
    }

    #[test]
    fn encrypted_uefi_root_takes_three_steps() {
        let conf = sample(Firmware::Uefi, luks(None));
        let steps = format_commands(&conf.disk, Firmware::Uefi, &Salt::from_bytes([0; 16]));
        let t = texts(&steps);
        assert_eq!(t.len(), 4);
        assert_eq!(t[0], "mkfs.fat -F32 -n NIXBOOT /dev/sda1");
        assert!(t[1].contains("cryptsetup luksFormat") && t[1].ends_with("/dev/sda2"));
        assert!(t[2].contains("cryptsetup luksOpen /dev/sda2 NIXROOT"));
        assert_eq!(t[3], format!("mkfs.ext4 /dev/mapper/{}", ROOT_LABEL));
    }

    #[test]
    fn passphrase_never_appears_in_command_text() {
        let conf = sample(Firmware::Uefi, luks(None));
        let steps = format_commands(&conf.disk, Firmware::Uefi, &Salt::from_bytes([0; 16]));
        for text in texts(&steps) {
            assert!(!text.contains("correct horse"), "{}", text);
        }
        let step = passphrase_step(&conf.disk).unwrap();
        assert_eq!(step.capture_name(), Some(LUKS_PASSPHRASE));
        assert!(!step.command_text().contains("correct horse"));
    }

    #[test]
    fn format_ignores_unrelated_fields() {
        let a = sample(Firmware::Uefi, luks(None));
        let mut b = a.clone();
        b.hostname = "other".into();
        b.username = "bob".into();
        b.timezone = "Asia/Tokyo".into();
        let salt = Salt::from_bytes([7; 16]);
        assert_eq!(
            texts(&format_commands(&a.disk, Firmware::Uefi, &salt)),
            texts(&format_commands(&b.disk, Firmware::Uefi, &salt))
        );
    }
}
