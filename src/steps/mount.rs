use crate::{
    config::DiskSelection,
    steps::{
        create_dir,
        partition::{BOOT_LABEL, ROOT_LABEL},
        shell, wait_for_path, Step,
    },
};

pub const TARGET_ROOT: &str = "/mnt";
pub const TARGET_BOOT: &str = "/mnt/boot";

/// Creates `to` if needed, then mounts `from` onto it.
pub fn mount_dir(from: &str, to: &str) -> Vec<Step> {
    vec![
        create_dir(to),
        shell(format!("Mounting {} to {}", from, to), format!("mount {} {}", from, to)),
    ]
}

/// Mounts the filesystem labelled `label`, waiting for udev to publish the
/// label link first.
pub fn mount_by_label(label: &str, to: &str) -> Vec<Step> {
    let dev = format!("/dev/disk/by-label/{}", label);
    let mut steps = vec![wait_for_path(&dev)];
    steps.extend(mount_dir(&dev, to));
    steps
}

/// Root goes to `/mnt`: the opened mapper device when encrypted, otherwise
/// the labelled partition.
pub fn mount_root(disk: &DiskSelection) -> Vec<Step> {
    if disk.encrypt() {
        mount_dir(&format!("/dev/mapper/{}", ROOT_LABEL), TARGET_ROOT)
    } else {
        mount_by_label(ROOT_LABEL, TARGET_ROOT)
    }
}

/// The ESP goes to `/mnt/boot`. Only used on UEFI.
pub fn mount_boot() -> Vec<Step> {
    mount_by_label(BOOT_LABEL, TARGET_BOOT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{tests::{luks, sample}, Firmware};

    fn texts(steps: &[Step]) -> Vec<String> {
        steps.iter().map(|s| s.command_text()).collect()
    }

    #[test]
    fn plain_root_mounts_by_label() {
        let conf = sample(Firmware::Bios, None);
        let t = texts(&mount_root(&conf.disk));
        assert_eq!(t.len(), 3);
        assert!(t[0].contains("[ -e /dev/disk/by-label/NIXROOT ]"));
        assert_eq!(t[1], "mkdir -p /mnt");
        assert_eq!(t[2], "mount /dev/disk/by-label/NIXROOT /mnt");
    }

    #[test]
    fn encrypted_root_mounts_mapper() {
        let conf = sample(Firmware::Uefi, luks(None));
        assert_eq!(
            texts(&mount_root(&conf.disk)),
            vec!["mkdir -p /mnt", "mount /dev/mapper/NIXROOT /mnt"]
        );
    }

    #[test]
    fn boot_mount_creates_dir_first() {
        let t = texts(&mount_boot());
        assert_eq!(t[1], "mkdir -p /mnt/boot");
        assert_eq!(t[2], "mount /dev/disk/by-label/NIXBOOT /mnt/boot");
    }

    #[test]
    fn mounts_ignore_unrelated_fields() {
        let a = sample(Firmware::Uefi, luks(Some(2)));
        let mut b = a.clone();
        b.hostname = "elsewhere".into();
        b.keyboard_layout = "us".into();
        assert_eq!(texts(&mount_root(&a.disk)), texts(&mount_root(&b.disk)));
    }
}
