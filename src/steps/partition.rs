use crate::{
    config::{DiskSelection, Firmware},
    steps::{shell, Step},
};

pub const BOOT_LABEL: &str = "NIXBOOT";
pub const ROOT_LABEL: &str = "NIXROOT";

// ── Data types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionTable {
    Gpt,
    Mbr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemKind {
    Ext4,
    Fat32,
}

impl FilesystemKind {
    /// Name passed to `parted mkpart`.
    pub fn parted_name(self) -> &'static str {
        match self {
            FilesystemKind::Ext4 => "ext4",
            FilesystemKind::Fat32 => "fat32",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub filesystem: FilesystemKind,
    pub label: &'static str,
    pub device_path: String, // /dev/sda1
    pub ordinal: u32,
    pub primary: bool,
    pub start: &'static str,
    pub end: &'static str,
    pub bootable: bool,
}

impl Partition {
    pub fn is_boot(&self) -> bool {
        self.label == BOOT_LABEL
    }

    /// Where the opened LUKS container shows up.
    pub fn mapper_path(&self) -> String {
        format!("/dev/mapper/{}", self.label)
    }
}

// ── Planning ──────────────────────────────────────────────────────────────────

pub fn choose_partition_table(firmware: Firmware) -> PartitionTable {
    match firmware {
        Firmware::Uefi => PartitionTable::Gpt,
        Firmware::Bios => PartitionTable::Mbr,
    }
}

/// Device node of partition `n` on `disk`, e.g. `sda` → `sda1`,
/// `nvme0n1` → `nvme0n1p1`.
pub fn partition_name(disk: &str, n: u32) -> String {
    if disk.starts_with("sd") || disk.starts_with("vd") || disk.starts_with("hd") {
        format!("{}{}", disk, n)
    } else if disk.starts_with("nvme") || disk.starts_with("mmcblk") {
        format!("{}p{}", disk, n)
    } else {
        let guess = format!("{}{}", disk, n);
        tracing::warn!(disk, guess = %guess, "unrecognised disk type, guessing partition name");
        guess
    }
}

/// The fixed layout for each boot mode:
///   BIOS → 1: root (ext4)
///   UEFI → 1: ESP (FAT32), 2: root (ext4)
pub fn plan_partitions(disk: &str, firmware: Firmware) -> Vec<Partition> {
    let dev = |n| format!("/dev/{}", partition_name(disk, n));
    match firmware {
        Firmware::Bios => vec![Partition {
            filesystem: FilesystemKind::Ext4,
            label: ROOT_LABEL,
            device_path: dev(1),
            ordinal: 1,
            primary: true,
            start: "1MiB",
            end: "100%",
            bootable: false,
        }],
        Firmware::Uefi => vec![
            Partition {
                filesystem: FilesystemKind::Fat32,
                label: BOOT_LABEL,
                device_path: dev(1),
                ordinal: 1,
                primary: false,
                start: "4MiB",
                end: "512MiB",
                bootable: true,
            },
            Partition {
                filesystem: FilesystemKind::Ext4,
                label: ROOT_LABEL,
                device_path: dev(2),
                ordinal: 2,
                primary: true,
                start: "512MiB",
                end: "100%",
                bootable: false,
            },
        ],
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub fn table_command(table: PartitionTable, disk: &str) -> Step {
    let (name, parted) = match table {
        PartitionTable::Mbr => ("MBR", "msdos"),
        PartitionTable::Gpt => ("GPT", "gpt"),
    };
    shell(
        format!("Formatting {} to {}", disk, name),
        format!("parted -s /dev/{} -- mklabel {}", disk, parted),
    )
}

/// One `mkpart` per partition, plus the ESP flag for the bootable one on UEFI.
pub fn partition_commands(disk: &DiskSelection, firmware: Firmware) -> Vec<Step> {
    let mut steps = Vec::new();

    for p in plan_partitions(&disk.name, firmware) {
        let esp = p.bootable && firmware == Firmware::Uefi;
        let part_type = if esp {
            "ESP"
        } else if p.primary {
            "primary"
        } else {
            "extended"
        };

        steps.push(shell(
            format!(
                "Create partition {} on {} from {} to {}",
                p.ordinal, disk.name, p.start, p.end
            ),
            format!(
                "parted -s /dev/{} -- mkpart {} {} {} {}",
                disk.name,
                part_type,
                p.filesystem.parted_name(),
                p.start,
                p.end
            ),
        ));

        if esp {
            steps.push(shell(
                format!("Set partition {} bootable", p.ordinal),
                format!("parted -s /dev/{} -- set {} esp on", disk.name, p.ordinal),
            ));
        }
    }

    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{luks, sample};
    use proptest::prelude::*;

    fn firmware() -> impl Strategy<Value = Firmware> {
        prop_oneof![Just(Firmware::Uefi), Just(Firmware::Bios)]
    }

    proptest! {
        #[test]
        fn layout_has_one_root_and_boot_only_on_uefi(fw in firmware(), disk in "sd[a-z]") {
            let parts = plan_partitions(&disk, fw);
            prop_assert!(!parts.is_empty());

            let bootable = parts.iter().filter(|p| p.bootable).count();
            prop_assert_eq!(bootable, if fw == Firmware::Uefi { 1 } else { 0 });
            prop_assert_eq!(parts.iter().filter(|p| p.primary).count(), 1);
            prop_assert_eq!(parts.iter().filter(|p| p.label == ROOT_LABEL).count(), 1);
        }

        #[test]
        fn different_tables_render_differently(disk in "[a-z]{2,5}[0-9]?") {
            prop_assert_ne!(
                table_command(PartitionTable::Gpt, &disk).command_text(),
                table_command(PartitionTable::Mbr, &disk).command_text()
            );
        }
    }

    #[test]
    fn table_choice_follows_firmware() {
        assert_eq!(choose_partition_table(Firmware::Uefi), PartitionTable::Gpt);
        assert_eq!(choose_partition_table(Firmware::Bios), PartitionTable::Mbr);
    }

    #[test]
    fn partition_names() {
        assert_eq!(partition_name("sda", 1), "sda1");
        assert_eq!(partition_name("vdb", 2), "vdb2");
        assert_eq!(partition_name("nvme0n1", 2), "nvme0n1p2");
        assert_eq!(partition_name("mmcblk0", 1), "mmcblk0p1");
        assert_eq!(partition_name("xyz", 3), "xyz3");
    }

    #[test]
    fn uefi_layout() {
        let parts = plan_partitions("nvme0n1", Firmware::Uefi);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].label, BOOT_LABEL);
        assert_eq!(parts[0].device_path, "/dev/nvme0n1p1");
        assert_eq!((parts[0].start, parts[0].end), ("4MiB", "512MiB"));
        assert!(parts[0].is_boot() && !parts[0].primary);
        assert_eq!(parts[1].filesystem, FilesystemKind::Ext4);
        assert_eq!((parts[1].start, parts[1].end), ("512MiB", "100%"));
        assert_eq!(parts[1].mapper_path(), "/dev/mapper/NIXROOT");
    }

    #[test]
    fn bios_partitions_have_no_esp_flag() {
        let conf = sample(Firmware::Bios, None);
        let cmds: Vec<String> = partition_commands(&conf.disk, Firmware::Bios)
            .iter()
            .map(|s| s.command_text())
            .collect();
        assert_eq!(cmds, vec!["parted -s /dev/sda -- mkpart primary ext4 1MiB 100%"]);
    }

    #[test]
    fn uefi_partitions_mark_esp() {
        let conf = sample(Firmware::Uefi, luks(None));
        let cmds: Vec<String> = partition_commands(&conf.disk, Firmware::Uefi)
            .iter()
            .map(|s| s.command_text())
            .collect();
        assert_eq!(
            cmds,
            vec![
                "parted -s /dev/sda -- mkpart ESP fat32 4MiB 512MiB",
                "parted -s /dev/sda -- set 1 esp on",
                "parted -s /dev/sda -- mkpart primary ext4 512MiB 100%",
            ]
        );
    }
}
