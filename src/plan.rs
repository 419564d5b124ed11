//! Turns a finished [`Configuration`] into the ordered list of steps for the
//! whole run. Nothing here touches the system; the engine decides whether
//! the list is previewed, scripted or executed.

use std::collections::HashSet;

use rand::RngCore;

use crate::{
    config::Configuration,
    error::{InstallerError, Result},
    steps::{
        format::{format_commands, passphrase_step},
        mount::{mount_boot, mount_root},
        nixos::{configuration_commands, install_command},
        partition::{choose_partition_table, partition_commands, table_command},
        referenced_names,
        token::Salt,
        Step,
    },
};

#[derive(Debug)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    /// Rejects a step list in which some step reads a capture that is only
    /// produced by itself or a later step.
    pub fn new(steps: Vec<Step>) -> Result<Self> {
        check_references(&steps)?;
        Ok(Plan { steps })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn check_references(steps: &[Step]) -> Result<()> {
    let produced: HashSet<&str> = steps.iter().filter_map(|s| s.capture_name()).collect();
    let mut available: HashSet<&str> = HashSet::new();

    for step in steps {
        let text = step.command_text();
        for name in referenced_names(&text) {
            if produced.contains(name) && !available.contains(name) {
                return Err(InstallerError::ForwardReference {
                    label: step.label().to_string(),
                    name: name.to_string(),
                });
            }
        }
        if let Some(name) = step.capture_name() {
            available.insert(name);
        }
    }
    Ok(())
}

/// Passphrase, partition table, partitions, then filesystems.
pub fn disk_commands(conf: &Configuration, salt: &Salt) -> Vec<Step> {
    let mut steps = Vec::new();
    steps.extend(passphrase_step(&conf.disk));
    steps.push(table_command(choose_partition_table(conf.firmware), &conf.disk.name));
    steps.extend(partition_commands(&conf.disk, conf.firmware));
    steps.extend(format_commands(&conf.disk, conf.firmware, salt));
    steps
}

/// Builds the full run. Stage order is fixed: disk, root mount, boot mount,
/// configuration, install. Later stages rely on mounts made by earlier ones.
pub fn compose(conf: &Configuration, rng: &mut impl RngCore) -> Result<Plan> {
    conf.validate()?;

    let salt = Salt::random(rng);
    let mut steps = disk_commands(conf, &salt);

    steps.extend(mount_root(&conf.disk));

    if conf.is_uefi() {
        steps.extend(mount_boot());
    }

    steps.extend(configuration_commands(conf));
    steps.push(install_command());

    tracing::debug!(steps = steps.len(), firmware = %conf.firmware, "plan composed");
    Plan::new(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        tests::{luks, sample},
        Firmware,
    };
    use crate::steps::{
        shell,
        token::{LUKS_PASS, RESPONSE},
    };
    use rand::{rngs::StdRng, SeedableRng};

    fn plan_for(conf: &Configuration) -> Plan {
        compose(conf, &mut StdRng::seed_from_u64(7)).unwrap()
    }

    fn texts(plan: &Plan) -> Vec<String> {
        plan.steps().iter().map(|s| s.command_text()).collect()
    }

    fn position(t: &[String], pred: impl Fn(&str) -> bool) -> usize {
        t.iter().position(|s| pred(s)).expect("step not found")
    }

    #[test]
    fn plain_bios_plan_starts_with_disk_setup() {
        let plan = plan_for(&sample(Firmware::Bios, None));
        let t = texts(&plan);

        assert_eq!(t[0], "parted -s /dev/sda -- mklabel msdos");
        assert_eq!(t[1], "parted -s /dev/sda -- mkpart primary ext4 1MiB 100%");
        assert_eq!(t[2], "mkfs.ext4 -L NIXROOT /dev/sda1");
        assert_eq!(t.iter().filter(|c| c.contains("mkpart")).count(), 1);
        assert!(!t.iter().any(|c| c.contains("cryptsetup")));
        assert!(!t.iter().any(|c| c.contains("/mnt/boot")));
        assert_eq!(t.last().unwrap(), "nixos-install --no-root-passwd");
    }

    #[test]
    fn encrypted_uefi_plan() {
        let plan = plan_for(&sample(Firmware::Uefi, luks(None)));
        let t = texts(&plan);

        assert_eq!(t.iter().filter(|c| c.contains("mkpart")).count(), 2);
        let fmt = position(&t, |c| c.contains("luksFormat"));
        assert!(t[fmt + 1].contains("luksOpen"));
        assert_eq!(t[fmt + 2], "mkfs.ext4 /dev/mapper/NIXROOT");

        let root = position(&t, |c| c == "mount /dev/mapper/NIXROOT /mnt");
        let boot = position(&t, |c| c == "mount /dev/disk/by-label/NIXBOOT /mnt/boot");
        let config = position(&t, |c| c.starts_with("nixos-generate-config"));
        assert!(fmt < root && root < boot && boot < config);
        assert_eq!(t[root - 1], "mkdir -p /mnt");
    }

    #[test]
    fn token_plan_order() {
        let plan = plan_for(&sample(Firmware::Uefi, luks(Some(2))));
        let steps = plan.steps();
        let t = texts(&plan);

        let chal = steps.iter().position(|s| s.capture_name() == Some(RESPONSE)).unwrap();
        let derive = steps.iter().position(|s| s.capture_name() == Some(LUKS_PASS)).unwrap();
        let fmt = position(&t, |c| c.contains("luksFormat"));
        let open = position(&t, |c| c.contains("luksOpen"));
        let mkfs = position(&t, |c| c == "mkfs.ext4 /dev/mapper/NIXROOT");
        let mount = position(&t, |c| c == "mount /dev/disk/by-label/NIXBOOT /root/boot");
        let write = position(&t, |c| c.starts_with("write /root/boot/crypt-storage/default"));
        let umount = position(&t, |c| c == "umount /root/boot");

        assert!(chal < derive && derive < fmt && fmt < open && open < mkfs);
        assert!(mkfs < mount && mount < write && write < umount);
        assert!(t[fmt].contains("$YUBI_LUKS_PASS"));
        assert!(!t[fmt].contains("correct horse"));
        assert!(t.iter().any(|c| c.starts_with("append to /mnt/etc/nixos/hardware-configuration.nix")));
    }

    #[test]
    fn invalid_configuration_yields_no_plan() {
        let mut conf = sample(Firmware::Uefi, None);
        conf.hostname = "bad host".into();
        assert!(matches!(
            compose(&conf, &mut StdRng::seed_from_u64(1)),
            Err(InstallerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn composed_plans_have_no_forward_references() {
        for conf in [
            sample(Firmware::Bios, None),
            sample(Firmware::Uefi, None),
            sample(Firmware::Uefi, luks(None)),
            sample(Firmware::Uefi, luks(Some(1))),
        ] {
            assert!(compose(&conf, &mut StdRng::seed_from_u64(3)).is_ok());
        }
    }

    #[test]
    fn forward_reference_is_rejected() {
        let steps = vec![
            shell("use", "echo $LATER"),
            shell("make", "echo hi").with_capture("LATER", false),
        ];
        assert!(matches!(
            Plan::new(steps),
            Err(InstallerError::ForwardReference { ref name, .. }) if name == "LATER"
        ));

        let self_ref = vec![shell("loop", "echo $ME").with_capture("ME", false)];
        assert!(Plan::new(self_ref).is_err());

        let literal = vec![shell("env", "echo $HOME")];
        assert!(Plan::new(literal).is_ok());
    }

    #[test]
    fn disk_stage_ignores_hostname() {
        let a = sample(Firmware::Uefi, luks(Some(2)));
        let mut b = a.clone();
        b.hostname = "different".into();
        let salt = Salt::from_bytes([9; 16]);
        let ta: Vec<String> = disk_commands(&a, &salt).iter().map(|s| s.command_text()).collect();
        let tb: Vec<String> = disk_commands(&b, &salt).iter().map(|s| s.command_text()).collect();
        assert_eq!(ta, tb);
    }
}
