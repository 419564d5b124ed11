mod cmd;
mod config;
mod engine;
mod error;
mod plan;
mod prompt;
mod steps;
mod sysfs;
mod ui;
mod wizard;

use std::path::{Path, PathBuf};

use clap::Parser;
use dialoguer::Confirm;
use tracing_subscriber::EnvFilter;

use engine::{Engine, Mode};
use error::InstallerError;

const TOTAL_PHASES: u8 = 4;

/// Guided NixOS installation onto a whole disk.
#[derive(Debug, Parser)]
#[command(name = "nixos-up", version, about)]
struct Cli {
    /// Print every step without running anything.
    #[arg(long, conflicts_with = "to_script")]
    dry_run: bool,

    /// Write the steps to a shell script instead of running them.
    #[arg(long)]
    to_script: bool,

    /// File name for --to-script.
    #[arg(long, default_value = "nixos-install.sh")]
    script_name: PathBuf,

    /// More log output on stderr (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.dry_run {
            Mode::DryRun
        } else if self.to_script {
            Mode::Script(self.script_name.clone())
        } else {
            Mode::Live
        }
    }

    fn log_filter(&self) -> EnvFilter {
        let level = match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(()) => {}
        Err(InstallerError::Cancelled) => {
            println!();
            ui::print_warning("Installation cancelled, nothing was changed.");
        }
        Err(e) => {
            println!();
            ui::print_error(&e.to_string());
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<(), InstallerError> {
    let mode = cli.mode();
    let root = Path::new("/");

    // ── Guards ────────────────────────────────────────────────────────────────
    check_environment(root, &mode)?;

    // ── Welcome ───────────────────────────────────────────────────────────────
    ui::print_banner();
    match &mode {
        Mode::DryRun => ui::print_warning("DRY-RUN MODE: no disk will be touched, no command will run."),
        Mode::Script(path) => ui::print_info(&format!("Steps will be written to {}.", path.display())),
        Mode::Live => ui::print_info("The selected disk will be erased after the final confirmation."),
    }

    // ── Step 1: Inspect the machine ─────────────────────────────────────────────
    ui::print_step(1, TOTAL_PHASES, "System Detection");
    let firmware = sysfs::detect_firmware(root);
    let interfaces = sysfs::network_interfaces(root);
    let devices = sysfs::list_block_devices(root)?;
    ui::print_info(&format!("Boot mode: {}", firmware));
    ui::print_info(&format!("Network interfaces: {}", interfaces.join(", ")));
    tracing::debug!(disks = devices.len(), "found block devices");

    // ── Step 2: Ask ───────────────────────────────────────────────────────────
    ui::print_step(2, TOTAL_PHASES, "Installation Choices");
    let conf = wizard::collect(&mut prompt::Terminal, &devices, firmware, interfaces)?;

    // ── Step 3: Review ────────────────────────────────────────────────────────
    ui::print_step(3, TOTAL_PHASES, "Review");
    let rows = wizard::summary_rows(&conf);
    let rows: Vec<(&str, &str)> = rows.iter().map(|(k, v)| (*k, v.as_str())).collect();
    ui::print_kv_box("Your selection", &rows);
    println!();

    let prompt = match mode {
        Mode::Live => format!("Erase {} and install NixOS?", conf.disk.device_path()),
        _ => "Continue with these settings?".to_string(),
    };
    if !Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact_opt()?
        .unwrap_or(false)
    {
        return Err(InstallerError::Cancelled);
    }

    // ── Step 4: Build and run ─────────────────────────────────────────────────
    ui::print_step(4, TOTAL_PHASES, "Installation");
    let plan = plan::compose(&conf, &mut rand::thread_rng())?;
    ui::print_info(&format!("{} steps planned.", plan.len()));

    Engine::new(mode.clone(), cmd::Bash).run(&plan)?;

    if mode == Mode::Live {
        println!();
        ui::print_success("NixOS is installed. Remove the installation medium and reboot.");
    }
    Ok(())
}

/// Root is always required. A busy `/mnt` only matters when something will
/// be mounted there.
fn check_environment(root: &Path, mode: &Mode) -> Result<(), InstallerError> {
    if !sysfs::is_root(root) {
        return Err(InstallerError::NotRoot);
    }
    if *mode != Mode::DryRun && sysfs::mount_is_used(root, steps::mount::TARGET_ROOT)? {
        return Err(InstallerError::MountBusy(steps::mount::TARGET_ROOT.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_root(uid: u32, mounts: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let proc_self = dir.path().join("proc/self");
        fs::create_dir_all(&proc_self).unwrap();
        fs::write(proc_self.join("status"), format!("Uid:\t{0}\t{0}\t{0}\t{0}\n", uid)).unwrap();
        fs::write(proc_self.join("mounts"), mounts).unwrap();
        dir
    }

    #[test]
    fn root_is_required_even_for_dry_run() {
        let dir = fake_root(1000, "");
        for mode in [Mode::DryRun, Mode::Live, Mode::Script("x.sh".into())] {
            assert!(matches!(
                check_environment(dir.path(), &mode),
                Err(InstallerError::NotRoot)
            ));
        }
    }

    #[test]
    fn busy_mnt_only_blocks_real_runs() {
        let dir = fake_root(0, "/dev/sdb1 /mnt ext4 rw 0 0\n");
        assert!(check_environment(dir.path(), &Mode::DryRun).is_ok());
        assert!(matches!(
            check_environment(dir.path(), &Mode::Live),
            Err(InstallerError::MountBusy(_))
        ));
        assert!(check_environment(dir.path(), &Mode::Script("x.sh".into())).is_err());
    }

    #[test]
    fn cli_modes() {
        let cli = Cli::parse_from(["nixos-up", "--to-script", "--script-name", "out.sh"]);
        assert_eq!(cli.mode(), Mode::Script("out.sh".into()));
        assert_eq!(Cli::parse_from(["nixos-up", "--dry-run"]).mode(), Mode::DryRun);
        assert_eq!(Cli::parse_from(["nixos-up"]).mode(), Mode::Live);
        assert!(Cli::try_parse_from(["nixos-up", "--dry-run", "--to-script"]).is_err());
    }
}
