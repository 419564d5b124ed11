//! Hardware-token protected root encryption.
//!
//! The LUKS key is PBKDF2-HMAC-SHA512 over the user's passphrase, salted with
//! the token's response to `SHA-512(salt)`. The salt and iteration count are
//! left on the boot partition so the installed system's initrd can repeat the
//! challenge at every boot. Each step feeds the next through the plan state,
//! so the order here is fixed.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha512};

use crate::{
    error::{InstallerError, Result},
    steps::{
        create_dir,
        format::{make_mapped_filesystem, LUKS_PASSPHRASE},
        partition::{Partition, BOOT_LABEL},
        shell, unmount, wait_for_path, write_file, FunctionStep, PlanState, ShellForm, Step,
    },
};

pub const SALT_LENGTH: usize = 16;
pub const KEY_LENGTH: usize = 512;
pub const ITERATIONS: u32 = 1_000_000;
pub const CIPHER: &str = "aes-xts-plain64";
pub const HASH: &str = "sha512";

/// Raw challenge response from the token.
pub const RESPONSE: &str = "YUBI_RESPONSE";
/// Derived LUKS key, hex encoded.
pub const LUKS_PASS: &str = "YUBI_LUKS_PASS";

/// Temporary mount point for the boot partition while key material is written.
pub const RECOVERY_MOUNT: &str = "/root/boot";
pub const CRYPT_STORAGE_DIR: &str = "/root/boot/crypt-storage";
pub const CRYPT_STORAGE_FILE: &str = "/root/boot/crypt-storage/default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_LENGTH]);

impl Salt {
    pub fn random(rng: &mut impl RngCore) -> Self {
        let mut bytes = [0u8; SALT_LENGTH];
        rng.fill_bytes(&mut bytes);
        Salt(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Salt(bytes)
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// `SHA-512(salt_hex)`, hex encoded.
    pub fn challenge(&self) -> String {
        hex::encode(Sha512::digest(self.hex().as_bytes()))
    }
}

/// Contents of the crypt-storage file: `<salt_hex>\n<iterations>`, nothing more.
pub fn crypt_storage_contents(salt: &Salt, iterations: u32) -> String {
    format!("{}\n{}", salt.hex(), iterations)
}

/// Derives the hex-encoded LUKS key from the passphrase and the token's
/// hex response.
pub fn derive_luks_key(passphrase: &[u8], response_hex: &str, iterations: u32) -> Result<String> {
    let response = hex::decode(response_hex.trim())
        .map_err(|e| InstallerError::TokenResponse(e.to_string()))?;
    if response.is_empty() {
        return Err(InstallerError::TokenResponse("empty response".into()));
    }

    let mut key = [0u8; KEY_LENGTH / 8];
    pbkdf2_hmac::<Sha512>(passphrase, &response, iterations, &mut key);
    Ok(hex::encode(key))
}

fn derive_step(iterations: u32) -> Step {
    let equivalent = format!(
        "printf '%s' \"${}\" | pbkdf2-sha512 {} {} \"${}\" | rbtohex",
        LUKS_PASSPHRASE,
        KEY_LENGTH / 8,
        iterations,
        RESPONSE
    );
    Step::Function(FunctionStep::new(
        "Derive LUKS key from passphrase and token response",
        ShellForm::Command(equivalent),
        move |state: &PlanState| {
            let response = state
                .get(RESPONSE)
                .ok_or_else(|| InstallerError::TokenResponse("no response captured".into()))?;
            let passphrase = state.get(LUKS_PASSPHRASE).unwrap_or_default();
            derive_luks_key(passphrase.as_bytes(), response, iterations)
        },
    ))
    .captured_secret(LUKS_PASS)
}

/// The full token sequence for the root partition `p`.
pub fn token_commands(p: &Partition, slot: u8, salt: &Salt) -> Vec<Step> {
    token_commands_with(p, slot, salt, ITERATIONS)
}

/// [`token_commands`] with a chosen PBKDF2 iteration count.
pub fn token_commands_with(p: &Partition, slot: u8, salt: &Salt, iterations: u32) -> Vec<Step> {
    let by_label = format!("/dev/disk/by-label/{}", BOOT_LABEL);

    vec![
        shell(
            format!("Challenge hardware token in slot {} (touch it if it blinks)", slot),
            format!("ykchalresp -{} -x {} 2>/dev/null", slot, salt.challenge()),
        )
        .captured_secret(RESPONSE),
        derive_step(iterations),
        shell(
            format!("Encrypt {} with the token-derived key", p.device_path),
            format!(
                "printf '%s' \"${}\" | cryptsetup luksFormat --batch-mode --cipher=\"{}\" \
                 --key-size=\"{}\" --hash=\"{}\" --key-file=- \"{}\"",
                LUKS_PASS, CIPHER, KEY_LENGTH, HASH, p.device_path
            ),
        ),
        shell(
            format!("Open LUKS partition {} as {}", p.device_path, p.label),
            format!(
                "printf '%s' \"${}\" | cryptsetup luksOpen {} {} --key-file=-",
                LUKS_PASS, p.device_path, p.label
            ),
        ),
        make_mapped_filesystem(p),
        wait_for_path(&by_label),
        create_dir(RECOVERY_MOUNT),
        shell(
            format!("Mounting {} to {}", BOOT_LABEL, RECOVERY_MOUNT),
            format!("mount {} {}", by_label, RECOVERY_MOUNT),
        ),
        create_dir(CRYPT_STORAGE_DIR),
        write_file(
            "Write salt and iterations into crypt storage",
            CRYPT_STORAGE_FILE,
            crypt_storage_contents(salt, iterations),
        ),
        unmount(RECOVERY_MOUNT),
    ]
}
