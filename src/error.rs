use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Step '{label}' failed with exit code {code}")]
    StepFailed {
        label: String,
        code: i32,
        output: String,
    },

    #[error("Command '{0}' not found, is it installed?")]
    CommandNotFound(String),

    #[error("Installation cancelled by user")]
    Cancelled,

    #[error("This installer must be run as root (sudo)")]
    NotRoot,

    #[error("Something is already mounted at {0}")]
    MountBusy(String),

    #[error("No installable disk was found")]
    NoDisks,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A step reads a capture that only a later (or the same) step produces.
    #[error("Step '{label}' references ${name} before any step captures it")]
    ForwardReference { label: String, name: String },

    #[error("Gave up waiting for {path} after {attempts} attempts")]
    WaitExhausted { path: String, attempts: u32 },

    #[error("Malformed hardware token response: {0}")]
    TokenResponse(String),

    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
}

pub type Result<T> = std::result::Result<T, InstallerError>;
