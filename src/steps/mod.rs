//! The unit of work the installer runs, and the run-scoped state that carries
//! captured output from one step into the command text of later ones.
//!
//! A step is either a shell command or a host-side function. Both render the
//! same way in preview and script form; only live execution tells them apart.

pub mod format;
pub mod mount;
pub mod nixos;
pub mod partition;
pub mod token;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use crate::error::{InstallerError, Result};

// ── Plan state ────────────────────────────────────────────────────────────────

/// Capture name → most recent value. Lives for exactly one run.
#[derive(Debug, Default, Clone)]
pub struct PlanState {
    values: HashMap<String, String>,
    /// Names whose value must never be pasted into shell text.
    secret: HashSet<String>,
}

impl PlanState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Re-capturing a name overwrites the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.secret.remove(&name);
        self.values.insert(name, value.into());
    }

    pub fn insert_secret(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.secret.insert(name.clone());
        self.values.insert(name, value.into());
    }

    pub fn is_secret(&self, name: &str) -> bool {
        self.secret.contains(name)
    }

    /// Replaces every `$NAME` whose `NAME` is in the state. Unknown tokens
    /// are left as they are, and inserted values are never rescanned. Only
    /// for text that never reaches a shell.
    pub fn substitute(&self, template: &str) -> String {
        self.substitute_where(template, |_| true)
    }

    /// Like [`PlanState::substitute`], but secret names stay as `$NAME` for
    /// the shell to expand from [`PlanState::secret_env`].
    pub fn substitute_public(&self, template: &str) -> String {
        self.substitute_where(template, |name| !self.is_secret(name))
    }

    /// Secret captures as environment variables for a shell command.
    pub fn secret_env(&self) -> Vec<(&str, &str)> {
        let mut env: Vec<(&str, &str)> = self
            .secret
            .iter()
            .filter_map(|n| Some((n.as_str(), self.get(n)?)))
            .collect();
        env.sort();
        env
    }

    fn substitute_where(&self, template: &str, allowed: impl Fn(&str) -> bool) -> String {
        let mut out = String::with_capacity(template.len());
        for seg in segments(template) {
            match seg {
                Segment::Text(t) => out.push_str(t),
                Segment::Var(name) => match self.get(name).filter(|_| allowed(name)) {
                    Some(v) => out.push_str(v),
                    None => {
                        out.push('$');
                        out.push_str(name);
                    }
                },
            }
        }
        out
    }
}

// ── `$NAME` tokenizer ─────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    Text(&'a str),
    /// The identifier after a `$`, without the `$`.
    Var(&'a str),
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Splits text into literal runs and `$IDENT` tokens. A `$` not followed by an
/// identifier character stays in the literal run.
pub(crate) fn segments(text: &str) -> Vec<Segment<'_>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut lit_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && is_ident(bytes[i + 1]) {
            let mut end = i + 1;
            while end < bytes.len() && is_ident(bytes[end]) {
                end += 1;
            }
            if lit_start < i {
                out.push(Segment::Text(&text[lit_start..i]));
            }
            out.push(Segment::Var(&text[i + 1..end]));
            i = end;
            lit_start = end;
        } else {
            i += 1;
        }
    }
    if lit_start < bytes.len() {
        out.push(Segment::Text(&text[lit_start..]));
    }
    out
}

/// Names referenced as `$NAME` in `text`.
pub(crate) fn referenced_names(text: &str) -> Vec<&str> {
    segments(text)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Var(n) => Some(n),
            Segment::Text(_) => None,
        })
        .collect()
}

/// Escapes `text` for a double-quoted shell word, keeping `$NAME` live only
/// for names in `live`.
pub(crate) fn double_quote_escape(text: &str, live: &HashSet<String>) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for seg in segments(text) {
        match seg {
            Segment::Var(name) if live.contains(name) => {
                out.push('$');
                out.push_str(name);
            }
            Segment::Var(name) => {
                out.push_str("\\$");
                out.push_str(name);
            }
            Segment::Text(t) => {
                for c in t.chars() {
                    if matches!(c, '\\' | '$' | '`' | '"') {
                        out.push('\\');
                    }
                    out.push(c);
                }
            }
        }
    }
    out
}

// ── Step ──────────────────────────────────────────────────────────────────────

/// Name under which a step's output is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub name: String,
    /// Secret output is stored but never echoed.
    pub secret: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellStep {
    pub label: String,
    /// May contain `$NAME` placeholders.
    pub command: String,
    pub capture: Option<Capture>,
}

/// How a function step reads in preview and in an emitted script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellForm {
    /// A command with the same effect and output.
    Command(String),
    /// Writes `content` (after substitution) to `path`.
    WriteFile {
        path: PathBuf,
        content: String,
        append: bool,
    },
}

type HostFn = Box<dyn Fn(&PlanState) -> Result<String>>;

pub struct FunctionStep {
    pub label: String,
    pub capture: Option<Capture>,
    pub shell: ShellForm,
    func: HostFn,
}

impl FunctionStep {
    pub fn new(
        label: impl Into<String>,
        shell: ShellForm,
        func: impl Fn(&PlanState) -> Result<String> + 'static,
    ) -> Self {
        FunctionStep {
            label: label.into(),
            capture: None,
            shell,
            func: Box::new(func),
        }
    }

    pub fn call(&self, state: &PlanState) -> Result<String> {
        (self.func)(state)
    }
}

impl fmt::Debug for FunctionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionStep")
            .field("label", &self.label)
            .field("capture", &self.capture)
            .field("shell", &self.shell)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Step {
    Shell(ShellStep),
    Function(FunctionStep),
}

impl Step {
    pub fn label(&self) -> &str {
        match self {
            Step::Shell(s) => &s.label,
            Step::Function(f) => &f.label,
        }
    }

    pub fn capture(&self) -> Option<&Capture> {
        match self {
            Step::Shell(s) => s.capture.as_ref(),
            Step::Function(f) => f.capture.as_ref(),
        }
    }

    pub fn capture_name(&self) -> Option<&str> {
        self.capture().map(|c| c.name.as_str())
    }

    /// Unsubstituted command text, or for a function step its shell form.
    pub fn command_text(&self) -> String {
        match self {
            Step::Shell(s) => s.command.clone(),
            Step::Function(f) => match &f.shell {
                ShellForm::Command(c) => c.clone(),
                ShellForm::WriteFile {
                    path,
                    content,
                    append,
                } => {
                    let op = if *append { "append to" } else { "write" };
                    format!("{} {}:\n{}", op, path.display(), content)
                }
            },
        }
    }

    /// Stores the step's output under `name`. Secret output is never shown
    /// and reaches shell commands only through their environment.
    pub fn with_capture(mut self, name: &str, secret: bool) -> Self {
        self.set_capture(name, secret);
        self
    }

    pub fn captured_secret(self, name: &str) -> Self {
        self.with_capture(name, true)
    }

    fn set_capture(&mut self, name: &str, secret: bool) {
        let cap = Some(Capture {
            name: name.to_string(),
            secret,
        });
        match self {
            Step::Shell(s) => s.capture = cap,
            Step::Function(f) => f.capture = cap,
        }
    }
}

// ── Builders ──────────────────────────────────────────────────────────────────

pub fn shell(label: impl Into<String>, command: impl Into<String>) -> Step {
    Step::Shell(ShellStep {
        label: label.into(),
        command: command.into(),
        capture: None,
    })
}

pub fn create_dir(dir: &str) -> Step {
    shell(
        format!("Create {} if it doesn't already exist", dir),
        format!("mkdir -p {}", dir),
    )
}

pub fn unmount(dir: &str) -> Step {
    shell(format!("Unmounting {}", dir), format!("umount {}", dir))
}

/// Writes `content` to `path`, substituting captured values first.
pub fn write_file(label: impl Into<String>, path: impl Into<PathBuf>, content: impl Into<String>) -> Step {
    file_step(label.into(), path.into(), content.into(), false)
}

/// Appends `content` to `path`, substituting captured values first.
pub fn append_file(label: impl Into<String>, path: impl Into<PathBuf>, content: impl Into<String>) -> Step {
    file_step(label.into(), path.into(), content.into(), true)
}

fn file_step(label: String, path: PathBuf, content: String, append: bool) -> Step {
    let shell = ShellForm::WriteFile {
        path: path.clone(),
        content: content.clone(),
        append,
    };
    Step::Function(FunctionStep::new(label, shell, move |state| {
        let text = state.substitute(&content);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)?;
        file.write_all(text.as_bytes())?;
        Ok(String::new())
    }))
}

/// Puts a value the installer already holds into the plan state. The emitted
/// script asks for it instead.
pub fn secret_input(label: impl Into<String>, name: &str, prompt: &str, value: String) -> Step {
    let ask = format!("systemd-ask-password \"{}\"", prompt);
    Step::Function(FunctionStep::new(label, ShellForm::Command(ask), move |_| {
        Ok(value.clone())
    }))
    .captured_secret(name)
}

pub const WAIT_ATTEMPTS: u32 = 10;
pub const WAIT_INTERVAL: Duration = Duration::from_secs(1);

/// Polls until `path` exists. Exhausting the attempts fails the step.
pub fn wait_for_path(path: &str) -> Step {
    wait_for_path_with(path, WAIT_ATTEMPTS, WAIT_INTERVAL)
}

pub fn wait_for_path_with(path: &str, attempts: u32, interval: Duration) -> Step {
    let script = format!(
        "for _ in $(seq {n}); do [ -e {p} ] && break; sleep {s}; done; [ -e {p} ]",
        n = attempts,
        p = path,
        s = interval.as_secs().max(1),
    );
    let target = path.to_string();
    Step::Function(FunctionStep::new(
        format!("Wait for {} to appear", path),
        ShellForm::Command(script),
        move |_| {
            for attempt in 1..=attempts {
                if Path::new(&target).exists() {
                    tracing::debug!(path = %target, attempt, "path appeared");
                    return Ok(String::new());
                }
                if attempt < attempts {
                    thread::sleep(interval);
                }
            }
            Err(InstallerError::WaitExhausted {
                path: target.clone(),
                attempts,
            })
        },
    ))
}
