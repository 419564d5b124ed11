//! Runs a [`Plan`] in one of three modes: preview, live, or script emission.
//!
//! Live execution is strictly sequential. The first failing step ends the
//! run; nothing is retried or rolled back.

use std::{
    collections::HashSet,
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use crate::{
    cmd::ShellRunner,
    error::{InstallerError, Result},
    plan::Plan,
    steps::{double_quote_escape, PlanState, ShellForm, Step},
    ui,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Print every step without running anything.
    DryRun,
    /// Run every step against the real system.
    Live,
    /// Write the plan as a standalone shell script.
    Script(PathBuf),
}

pub struct Engine<R> {
    mode: Mode,
    runner: R,
}

impl<R: ShellRunner> Engine<R> {
    pub fn new(mode: Mode, runner: R) -> Self {
        Engine { mode, runner }
    }

    pub fn run(&mut self, plan: &Plan) -> Result<()> {
        match &self.mode {
            Mode::DryRun => {
                print!("{}", render_preview(plan));
                Ok(())
            }
            Mode::Script(path) => {
                write_script(path, &render_script(plan))?;
                ui::print_success(&format!("Install script written to {}", path.display()));
                Ok(())
            }
            Mode::Live => execute(plan, &mut self.runner).map(|_| ()),
        }
    }
}

// ── Dry run ───────────────────────────────────────────────────────────────────

/// Every label with its unsubstituted command text.
pub fn render_preview(plan: &Plan) -> String {
    let total = plan.len();
    let mut out = String::new();
    for (i, step) in plan.steps().iter().enumerate() {
        out.push_str(&format!("--\n{}\n", ui::step_tag(i + 1, total, step.label())));
        out.push_str(&step.command_text());
        out.push('\n');
    }
    out
}

// ── Script emission ───────────────────────────────────────────────────────────

fn script_line(step: &Step, live: &HashSet<String>) -> String {
    let command = match step {
        Step::Shell(s) => s.command.clone(),
        Step::Function(f) => match &f.shell {
            ShellForm::Command(c) => c.clone(),
            ShellForm::WriteFile {
                path,
                content,
                append,
            } => format!(
                "printf '%s' \"{}\" {} {}",
                double_quote_escape(content, live),
                if *append { ">>" } else { ">" },
                path.display()
            ),
        },
    };
    match step.capture_name() {
        Some(name) => format!("{}=$({})", name, command),
        None => command,
    }
}

/// The plan as a bash script that reproduces the same captures with shell
/// variables.
pub fn render_script(plan: &Plan) -> String {
    let mut out = String::from("#!/usr/bin/env bash\nset -e\n");
    let mut live: HashSet<String> = HashSet::new();

    for step in plan.steps() {
        out.push_str(&format!("\n# {}\n", step.label()));
        out.push_str(&script_line(step, &live));
        out.push('\n');
        if let Some(name) = step.capture_name() {
            live.insert(name.to_string());
        }
    }
    out
}

fn write_script(path: &Path, script: &str) -> Result<()> {
    fs::write(path, script)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

// ── Live execution ────────────────────────────────────────────────────────────

/// What a step produced: the value to capture, and what to show.
struct StepOutput {
    captured: String,
    shown: String,
}

fn run_step(step: &Step, state: &PlanState, runner: &mut dyn ShellRunner) -> Result<StepOutput> {
    match step {
        Step::Shell(s) => {
            tracing::trace!(label = %s.label, command = %s.command, "shell step");
            let out = runner.run(&state.substitute_public(&s.command), &state.secret_env())?;
            let secret = s.capture.as_ref().is_some_and(|c| c.secret);
            if !out.success() {
                return Err(InstallerError::StepFailed {
                    label: s.label.clone(),
                    code: out.code.unwrap_or(-1),
                    output: if secret { String::new() } else { out.combined() },
                });
            }
            Ok(StepOutput {
                shown: out.combined(),
                captured: out.stdout,
            })
        }
        Step::Function(f) => {
            tracing::trace!(label = %f.label, "function step");
            let value = f.call(state)?;
            Ok(StepOutput {
                shown: value.clone(),
                captured: value,
            })
        }
    }
}

/// Runs every step in order, threading captures through the returned state.
pub fn execute(plan: &Plan, runner: &mut dyn ShellRunner) -> Result<PlanState> {
    let mut state = PlanState::new();
    let total = plan.len();

    for (i, step) in plan.steps().iter().enumerate() {
        let tag = ui::step_tag(i + 1, total, step.label());
        tracing::debug!(step = i + 1, label = step.label(), "starting");

        let pb = ui::spinner(format!("{}…", tag));
        let result = run_step(step, &state, runner);
        pb.finish_and_clear();

        let output = match result {
            Ok(o) => o,
            Err(e) => {
                ui::print_error(&tag);
                if let InstallerError::StepFailed { ref output, .. } = e {
                    ui::print_output(output);
                }
                return Err(e);
            }
        };

        ui::print_success(&tag);
        let secret = step.capture().is_some_and(|c| c.secret);
        if !secret && !output.shown.trim().is_empty() {
            ui::print_output(&output.shown);
        }

        if let Some(name) = step.capture_name() {
            // Same as `$(...)` in the emitted script.
            let value = output.captured.trim_end_matches('\n');
            if secret {
                state.insert_secret(name, value);
            } else {
                state.insert(name, value);
            }
        }
    }

    Ok(state)
}
