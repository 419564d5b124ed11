use dialoguer::{Confirm, Input, Password, Select};

use crate::{
    config::Secret,
    error::{InstallerError, Result},
};

/// Validation callback for free-text answers. The error is shown under the
/// prompt and the question is asked again.
pub type Validator = fn(&str) -> std::result::Result<(), String>;

/// Questions the wizard can ask. Escaping out of any of them is a
/// [`InstallerError::Cancelled`].
pub trait Prompter {
    fn select(&mut self, label: &str, items: &[String], default: usize) -> Result<usize>;

    /// Asks twice and only returns once both entries match.
    fn secret_confirmed(&mut self, label: &str, allow_empty: bool) -> Result<Secret>;

    fn yes_no(&mut self, label: &str, default: bool) -> Result<bool>;

    fn text(&mut self, label: &str, default: Option<&str>, validator: Validator) -> Result<String>;
}

/// Arrow-key terminal prompts.
#[derive(Debug, Default)]
pub struct Terminal;

impl Prompter for Terminal {
    fn select(&mut self, label: &str, items: &[String], default: usize) -> Result<usize> {
        Select::new()
            .with_prompt(label)
            .items(items)
            .default(default)
            .interact_opt()?
            .ok_or(InstallerError::Cancelled)
    }

    fn secret_confirmed(&mut self, label: &str, allow_empty: bool) -> Result<Secret> {
        let value = Password::new()
            .with_prompt(label)
            .with_confirmation("Repeat to confirm", "Entries do not match, try again")
            .allow_empty_password(allow_empty)
            .interact()?;
        Ok(Secret::new(value))
    }

    fn yes_no(&mut self, label: &str, default: bool) -> Result<bool> {
        Confirm::new()
            .with_prompt(label)
            .default(default)
            .interact_opt()?
            .ok_or(InstallerError::Cancelled)
    }

    fn text(&mut self, label: &str, default: Option<&str>, validator: Validator) -> Result<String> {
        let mut input = Input::<String>::new()
            .with_prompt(label)
            .validate_with(move |s: &String| validator(s));
        if let Some(d) = default {
            input = input.default(d.to_string());
        }
        Ok(input.interact_text()?.trim().to_string())
    }
}
