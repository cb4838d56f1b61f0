//! User prompt utilities using dialoguer

use crate::config::{is_label_valid, LabelValidity};
use crate::utils::error::{BootSetupError, Result};
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};

fn io_error(e: dialoguer::Error) -> BootSetupError {
    BootSetupError::Io(std::io::Error::other(e.to_string()))
}

/// Prompt for yes/no confirmation
pub fn prompt_confirm(prompt: &str, default: bool) -> Result<bool> {
    let theme = ColorfulTheme::default();
    Confirm::with_theme(&theme)
        .with_prompt(prompt)
        .default(default)
        .interact_opt()
        .map_err(io_error)?
        .ok_or(BootSetupError::UserCancelled)
}

/// Prompt for selection from a list
pub fn prompt_select<T: ToString>(prompt: &str, items: &[T], default: usize) -> Result<usize> {
    let theme = ColorfulTheme::default();
    Select::with_theme(&theme)
        .with_prompt(prompt)
        .items(items)
        .default(default)
        .interact_opt()
        .map_err(io_error)?
        .ok_or(BootSetupError::UserCancelled)
}

/// Prompt for a boot menu label. The prompt re-asks until the label is
/// accepted by LiLo.
pub fn prompt_label(prompt: &str, current: &str) -> Result<String> {
    let theme = ColorfulTheme::default();
    Input::<String>::with_theme(&theme)
        .with_prompt(prompt)
        .with_initial_text(current)
        .validate_with(|input: &String| -> std::result::Result<(), String> {
            match is_label_valid(input) {
                LabelValidity::Ok => Ok(()),
                invalid => Err(invalid.to_string()),
            }
        })
        .interact_text()
        .map_err(|_| BootSetupError::UserCancelled)
}

/// Display a warning and ask for confirmation
pub fn warn_confirm(warning: &str) -> Result<bool> {
    println!("\n⚠️  WARNING: {}\n", warning);
    prompt_confirm("Continue?", false)
}
