//! Passphrase acquisition
//!
//! The passphrase comes from an environment variable or an interactive
//! hidden prompt. It is never accepted as a command-line value, since
//! arguments are visible to other users through the process table.

use clap::Args;

use crate::crypto::Passphrase;
use crate::error::{SnapvaultError, SnapvaultResult};

/// Default environment variable holding the passphrase
pub const DEFAULT_PASSPHRASE_ENV: &str = "SNAPVAULT_PASSPHRASE";

/// Where to read the passphrase from
#[derive(Args, Debug, Clone)]
pub struct PassphraseArgs {
    /// Environment variable holding the passphrase
    #[arg(long, value_name = "VAR", default_value = DEFAULT_PASSPHRASE_ENV)]
    pub passphrase_env: String,

    /// Prompt for the passphrase instead of reading the environment
    #[arg(long)]
    pub prompt: bool,
}

impl PassphraseArgs {
    /// Read the passphrase, asking twice when `confirm` is set and prompting
    pub fn resolve(&self, confirm: bool) -> SnapvaultResult<Passphrase> {
        let passphrase = if self.prompt {
            prompt_passphrase(confirm)?
        } else {
            let value = std::env::var(&self.passphrase_env).map_err(|_| {
                SnapvaultError::Config(format!(
                    "Passphrase variable {} is not set (or use --prompt)",
                    self.passphrase_env
                ))
            })?;
            Passphrase::new(value)
        };

        if passphrase.is_empty() {
            return Err(SnapvaultError::Config("Passphrase must not be empty".into()));
        }
        Ok(passphrase)
    }
}

fn prompt_passphrase(confirm: bool) -> SnapvaultResult<Passphrase> {
    let first = read_hidden("Passphrase: ")?;
    if confirm {
        let second = read_hidden("Confirm passphrase: ")?;
        if first.as_str() != second.as_str() {
            return Err(SnapvaultError::Config("Passphrases do not match".into()));
        }
    }
    Ok(first)
}

/// Prompt for a passphrase (hidden input)
fn read_hidden(prompt: &str) -> SnapvaultResult<Passphrase> {
    rpassword::prompt_password(prompt)
        .map(Passphrase::new)
        .map_err(|e| SnapvaultError::Config(format!("Failed to read passphrase: {}", e)))
}
