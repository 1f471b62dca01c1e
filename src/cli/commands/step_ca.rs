use crate::enroll::archive::Encryption;
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use std::path::PathBuf;
use url::Url;

pub const ARG_STEP_CA_URL: &str = "step-ca-url";
pub const ARG_STEP_CA_ROOT: &str = "step-ca-root";
pub const ARG_STEP_CA_INSECURE: &str = "step-ca-insecure";
pub const ARG_P12_PASSWORD: &str = "p12-password";
pub const ARG_P12_LEGACY: &str = "p12-legacy";

/// How the CA's server certificate is validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaTrust {
    /// System roots only.
    System,
    /// System roots plus the PEM bundle at this path.
    Bundle(PathBuf),
    /// No validation at all. Only for a CA confined to a private network.
    Insecure,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub url: Url,
    pub trust: CaTrust,
    pub p12_password: SecretString,
    pub p12_encryption: Encryption,
}

impl Options {
    /// Parse step-ca and archive arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the CA URL is missing or malformed.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let url = matches
            .get_one::<String>(ARG_STEP_CA_URL)
            .filter(|v| !v.trim().is_empty())
            .context("missing required argument: --step-ca-url")?;
        let url = Url::parse(url).context("invalid STEP_CA_URL")?;

        let trust = if matches.get_flag(ARG_STEP_CA_INSECURE) {
            CaTrust::Insecure
        } else if let Some(path) = matches.get_one::<String>(ARG_STEP_CA_ROOT) {
            CaTrust::Bundle(PathBuf::from(path))
        } else {
            CaTrust::System
        };

        let p12_password = matches
            .get_one::<String>(ARG_P12_PASSWORD)
            .cloned()
            .unwrap_or_default();

        let p12_encryption = if matches.get_flag(ARG_P12_LEGACY) {
            Encryption::Legacy
        } else {
            Encryption::Modern
        };

        Ok(Self {
            url,
            trust,
            p12_password: SecretString::from(p12_password),
            p12_encryption,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_STEP_CA_URL)
                .long(ARG_STEP_CA_URL)
                .help("step-ca base URL, example: https://ca.internal:9000")
                .env("STEP_CA_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_STEP_CA_ROOT)
                .long(ARG_STEP_CA_ROOT)
                .help("PEM bundle trusted when connecting to step-ca (e.g. the step-ca root)")
                .env("STEP_CA_ROOT")
                .conflicts_with(ARG_STEP_CA_INSECURE),
        )
        .arg(
            Arg::new(ARG_STEP_CA_INSECURE)
                .long(ARG_STEP_CA_INSECURE)
                .help("Skip step-ca server certificate validation (private networks only)")
                .env("STEP_CA_INSECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_P12_PASSWORD)
                .long(ARG_P12_PASSWORD)
                .help("Password protecting the issued PKCS#12 archive (default: empty)")
                .env("P12_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_P12_LEGACY)
                .long(ARG_P12_LEGACY)
                .help("Encrypt archives with PBE-SHA1-3DES and a SHA-1 MAC for older key stores")
                .env("P12_LEGACY")
                .action(ArgAction::SetTrue),
        )
}
