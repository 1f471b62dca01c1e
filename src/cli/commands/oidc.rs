use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use url::Url;

pub const ARG_KANIDM_URL: &str = "kanidm-url";
pub const ARG_CLIENT_ID: &str = "client-id";
pub const ARG_CLIENT_SECRET: &str = "client-secret";
pub const ARG_REDIRECT_URL: &str = "redirect-url";

pub const DEFAULT_CLIENT_ID: &str = "step-ca-enroll";

/// OAuth2 client registration at the identity provider.
#[derive(Debug, Clone)]
pub struct Options {
    pub kanidm_url: Url,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_url: Url,
}

impl Options {
    /// Parse identity provider arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing or a URL is malformed.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let read_required = |id: &str| -> Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        let kanidm_url = Url::parse(&read_required(ARG_KANIDM_URL)?)
            .context("invalid KANIDM_URL")?;
        let redirect_url = Url::parse(&read_required(ARG_REDIRECT_URL)?)
            .context("invalid REDIRECT_URL")?;
        let client_id = matches
            .get_one::<String>(ARG_CLIENT_ID)
            .cloned()
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        Ok(Self {
            kanidm_url,
            client_id,
            client_secret: SecretString::from(read_required(ARG_CLIENT_SECRET)?),
            redirect_url,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_KANIDM_URL)
                .long(ARG_KANIDM_URL)
                .help("Identity provider base URL, example: https://idm.example.com")
                .env("KANIDM_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_CLIENT_ID)
                .long(ARG_CLIENT_ID)
                .help("OAuth2 client id registered at the identity provider")
                .default_value(DEFAULT_CLIENT_ID)
                .env("OIDC_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_CLIENT_SECRET)
                .long(ARG_CLIENT_SECRET)
                .help("OAuth2 client secret")
                .env("OIDC_CLIENT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_REDIRECT_URL)
                .long(ARG_REDIRECT_URL)
                .help("Callback URL registered for this client, example: https://enroll.example.com/callback")
                .env("REDIRECT_URL")
                .required(true),
        )
}
