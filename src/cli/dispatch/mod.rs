use crate::cli::{
    actions::{Action, server::Args},
    commands::{self, oidc, step_ca},
};
use anyhow::{Context, Result};
use std::{net::SocketAddr, time::Duration};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let bind_addr = matches
        .get_one::<SocketAddr>(commands::ARG_BIND_ADDR)
        .copied()
        .context("missing required argument: --bind-addr")?;
    let session_ttl = matches
        .get_one::<u64>(commands::ARG_SESSION_TTL)
        .copied()
        .map(Duration::from_secs)
        .context("missing required argument: --session-ttl")?;
    let upstream_timeout = matches
        .get_one::<u64>(commands::ARG_UPSTREAM_TIMEOUT)
        .copied()
        .map(Duration::from_secs)
        .context("missing required argument: --upstream-timeout")?;

    Ok(Action::Server(Args {
        bind_addr,
        session_ttl,
        upstream_timeout,
        oidc: oidc::Options::parse(matches)?,
        step_ca: step_ca::Options::parse(matches)?,
    }))
}
