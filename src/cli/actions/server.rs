use crate::{
    APP_USER_AGENT,
    cli::{
        commands::{
            oidc,
            step_ca::{self, CaTrust},
        },
        telemetry,
    },
    enroll::{
        self, EnrollState,
        archive::Encryption,
        oidc::OidcProvider,
        session::MemorySessionStore,
        step_ca::{StepCaClient, build_client},
    },
};
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub bind_addr: SocketAddr,
    pub session_ttl: Duration,
    pub upstream_timeout: Duration,
    pub oidc: oidc::Options,
    pub step_ca: step_ca::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if discovery fails, the CA client can't be built, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let idp_client = reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .timeout(args.upstream_timeout)
        .build()
        .context("failed to build identity provider client")?;
    let provider = OidcProvider::discover(idp_client, &args.oidc)
        .await
        .context("OIDC discovery failed")?;

    let ca_client = build_client(&args.step_ca.trust, args.upstream_timeout)?;
    let authority = StepCaClient::new(ca_client, &args.step_ca.url)?;

    let sessions = Arc::new(MemorySessionStore::new(args.session_ttl));
    let sweeper = sessions.spawn_sweeper(sweep_interval(args.session_ttl));

    let state = Arc::new(
        EnrollState::new(
            sessions,
            Arc::new(provider),
            Arc::new(authority),
            args.step_ca.p12_password,
        )
        .with_p12_encryption(args.step_ca.p12_encryption),
    );

    let result = enroll::serve(args.bind_addr, state).await;

    sweeper.abort();
    telemetry::shutdown_tracer();

    result
}

// Sweep at most every minute, more often for short TTLs.
fn sweep_interval(ttl: Duration) -> Duration {
    ttl.min(Duration::from_secs(60))
}

fn log_startup_args(args: &Args) {
    let trust = match &args.step_ca.trust {
        CaTrust::System => "system".to_string(),
        CaTrust::Bundle(path) => format!("bundle:{}", path.display()),
        CaTrust::Insecure => "INSECURE".to_string(),
    };
    let entries = [
        ("listen", args.bind_addr.to_string()),
        ("kanidm_url", redact_url(&args.oidc.kanidm_url)),
        ("client_id", args.oidc.client_id.clone()),
        (
            "client_secret_set",
            (!args.oidc.client_secret.expose_secret().is_empty()).to_string(),
        ),
        ("redirect_url", redact_url(&args.oidc.redirect_url)),
        ("step_ca_url", redact_url(&args.step_ca.url)),
        ("step_ca_trust", trust),
        (
            "p12_password_set",
            (!args.step_ca.p12_password.expose_secret().is_empty()).to_string(),
        ),
        (
            "p12_encryption",
            match args.step_ca.p12_encryption {
                Encryption::Modern => "pbes2-aes256".to_string(),
                Encryption::Legacy => "pbe-sha1-3des".to_string(),
            },
        ),
        ("session_ttl", format!("{}s", args.session_ttl.as_secs())),
        (
            "upstream_timeout",
            format!("{}s", args.upstream_timeout.as_secs()),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_url(url: &Url) -> String {
    let mut url = url.clone();
    if url.password().is_some() {
        let _ = url.set_password(Some("REDACTED"));
    }
    url.to_string()
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn banner() -> String {
    format!(
        "step-ca-enroll - {} - {}",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}
