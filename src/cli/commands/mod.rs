pub mod logging;
pub mod oidc;
pub mod step_ca;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_BIND_ADDR: &str = "bind-addr";
pub const ARG_SESSION_TTL: &str = "session-ttl";
pub const ARG_UPSTREAM_TIMEOUT: &str = "upstream-timeout";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("step-ca-enroll")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_BIND_ADDR)
                .short('b')
                .long(ARG_BIND_ADDR)
                .help("Address to listen on")
                .default_value("127.0.0.1:3000")
                .env("BIND_ADDR")
                .value_parser(clap::value_parser!(std::net::SocketAddr)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long(ARG_SESSION_TTL)
                .help("Seconds an unfinished enrollment (PKCE session) stays valid")
                .default_value("600")
                .env("SESSION_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_UPSTREAM_TIMEOUT)
                .long(ARG_UPSTREAM_TIMEOUT)
                .help("Seconds to wait for the identity provider or step-ca before giving up")
                .default_value("30")
                .env("UPSTREAM_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        );

    let command = oidc::with_args(command);
    let command = step_ca::with_args(command);
    logging::with_args(command)
}
