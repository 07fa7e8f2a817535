pub mod browser;
pub mod endpoints;
pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_LOGIN_TIMEOUT: &str = "login-timeout-seconds";

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

    let command = Command::new("magang")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("3000")
                .env("MAGANG_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_LOGIN_TIMEOUT)
                .long(ARG_LOGIN_TIMEOUT)
                .help("Upper bound for a whole /api/login request, in seconds")
                .default_value("120")
                .env("MAGANG_LOGIN_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        );

    let command = endpoints::with_args(command);
    let command = browser::with_args(command);
    logging::with_args(command)
}
