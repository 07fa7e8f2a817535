use clap::{builder::BoolishValueParser, Arg, ArgAction, Command};
use std::path::PathBuf;

pub const ARG_CHROME_EXECUTABLE: &str = "chrome-executable";
pub const ARG_BROWSER_NO_SANDBOX: &str = "browser-no-sandbox";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CHROME_EXECUTABLE)
                .long(ARG_CHROME_EXECUTABLE)
                .help("Path to the Chrome/Chromium binary (default: auto-detect)")
                .env("MAGANG_CHROME_EXECUTABLE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_BROWSER_NO_SANDBOX)
                .long(ARG_BROWSER_NO_SANDBOX)
                .help("Run Chromium without its sandbox (containers running as root)")
                .env("MAGANG_BROWSER_NO_SANDBOX")
                .action(ArgAction::SetTrue)
                .value_parser(BoolishValueParser::new()),
        )
}
