use crate::auth::{MONEV_LOGIN_URL, PORTAL_SESSION_URL, SSO_AUTHORIZE_URL, SSO_LOGIN_URL};
use clap::{builder::ValueParser, Arg, Command};
use url::Url;

pub const ARG_SSO_AUTHORIZE_URL: &str = "sso-authorize-url";
pub const ARG_SSO_LOGIN_URL: &str = "sso-login-url";
pub const ARG_PORTAL_SESSION_URL: &str = "portal-session-url";
pub const ARG_MONEV_LOGIN_URL: &str = "monev-login-url";

#[must_use]
pub fn validator_url() -> ValueParser {
    ValueParser::from(move |value: &str| -> std::result::Result<String, String> {
        match Url::parse(value) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(value.to_string()),
            Ok(url) => Err(format!("unsupported scheme: {}", url.scheme())),
            Err(err) => Err(err.to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SSO_AUTHORIZE_URL)
                .long(ARG_SSO_AUTHORIZE_URL)
                .help("SSO authorization URL that renders the login form")
                .default_value(SSO_AUTHORIZE_URL)
                .hide_default_value(true)
                .env("MAGANG_SSO_AUTHORIZE_URL")
                .value_parser(validator_url()),
        )
        .arg(
            Arg::new(ARG_SSO_LOGIN_URL)
                .long(ARG_SSO_LOGIN_URL)
                .help("SSO endpoint receiving the credential POST")
                .default_value(SSO_LOGIN_URL)
                .env("MAGANG_SSO_LOGIN_URL")
                .value_parser(validator_url()),
        )
        .arg(
            Arg::new(ARG_PORTAL_SESSION_URL)
                .long(ARG_PORTAL_SESSION_URL)
                .help("MagangHub origin whose cookies are returned as magangCookie")
                .default_value(PORTAL_SESSION_URL)
                .env("MAGANG_PORTAL_SESSION_URL")
                .value_parser(validator_url()),
        )
        .arg(
            Arg::new(ARG_MONEV_LOGIN_URL)
                .long(ARG_MONEV_LOGIN_URL)
                .help("Monev login page opened in the headless browser")
                .default_value(MONEV_LOGIN_URL)
                .env("MAGANG_MONEV_LOGIN_URL")
                .value_parser(validator_url()),
        )
}
