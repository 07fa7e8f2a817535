use crate::{
    auth::{chromium::ChromiumSettings, AuthConfig},
    cli::{
        actions::{server::Args, Action},
        commands::{self, browser, endpoints},
    },
};
use anyhow::{Context, Result};
use std::{path::PathBuf, time::Duration};

fn required<'a>(matches: &'a clap::ArgMatches, id: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .with_context(|| format!("missing required argument: --{id}"))
}

/// # Errors
/// Returns an error if an endpoint URL is missing or invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(3000);
    let login_timeout = Duration::from_secs(
        matches
            .get_one::<u64>(commands::ARG_LOGIN_TIMEOUT)
            .copied()
            .unwrap_or(120),
    );

    let auth = AuthConfig::new(
        required(matches, endpoints::ARG_SSO_AUTHORIZE_URL)?,
        required(matches, endpoints::ARG_SSO_LOGIN_URL)?,
        required(matches, endpoints::ARG_PORTAL_SESSION_URL)?,
        required(matches, endpoints::ARG_MONEV_LOGIN_URL)?,
    )?;

    let chromium = ChromiumSettings {
        executable: matches
            .get_one::<PathBuf>(browser::ARG_CHROME_EXECUTABLE)
            .cloned(),
        no_sandbox: matches.get_flag(browser::ARG_BROWSER_NO_SANDBOX),
        ..ChromiumSettings::default()
    };

    Ok(Action::Server(Args {
        port,
        login_timeout,
        auth,
        chromium,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_server_action() -> Result<()> {
        let matches = commands::new().try_get_matches_from(vec![
            "magang",
            "--port",
            "4000",
            "--sso-login-url",
            "https://sso.test/auth/login",
            "--browser-no-sandbox",
        ])?;

        let Action::Server(args) = handler(&matches)?;

        assert_eq!(args.port, 4000);
        assert_eq!(args.auth.sso_login_url.as_str(), "https://sso.test/auth/login");
        assert_eq!(args.auth.login_trigger_selector(), r#"a[href*="sso.test"]"#);
        assert!(args.chromium.no_sandbox);
        Ok(())
    }
}
