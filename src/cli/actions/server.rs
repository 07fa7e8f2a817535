use crate::{
    api,
    auth::{
        chromium::{ChromiumEngine, ChromiumSettings},
        AuthConfig, Authenticator,
    },
    cli::telemetry,
};
use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub login_timeout: Duration,
    pub auth: AuthConfig,
    pub chromium: ChromiumSettings,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let engine = Arc::new(ChromiumEngine::new(args.chromium));
    let authenticator = Arc::new(Authenticator::new(args.auth, engine));

    let served = api::new(args.port, authenticator, args.login_timeout).await;

    telemetry::shutdown_tracer();

    served
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("login_timeout", format!("{}s", args.login_timeout.as_secs())),
        ("sso_authorize_url", origin(&args.auth.sso_authorize_url)),
        ("sso_login_url", args.auth.sso_login_url.to_string()),
        ("portal_session_url", args.auth.portal_session_url.to_string()),
        ("monev_login_url", args.auth.monev_login_url.to_string()),
        (
            "chrome_executable",
            args.chromium
                .executable
                .as_ref()
                .map_or_else(|| "auto".to_string(), |path| path.display().to_string()),
        ),
        ("browser_sandbox", (!args.chromium.no_sandbox).to_string()),
    ];
    log_entries("Startup configuration", &entries);
}

// The authorize URL carries a long query string; the origin is enough to tell deployments apart.
fn origin(url: &url::Url) -> String {
    url.origin().ascii_serialization()
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", magang_banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn magang_banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    MAGANG_BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
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

const MAGANG_BANNER: &str = r"
  +-----+      +-----+
  | SSO | ---> | MON |
  +-----+      +-----+
  M A G A N G {VERSION}";
