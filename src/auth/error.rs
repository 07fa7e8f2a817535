//! Failure taxonomy shared by every login stage.

use serde::Serialize;
use thiserror::Error;

/// Where a login attempt stopped.
///
/// The wire code (`as_str`) is what callers switch on, so it must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Login page did not carry a `csrf-token` meta tag.
    CsrfNotFound,
    /// Credential POST answered without any redirect target.
    NoRedirect,
    /// Redirect chain or portal finished without the expected token.
    TokenNotFound,
    /// Portal login page never settled.
    NavigationTimeout,
    /// Portal never set the `accessToken` cookie.
    TokenWaitTimeout,
    /// Rendering engine failed underneath us.
    SessionBridgeFailed,
    /// Transport failure while talking to the SSO provider.
    SsoUnreachable,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CsrfNotFound => "CSRF_NOT_FOUND",
            Self::NoRedirect => "NO_REDIRECT",
            Self::TokenNotFound => "TOKEN_NOT_FOUND",
            Self::NavigationTimeout => "NAVIGATION_TIMEOUT",
            Self::TokenWaitTimeout => "TOKEN_WAIT_TIMEOUT",
            Self::SessionBridgeFailed => "SESSION_BRIDGE_FAILED",
            Self::SsoUnreachable => "SSO_UNREACHABLE",
        }
    }

    /// Timeouts and infrastructure failures are worth retrying as a whole login.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::NavigationTimeout
                | Self::TokenWaitTimeout
                | Self::SessionBridgeFailed
                | Self::SsoUnreachable
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed login. `message` never carries the password or a full token.
#[derive(Debug, Clone, Error)]
#[error("{stage}: {message}")]
pub struct AuthError {
    pub stage: Stage,
    pub message: String,
}

impl AuthError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn csrf_not_found() -> Self {
        Self::new(Stage::CsrfNotFound, "Failed to read CSRF token from SSO page")
    }

    #[must_use]
    pub fn no_redirect() -> Self {
        Self::new(
            Stage::NoRedirect,
            "Login failed, SSO returned no redirect (check username and password)",
        )
    }

    /// Wrap a transport error from one of the SSO requests.
    #[must_use]
    pub fn sso_unreachable(step: &str, err: &reqwest::Error) -> Self {
        Self::new(
            Stage::SsoUnreachable,
            format!("{step}: {}", transport_summary(err)),
        )
    }

    #[must_use]
    pub fn bridge_failed(err: impl std::fmt::Display) -> Self {
        Self::new(
            Stage::SessionBridgeFailed,
            format!("Monev session failed: {err}"),
        )
    }
}

// reqwest includes the URL in its Display; redirect URLs carry tokens, so only the kind is kept.
fn transport_summary(err: &reqwest::Error) -> String {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else if err.is_redirect() {
        "redirect error"
    } else if err.is_body() || err.is_decode() {
        "invalid response body"
    } else {
        "request failed"
    };
    match err.status() {
        Some(status) => format!("{kind} ({status})"),
        None => kind.to_string(),
    }
}

/// Shorten a secret for log output: first 6 + `...` + last 6 characters.
#[must_use]
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return "***".to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{head}...{tail}")
}
