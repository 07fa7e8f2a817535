//! Dual-token login: SSO credentials in, SSO token pair plus Monev token out.

pub mod bridge;
pub mod chromium;
pub mod engine;
pub mod error;
pub mod jar;
pub mod sso;

pub use self::{
    bridge::{BrowserBridge, PortalToken},
    error::{AuthError, Stage},
    jar::SessionJar,
    sso::{CredentialExchanger, Credentials, SsoSession, SsoTokens},
};

use self::engine::Engine;
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tracing::{info, instrument};
use url::Url;

pub const SSO_AUTHORIZE_URL: &str = "https://account.kemnaker.go.id/auth?response_type=code&scopes=basic+profile&client=b6c5a166-5cc4-4c72-a521-715075b811af&state=auto&continue=https%253A%252F%252Fmaganghub.kemnaker.go.id%252Fbe%252Fv1%253Faction%253Dauth";
pub const SSO_LOGIN_URL: &str = "https://account.kemnaker.go.id/auth/login";
pub const PORTAL_SESSION_URL: &str = "https://maganghub.kemnaker.go.id";
pub const MONEV_LOGIN_URL: &str = "https://monev.maganghub.kemnaker.go.id/login";

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Endpoints and bounded waits for one deployment.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub sso_authorize_url: Url,
    pub sso_login_url: Url,
    /// Domain whose cookies make up `magangCookie`.
    pub portal_session_url: Url,
    pub monev_login_url: Url,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub navigation_timeout: Duration,
    /// Bound on the login-button click and the navigation it triggers.
    pub click_settle_timeout: Duration,
    pub token_wait_timeout: Duration,
    pub token_poll_interval: Duration,
}

impl AuthConfig {
    /// # Errors
    /// Fails when one of the URLs does not parse.
    pub fn new(
        sso_authorize_url: &str,
        sso_login_url: &str,
        portal_session_url: &str,
        monev_login_url: &str,
    ) -> Result<Self> {
        let parse = |name: &str, raw: &str| {
            Url::parse(raw).with_context(|| format!("invalid {name}: {raw}"))
        };

        Ok(Self {
            sso_authorize_url: parse("SSO authorize URL", sso_authorize_url)?,
            sso_login_url: parse("SSO login URL", sso_login_url)?,
            portal_session_url: parse("portal session URL", portal_session_url)?,
            monev_login_url: parse("Monev login URL", monev_login_url)?,
            user_agent: USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(60),
            click_settle_timeout: Duration::from_secs(20),
            token_wait_timeout: Duration::from_secs(40),
            token_poll_interval: Duration::from_millis(250),
        })
    }

    /// Production MagangHub endpoints.
    ///
    /// # Errors
    /// Never in practice; the constants are valid URLs.
    pub fn maganghub() -> Result<Self> {
        Self::new(
            SSO_AUTHORIZE_URL,
            SSO_LOGIN_URL,
            PORTAL_SESSION_URL,
            MONEV_LOGIN_URL,
        )
    }

    /// Origin of the identity provider; the jar cookies for it get replayed in the browser.
    #[must_use]
    pub fn provider_origin(&self) -> Url {
        let mut origin = self.sso_login_url.clone();
        origin.set_path("/");
        origin.set_query(None);
        origin.set_fragment(None);
        origin
    }

    /// CSS selector of the Monev button that starts the SSO round trip.
    #[must_use]
    pub fn login_trigger_selector(&self) -> String {
        format!(
            r#"a[href*="{}"]"#,
            self.sso_login_url.host_str().unwrap_or_default()
        )
    }
}

/// Both token families of a successful login.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub sso_tokens: SsoTokens,
    pub monev_access_token: String,
    /// Portal-domain cookies, `name=value; name=value`.
    pub cookie_string: String,
}

/// Runs the credential exchange and then the browser bridge.
pub struct Authenticator {
    exchanger: CredentialExchanger,
    bridge: BrowserBridge,
}

impl Authenticator {
    #[must_use]
    pub fn new(config: AuthConfig, engine: Arc<dyn Engine>) -> Self {
        Self {
            exchanger: CredentialExchanger::new(config.clone()),
            bridge: BrowserBridge::new(config, engine),
        }
    }

    /// Full login. Stops at the first failing stage.
    ///
    /// # Errors
    /// The [`AuthError`] of the stage that failed.
    #[instrument(skip_all, fields(username = %credentials.username))]
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthResult, AuthError> {
        let sso = self.exchanger.exchange(credentials).await?;

        info!("Bridging SSO session into Monev");
        let portal = self.bridge.bridge_session(&sso.jar).await?;

        Ok(AuthResult {
            sso_tokens: sso.tokens,
            monev_access_token: portal.access_token,
            cookie_string: sso.cookie_string,
        })
    }
}

#[cfg(test)]
pub(crate) mod fake;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::fake::{FakeEngine, Script};
    use anyhow::Result;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[test]
    fn production_config_parses() -> Result<()> {
        let config = AuthConfig::maganghub()?;
        assert_eq!(config.provider_origin().as_str(), "https://account.kemnaker.go.id/");
        assert_eq!(
            config.login_trigger_selector(),
            r#"a[href*="account.kemnaker.go.id"]"#
        );
        assert_eq!(config.navigation_timeout, Duration::from_secs(60));
        assert!(
            config.navigation_timeout + config.click_settle_timeout + config.token_wait_timeout
                <= Duration::from_secs(120)
        );
        assert_eq!(config.token_wait_timeout, Duration::from_secs(40));
        Ok(())
    }

    #[test]
    fn bad_url_is_rejected() {
        assert!(AuthConfig::new("not a url", SSO_LOGIN_URL, PORTAL_SESSION_URL, MONEV_LOGIN_URL).is_err());
    }

    #[tokio::test]
    async fn sso_failure_never_launches_browser() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let base = server.uri();
        let config = AuthConfig::new(
            &format!("{base}/auth"),
            &format!("{base}/auth/login"),
            &base,
            &format!("{base}/monev/login"),
        )?;
        let engine = FakeEngine::new(Script::default());
        let authenticator = Authenticator::new(config, Arc::new(engine.clone()));

        let err = authenticator
            .login(&Credentials::new("intern", "secret"))
            .await
            .err();

        assert_eq!(err.map(|e| e.stage), Some(Stage::CsrfNotFound));
        assert_eq!(engine.launches(), 0);
        Ok(())
    }
}
