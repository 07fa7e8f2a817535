//! Replays the SSO cookie jar in a headless browser so Monev mints its own token.

use crate::auth::{
    engine::{to_browser_cookie, BrowserCookie, Engine, EngineSession, SessionGuard, BLOCKED_RESOURCES},
    error::{mask, AuthError, Stage},
    jar::SessionJar,
    AuthConfig,
};
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

/// Cookie Monev sets once its own login completes.
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";

/// Token minted by the Monev portal.
#[derive(Clone, PartialEq, Eq)]
pub struct PortalToken {
    pub access_token: String,
}

impl std::fmt::Debug for PortalToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalToken")
            .field("access_token", &mask(&self.access_token))
            .finish()
    }
}

pub struct BrowserBridge {
    config: AuthConfig,
    engine: Arc<dyn Engine>,
}

impl BrowserBridge {
    #[must_use]
    pub fn new(config: AuthConfig, engine: Arc<dyn Engine>) -> Self {
        Self { config, engine }
    }

    /// Launch a browser, inject the SSO cookies and wait for Monev's `accessToken`.
    ///
    /// The browser is closed before returning, whatever the outcome.
    ///
    /// # Errors
    /// `NAVIGATION_TIMEOUT`, `TOKEN_WAIT_TIMEOUT`, `TOKEN_NOT_FOUND` or
    /// `SESSION_BRIDGE_FAILED` for engine failures.
    #[instrument(skip_all)]
    pub async fn bridge_session(&self, jar: &SessionJar) -> Result<PortalToken, AuthError> {
        info!("Launching headless browser");
        let session = self
            .engine
            .launch()
            .await
            .map_err(AuthError::bridge_failed)?;

        let mut guard = SessionGuard::new(session);

        let outcome = match guard.session() {
            Some(session) => self.drive(session, jar).await,
            None => Err(AuthError::bridge_failed("browser session already closed")),
        };

        if let Err(err) = guard.close().await {
            warn!("Failed to close browser: {err}");
        }

        outcome
    }

    async fn drive(
        &self,
        session: &mut dyn EngineSession,
        jar: &SessionJar,
    ) -> Result<PortalToken, AuthError> {
        session
            .block_resources(&BLOCKED_RESOURCES)
            .await
            .map_err(AuthError::bridge_failed)?;
        session
            .set_user_agent(&self.config.user_agent)
            .await
            .map_err(AuthError::bridge_failed)?;

        let cookies: Vec<BrowserCookie> = jar
            .cookies_for(&self.config.provider_origin())
            .iter()
            .map(to_browser_cookie)
            .collect();
        debug!(count = cookies.len(), "Injecting SSO cookies");
        session
            .set_cookies(cookies)
            .await
            .map_err(AuthError::bridge_failed)?;

        info!("Opening Monev login page");
        timeout(
            self.config.navigation_timeout,
            session.goto(&self.config.monev_login_url),
        )
        .await
        .map_err(|_| {
            AuthError::new(
                Stage::NavigationTimeout,
                format!(
                    "Monev login page did not settle within {}s",
                    self.config.navigation_timeout.as_secs()
                ),
            )
        })?
        .map_err(AuthError::bridge_failed)?;

        let selector = self.config.login_trigger_selector();
        match timeout(
            self.config.click_settle_timeout,
            session.click_and_settle(&selector),
        )
        .await
        {
            Ok(Ok(true)) => info!("Clicked SSO login button"),
            Ok(Ok(false)) => debug!("No SSO login button, assuming redirect already happened"),
            Ok(Err(err)) => debug!("SSO login button click failed: {err}"),
            Err(_) => debug!("Navigation after SSO login button did not settle"),
        }

        info!("Waiting for {ACCESS_TOKEN_COOKIE} cookie");
        timeout(
            self.config.token_wait_timeout,
            wait_for_cookie(session, ACCESS_TOKEN_COOKIE, self.config.token_poll_interval),
        )
        .await
        .map_err(|_| {
            AuthError::new(
                Stage::TokenWaitTimeout,
                format!(
                    "{ACCESS_TOKEN_COOKIE} cookie did not appear within {}s",
                    self.config.token_wait_timeout.as_secs()
                ),
            )
        })??;

        let access_token = session
            .cookies()
            .await
            .map_err(AuthError::bridge_failed)?
            .into_iter()
            .find(|cookie| cookie.name == ACCESS_TOKEN_COOKIE)
            .map(|cookie| cookie.value)
            .ok_or_else(|| {
                AuthError::new(
                    Stage::TokenNotFound,
                    format!("{ACCESS_TOKEN_COOKIE} cookie not found"),
                )
            })?;

        info!(access_token = %mask(&access_token), "Monev token acquired");

        Ok(PortalToken { access_token })
    }
}

async fn wait_for_cookie(
    session: &mut dyn EngineSession,
    name: &str,
    every: Duration,
) -> Result<(), AuthError> {
    loop {
        let cookies = session.cookies().await.map_err(AuthError::bridge_failed)?;
        if cookies.iter().any(|cookie| cookie.name == name) {
            return Ok(());
        }
        sleep(every).await;
    }
}
