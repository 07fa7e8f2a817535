//! Seam between the browser bridge and a concrete rendering engine.
//!
//! The bridge only talks to [`Engine`]/[`EngineSession`]; `auth::chromium`
//! provides the real implementation over CDP.

use crate::auth::jar::{CookieExpiry, JarCookie, SameSite};
use std::{future::Future, pin::Pin};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("browser protocol error: {0}")]
    Protocol(String),
}

/// Sub-resources that never matter for minting the portal token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Stylesheet,
    Font,
    Media,
}

pub const BLOCKED_RESOURCES: [ResourceKind; 4] = [
    ResourceKind::Image,
    ResourceKind::Stylesheet,
    ResourceKind::Font,
    ResourceKind::Media,
];

/// Cookie in the engine's native shape (mirrors CDP `Network.CookieParam`).
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    /// Epoch seconds; `None` keeps the cookie alive for the browser session.
    pub expires: Option<f64>,
}

/// Cookie as read back from a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCookie {
    pub name: String,
    pub value: String,
}

/// Translate a jar cookie into the engine's cookie format.
///
/// `SameSite` defaults to `Lax` and a non-expiring cookie gets no expiry.
#[must_use]
pub fn to_browser_cookie(cookie: &JarCookie) -> BrowserCookie {
    let expires = match cookie.expires {
        CookieExpiry::Infinity => None,
        #[allow(clippy::cast_precision_loss)]
        CookieExpiry::At(at) => Some(at.timestamp_millis() as f64 / 1000.0),
    };

    BrowserCookie {
        name: cookie.name.clone(),
        value: cookie.value.clone(),
        domain: cookie.domain.clone(),
        path: cookie.path.clone(),
        secure: cookie.secure,
        http_only: cookie.http_only,
        same_site: cookie.same_site.unwrap_or(SameSite::Lax),
        expires,
    }
}

/// Launches one isolated browser instance per call.
pub trait Engine: Send + Sync {
    fn launch(&self) -> BoxFuture<'_, Result<Box<dyn EngineSession>, EngineError>>;
}

/// A running browser with a single page.
pub trait EngineSession: Send {
    /// Abort every request of the given resource kinds.
    fn block_resources<'a>(
        &'a mut self,
        kinds: &'a [ResourceKind],
    ) -> BoxFuture<'a, Result<(), EngineError>>;

    fn set_user_agent<'a>(&'a mut self, user_agent: &'a str)
        -> BoxFuture<'a, Result<(), EngineError>>;

    fn set_cookies(&mut self, cookies: Vec<BrowserCookie>) -> BoxFuture<'_, Result<(), EngineError>>;

    /// Navigate and resolve once network activity has settled.
    fn goto<'a>(&'a mut self, url: &'a Url) -> BoxFuture<'a, Result<(), EngineError>>;

    /// Click the first match of `selector` and wait for the navigation to settle.
    /// `Ok(false)` when nothing matches.
    fn click_and_settle<'a>(&'a mut self, selector: &'a str)
        -> BoxFuture<'a, Result<bool, EngineError>>;

    fn cookies(&mut self) -> BoxFuture<'_, Result<Vec<PageCookie>, EngineError>>;

    /// Terminate the browser process.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), EngineError>>;
}

/// Owns a running session and makes sure the browser process goes away.
///
/// Call [`SessionGuard::close`] on every path you control; if the guard is
/// dropped instead (cancelled request, panic) the close runs on the runtime.
pub struct SessionGuard {
    session: Option<Box<dyn EngineSession>>,
}

impl SessionGuard {
    #[must_use]
    pub fn new(session: Box<dyn EngineSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn session(&mut self) -> Option<&mut (dyn EngineSession + 'static)> {
        self.session.as_deref_mut()
    }

    /// # Errors
    /// Returns the engine error if the browser did not shut down cleanly.
    pub async fn close(mut self) -> Result<(), EngineError> {
        match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }
}

/// Tear down a session that failed before it was handed out, keeping the original error.
pub(crate) async fn discard(
    session: Box<dyn EngineSession>,
    cause: EngineError,
) -> EngineError {
    if let Err(err) = session.close().await {
        debug!("Closing browser after failed setup: {err}");
    }
    cause
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        warn!("browser session abandoned, terminating it in the background");

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(err) = session.close().await {
                    warn!("Failed to close abandoned browser session: {err}");
                }
            });
        }
    }
}
