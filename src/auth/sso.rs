//! Credential exchange against the Kemnaker SSO.
//!
//! Pure HTTP: scrape the CSRF token, POST the form, then walk the redirect
//! chain by hand until the URL carrying `access_token`/`refresh_token` shows up.

use crate::auth::{
    error::{mask, AuthError, Stage},
    jar::SessionJar,
    AuthConfig,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION, LOCATION},
    redirect::Policy,
    Client, Response,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::borrow::Cow;
use tracing::{debug, info, instrument};
use url::Url;

/// Hard stop for the manual redirect walk.
pub const MAX_REDIRECT_HOPS: usize = 10;

const CSRF_PATTERN: &str = r#"name="csrf-token" content="([^"]+)""#;
const ACCESS_TOKEN_PATTERN: &str = r"access_token=([^&]+)";
const REFRESH_TOKEN_PATTERN: &str = r"refresh_token=([^&]+)";
const CSRF_HEADER: &str = "X-CSRF-TOKEN";

/// Username/password for one login call; dropped as soon as the exchange ends.
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Token pair minted by the SSO for `maganghub.kemnaker.go.id`.
#[derive(Clone, PartialEq, Eq)]
pub struct SsoTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub obtained_at: DateTime<Utc>,
}

impl std::fmt::Debug for SsoTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsoTokens")
            .field("access_token", &mask(&self.access_token))
            .field("refresh_token", &mask(&self.refresh_token))
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// Everything the SSO leg produces; the jar is what the browser leg replays.
#[derive(Debug)]
pub struct SsoSession {
    pub tokens: SsoTokens,
    pub jar: SessionJar,
    pub cookie_string: String,
}

#[derive(Debug, Clone)]
pub struct CredentialExchanger {
    config: AuthConfig,
}

impl CredentialExchanger {
    #[must_use]
    pub const fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Log in with username/password and collect the SSO token pair.
    ///
    /// # Errors
    /// `CSRF_NOT_FOUND`, `NO_REDIRECT`, `TOKEN_NOT_FOUND`, or `SSO_UNREACHABLE`
    /// when a request cannot be completed.
    #[instrument(skip_all, fields(username = %credentials.username))]
    pub async fn exchange(&self, credentials: &Credentials) -> Result<SsoSession, AuthError> {
        // Fresh jar per attempt, never shared between logins.
        let jar = SessionJar::new();
        let browsing = self.client(&jar, Policy::limited(MAX_REDIRECT_HOPS))?;
        let manual = self.client(&jar, Policy::none())?;

        info!("Fetching SSO login page");
        let csrf = self.fetch_csrf(&browsing).await?;

        info!("Submitting credentials");
        let first_hop = self.submit_credentials(&manual, credentials, &csrf).await?;

        info!("Following redirect chain");
        let final_url = follow_redirects(&manual, first_hop).await?;

        let tokens = parse_tokens(final_url.as_str())?;
        let cookie_string = jar.cookie_string(&self.config.portal_session_url);

        info!(
            access_token = %mask(&tokens.access_token),
            cookies = cookie_string.split("; ").filter(|pair| !pair.is_empty()).count(),
            "SSO login succeeded"
        );

        Ok(SsoSession {
            tokens,
            jar,
            cookie_string,
        })
    }

    fn client(&self, jar: &SessionJar, redirect: Policy) -> Result<Client, AuthError> {
        Client::builder()
            .user_agent(&self.config.user_agent)
            .default_headers(chrome_headers())
            .cookie_provider(jar.provider())
            .redirect(redirect)
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|err| AuthError::sso_unreachable("building HTTP client", &err))
    }

    async fn fetch_csrf(&self, client: &Client) -> Result<String, AuthError> {
        let response = client
            .get(self.config.sso_authorize_url.clone())
            .send()
            .await
            .map_err(|err| AuthError::sso_unreachable("fetching SSO page", &err))?;

        let html = response
            .text()
            .await
            .map_err(|err| AuthError::sso_unreachable("reading SSO page", &err))?;

        extract_csrf(&html).ok_or_else(AuthError::csrf_not_found)
    }

    async fn submit_credentials(
        &self,
        client: &Client,
        credentials: &Credentials,
        csrf: &str,
    ) -> Result<Url, AuthError> {
        let form = [
            ("username", credentials.username.as_str()),
            ("password", credentials.password.expose_secret()),
        ];

        let response = client
            .post(self.config.sso_login_url.clone())
            .header(CSRF_HEADER, csrf)
            .form(&form)
            .send()
            .await
            .map_err(|err| AuthError::sso_unreachable("submitting credentials", &err))?;

        let status = response.status();
        let location = header_location(&response);
        // A body we cannot read is treated like an empty one; the Location header may still carry the redirect.
        let body = response.text().await.unwrap_or_default();

        debug!(%status, has_location = location.is_some(), "credential POST answered");

        let target = redirect_target(&body, location.as_deref()).ok_or_else(AuthError::no_redirect)?;

        self.config
            .sso_login_url
            .join(&target)
            .map_err(|_| AuthError::no_redirect())
    }
}

/// Walk `Location` headers by hand, at most [`MAX_REDIRECT_HOPS`] times.
///
/// A chain that is still redirecting after the last hop is not an error: the
/// URL reached so far is returned and token parsing decides what happens next.
///
/// # Errors
/// `SSO_UNREACHABLE` if a hop cannot be fetched.
pub async fn follow_redirects(client: &Client, start: Url) -> Result<Url, AuthError> {
    let mut current = start;

    for hop in 0..MAX_REDIRECT_HOPS {
        let response = client
            .get(current.clone())
            .send()
            .await
            .map_err(|err| AuthError::sso_unreachable("following redirect", &err))?;

        let next = header_location(&response).and_then(|location| current.join(&location).ok());

        let Some(next) = next else {
            debug!(hops = hop, "redirect chain ended");
            return Ok(current);
        };

        current = next;
    }

    debug!(hops = MAX_REDIRECT_HOPS, "redirect chain truncated");

    Ok(current)
}

fn header_location(response: &Response) -> Option<String> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn chrome_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
        ),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("id-ID,id;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers
}

fn capture(pattern: &str, haystack: &str) -> Option<String> {
    Regex::new(pattern)
        .ok()?
        .captures(haystack)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

/// Pull the CSRF token out of the SSO login page.
#[must_use]
pub fn extract_csrf(html: &str) -> Option<String> {
    capture(CSRF_PATTERN, html)
}

/// `data.redirect_uri` from a JSON body wins over the `Location` header.
#[must_use]
pub fn redirect_target(body: &str, location: Option<&str>) -> Option<String> {
    let from_body = serde_json::from_str::<Value>(body).ok().and_then(|json| {
        json.get("data")
            .and_then(|data| data.get("redirect_uri"))
            .and_then(Value::as_str)
            .filter(|uri| !uri.is_empty())
            .map(str::to_string)
    });

    from_body.or_else(|| {
        location
            .filter(|location| !location.is_empty())
            .map(str::to_string)
    })
}

/// Extract and percent-decode both tokens from the terminal redirect URL.
///
/// # Errors
/// `TOKEN_NOT_FOUND` when either token is absent or does not decode to UTF-8.
pub fn parse_tokens(final_url: &str) -> Result<SsoTokens, AuthError> {
    let decode = |raw: String| urlencoding::decode(&raw).ok().map(Cow::into_owned);

    let access_token = capture(ACCESS_TOKEN_PATTERN, final_url).and_then(decode);
    let refresh_token = capture(REFRESH_TOKEN_PATTERN, final_url).and_then(decode);

    match (access_token, refresh_token) {
        (Some(access_token), Some(refresh_token)) => Ok(SsoTokens {
            access_token,
            refresh_token,
            obtained_at: Utc::now(),
        }),
        _ => Err(AuthError::new(
            Stage::TokenNotFound,
            "Token not found in final SSO URL, check credentials",
        )),
    }
}
