//! Per-login cookie jar shared by the SSO HTTP client and the browser bridge.

use chrono::{DateTime, Utc};
use cookie_store::{CookieDomain, CookieExpiration};
use reqwest_cookie_store::CookieStoreMutex;
use std::sync::{Arc, PoisonError};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "lax" => Some(Self::Lax),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// When a jar cookie stops being valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieExpiry {
    /// Session cookie, lives as long as the jar.
    Infinity,
    At(DateTime<Utc>),
}

/// Owned snapshot of one jar entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JarCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
    pub expires: CookieExpiry,
}

/// Cookie jar scoped to a single login attempt.
///
/// Cloning shares the underlying store; the exchanger writes through its
/// `reqwest` clients and the bridge only takes snapshots.
#[derive(Debug, Clone, Default)]
pub struct SessionJar {
    store: Arc<CookieStoreMutex>,
}

impl SessionJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cookie provider to plug into `reqwest::ClientBuilder::cookie_provider`.
    #[must_use]
    pub fn provider(&self) -> Arc<CookieStoreMutex> {
        Arc::clone(&self.store)
    }

    /// Store a raw `Set-Cookie` value as if `url` had sent it.
    /// Returns `false` when the cookie is rejected (bad syntax, domain mismatch).
    pub fn insert_raw(&self, set_cookie: &str, url: &Url) -> bool {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        store.parse(set_cookie, url).is_ok()
    }

    /// All unexpired cookies a request to `url` would carry.
    #[must_use]
    pub fn cookies_for(&self, url: &Url) -> Vec<JarCookie> {
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        store
            .matches(url)
            .into_iter()
            .map(|cookie| {
                let domain = match &cookie.domain {
                    CookieDomain::HostOnly(host) => host.clone(),
                    CookieDomain::Suffix(suffix) => format!(".{}", suffix.trim_start_matches('.')),
                    CookieDomain::NotPresent | CookieDomain::Empty => {
                        url.host_str().unwrap_or_default().to_string()
                    }
                };
                let expires = match &cookie.expires {
                    CookieExpiration::AtUtc(at) => {
                        DateTime::from_timestamp(at.unix_timestamp(), at.nanosecond())
                            .map_or(CookieExpiry::Infinity, CookieExpiry::At)
                    }
                    CookieExpiration::SessionEnd => CookieExpiry::Infinity,
                };
                JarCookie {
                    name: cookie.name().to_string(),
                    value: cookie.value().to_string(),
                    domain,
                    path: cookie.path().unwrap_or("/").to_string(),
                    secure: cookie.secure().unwrap_or(false),
                    http_only: cookie.http_only().unwrap_or(false),
                    same_site: cookie
                        .same_site()
                        .and_then(|same_site| SameSite::parse(&same_site.to_string())),
                    expires,
                }
            })
            .collect()
    }

    /// `name=value` pairs for `url`, joined the way a `Cookie` header expects.
    #[must_use]
    pub fn cookie_string(&self, url: &Url) -> String {
        self.cookies_for(url)
            .iter()
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn cookie_string_is_scoped_to_domain() -> Result<()> {
        let jar = SessionJar::new();
        let sso = Url::parse("https://account.kemnaker.go.id/auth")?;
        let portal = Url::parse("https://maganghub.kemnaker.go.id/be/v1")?;

        assert!(jar.insert_raw("sso_session=abc; Path=/; HttpOnly", &sso));
        assert!(jar.insert_raw("maganghub_session=xyz; Path=/", &portal));
        assert!(jar.insert_raw("XSRF-TOKEN=t0k; Path=/", &portal));

        let cookie_string = jar.cookie_string(&Url::parse("https://maganghub.kemnaker.go.id")?);
        assert!(cookie_string.contains("maganghub_session=xyz"));
        assert!(cookie_string.contains("XSRF-TOKEN=t0k"));
        assert!(!cookie_string.contains("sso_session"));
        assert_eq!(cookie_string.matches("; ").count(), 1);
        Ok(())
    }

    #[test]
    fn snapshot_keeps_flags() -> Result<()> {
        let jar = SessionJar::new();
        let sso = Url::parse("https://account.kemnaker.go.id/auth")?;
        assert!(jar.insert_raw(
            "sid=1; Domain=kemnaker.go.id; Path=/; Secure; HttpOnly; SameSite=Strict; Max-Age=3600",
            &sso
        ));

        let cookies = jar.cookies_for(&sso);
        assert_eq!(cookies.len(), 1);
        let cookie = &cookies[0];
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "1");
        assert_eq!(cookie.domain, ".kemnaker.go.id");
        assert_eq!(cookie.path, "/");
        assert!(cookie.secure);
        assert!(cookie.http_only);
        assert_eq!(cookie.same_site, Some(SameSite::Strict));
        assert!(matches!(cookie.expires, CookieExpiry::At(at) if at > Utc::now()));
        Ok(())
    }

    #[test]
    fn session_cookie_never_expires() -> Result<()> {
        let jar = SessionJar::new();
        let sso = Url::parse("https://account.kemnaker.go.id/")?;
        assert!(jar.insert_raw("plain=v", &sso));

        let cookies = jar.cookies_for(&sso);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].expires, CookieExpiry::Infinity);
        assert_eq!(cookies[0].same_site, None);
        assert_eq!(cookies[0].domain, "account.kemnaker.go.id");
        Ok(())
    }

    #[test]
    fn clones_share_the_store() -> Result<()> {
        let jar = SessionJar::new();
        let other = jar.clone();
        let url = Url::parse("https://account.kemnaker.go.id/")?;
        assert!(other.insert_raw("shared=yes", &url));
        assert_eq!(jar.cookie_string(&url), "shared=yes");
        Ok(())
    }
}
