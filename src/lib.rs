//! # Magang (MagangHub dual-token bridge)
//!
//! `magang` is a backend-for-frontend for the MagangHub intern tracker. Its core job
//! is to turn one username/password pair into two unrelated access tokens:
//!
//! 1. **SSO token pair** from `account.kemnaker.go.id`, obtained with a plain HTTP
//!    flow (CSRF scrape, credential POST, manual redirect traversal).
//! 2. **Monev token** from `monev.maganghub.kemnaker.go.id`, which is only minted
//!    client-side, so the SSO session cookies are replayed inside a headless
//!    Chromium and the `accessToken` cookie is read back out.
//!
//! ## Statelessness
//!
//! Nothing is persisted. Each login gets its own cookie jar and its own browser
//! process; the resulting tokens are returned to the caller and forgotten.

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
