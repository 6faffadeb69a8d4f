//! CDN cache-control header profiles.
//!
//! Each profile is a fixed edge-caching policy. [`cdn_headers`] is a pure
//! lookup: the same profile, TTL override and settings always produce the
//! same headers.
//!
//! | Profile   | Browser                         | Edge                     |
//! |-----------|---------------------------------|--------------------------|
//! | `static`  | 1 year, `immutable`             | same                     |
//! | `api`     | `max_age`, stale-while-revalidate | `max_age`              |
//! | `dynamic` | always revalidate               | 60s                      |
//! | `private` | `no-store`                      | never cached             |
//! | `stale`   | `max_age`, stale-while-revalidate, stale-if-error | same   |

use std::fmt;
use std::str::FromStr;

use axum::http::header::{CACHE_CONTROL, EXPIRES, PRAGMA, VARY};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::config::CdnSettings;

/// Edge-specific cache policy (honoured by CDNs, stripped before browsers).
pub static CDN_CACHE_CONTROL: HeaderName = HeaderName::from_static("cdn-cache-control");

/// Surrogate cache policy for Fastly/Akamai-style CDNs.
pub static SURROGATE_CONTROL: HeaderName = HeaderName::from_static("surrogate-control");

/// One year, for fingerprinted assets.
const STATIC_MAX_AGE_SECS: u64 = 31_536_000;

/// Edge lifetime for server-rendered pages.
const DYNAMIC_EDGE_MAX_AGE_SECS: u64 = 60;

/// Named edge-caching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdnProfile {
    /// Fingerprinted assets that never change
    Static,
    /// Short-lived public API responses
    Api,
    /// Server-rendered pages: edge-cached briefly, always revalidated by browsers
    Dynamic,
    /// Per-user data; never stored anywhere
    Private,
    /// Serve stale content while revalidating or when the origin errors
    Stale,
}

impl CdnProfile {
    pub const ALL: [CdnProfile; 5] = [
        CdnProfile::Static,
        CdnProfile::Api,
        CdnProfile::Dynamic,
        CdnProfile::Private,
        CdnProfile::Stale,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            CdnProfile::Static => "static",
            CdnProfile::Api => "api",
            CdnProfile::Dynamic => "dynamic",
            CdnProfile::Private => "private",
            CdnProfile::Stale => "stale",
        }
    }

    /// Whether shared caches may store responses under this profile.
    pub const fn is_shareable(self) -> bool {
        !matches!(self, CdnProfile::Private)
    }
}

impl fmt::Display for CdnProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unknown profile name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown CDN profile '{0}' (expected static, api, dynamic, private or stale)")]
pub struct UnknownCdnProfile(pub String);

impl FromStr for CdnProfile {
    type Err = UnknownCdnProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CdnProfile::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownCdnProfile(s.to_string()))
    }
}

/// Build the header set for a profile.
///
/// `ttl` overrides the profile's lifetime in seconds (ignored by `private`).
/// Edge headers (`CDN-Cache-Control`, `Surrogate-Control`) are added only when
/// the CDN is enabled and the profile is shareable.
pub fn cdn_headers(profile: CdnProfile, ttl: Option<u64>, settings: &CdnSettings) -> HeaderMap {
    let swr = settings.stale_while_revalidate_secs;
    let sie = settings.stale_if_error_secs;
    let mut headers = HeaderMap::new();

    let (browser, edge, edge_max_age) = match profile {
        CdnProfile::Static => {
            let age = ttl.unwrap_or(STATIC_MAX_AGE_SECS);
            let directive = format!("public, max-age={age}, immutable");
            (directive.clone(), directive, age)
        }
        CdnProfile::Api => {
            let age = ttl.unwrap_or(settings.max_age_secs);
            headers.insert(VARY, HeaderValue::from_static("Accept, Accept-Encoding"));
            (
                format!("public, max-age={age}, s-maxage={age}, stale-while-revalidate={swr}"),
                format!("public, max-age={age}, stale-while-revalidate={swr}"),
                age,
            )
        }
        CdnProfile::Dynamic => {
            let age = ttl.unwrap_or(DYNAMIC_EDGE_MAX_AGE_SECS);
            (
                format!("public, max-age=0, s-maxage={age}, must-revalidate"),
                format!("public, max-age={age}"),
                age,
            )
        }
        CdnProfile::Private => {
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
            headers.insert(EXPIRES, HeaderValue::from_static("0"));
            headers.insert(
                CACHE_CONTROL,
                HeaderValue::from_static("private, no-cache, no-store, must-revalidate"),
            );
            return headers;
        }
        CdnProfile::Stale => {
            let age = ttl.unwrap_or(settings.max_age_secs);
            let directive = format!(
                "public, max-age={age}, stale-while-revalidate={swr}, stale-if-error={sie}"
            );
            (directive.clone(), directive, age)
        }
    };

    insert_value(&mut headers, CACHE_CONTROL, &browser);
    if settings.enabled {
        insert_value(&mut headers, CDN_CACHE_CONTROL.clone(), &edge);
        insert_value(&mut headers, SURROGATE_CONTROL.clone(), &format!("max-age={edge_max_age}"));
    }
    headers
}

/// Build the header set from a profile name.
pub fn cdn_headers_by_name(
    name: &str,
    ttl: Option<u64>,
    settings: &CdnSettings,
) -> Result<HeaderMap, UnknownCdnProfile> {
    Ok(cdn_headers(name.parse()?, ttl, settings))
}

fn insert_value(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    // Directives are ASCII built from integers, so this never fails in practice
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
