//! Tenant identity and request-context resolution.

mod directory;

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

pub use directory::{
    FeatureFlags, PortalFeature, Tenant, TenantDirectory, TenantDraft, TenantPatch,
    TenantSettings,
};

/// Slug identifying one isolated customer organization.
///
/// Keys are lowercase ASCII alphanumerics and `-`. The same value is written to the `tenant_id`
/// field of every tenant-owned record, so an empty key can never be constructed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantKey(String);

impl TenantKey {
    pub fn new(value: impl AsRef<str>) -> Result<Self, InvalidTenantKey> {
        let normalized = value.as_ref().trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(InvalidTenantKey::Empty);
        }
        if let Some(ch) = normalized
            .chars()
            .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '-'))
        {
            return Err(InvalidTenantKey::Character {
                value: normalized.clone(),
                ch,
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantKey {
    type Error = InvalidTenantKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantKey> for String {
    fn from(value: TenantKey) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTenantKey {
    #[error("tenant key must not be empty")]
    Empty,
    #[error("tenant key '{value}' contains unsupported character '{ch}'")]
    Character { value: String, ch: char },
}

/// Scope applied to every data operation.
///
/// `Global` is a separate, explicit mode for globally scoped tables; it is never what an empty or
/// missing tenant degrades to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", content = "tenant", rename_all = "snake_case")]
pub enum TenantScope {
    Tenant(TenantKey),
    Global,
}

impl TenantScope {
    pub fn tenant(key: TenantKey) -> Self {
        Self::Tenant(key)
    }

    pub fn key(&self) -> Option<&TenantKey> {
        match self {
            TenantScope::Tenant(key) => Some(key),
            TenantScope::Global => None,
        }
    }

    /// Whether a record tagged with `owner` is visible under this scope.
    pub fn admits(&self, owner: Option<&TenantKey>) -> bool {
        match self {
            TenantScope::Global => true,
            TenantScope::Tenant(key) => owner == Some(key),
        }
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantScope::Tenant(key) => write!(f, "tenant:{key}"),
            TenantScope::Global => f.write_str("global"),
        }
    }
}

/// The parts of an inbound request that carry tenant identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub host: String,
    pub path: String,
}

impl RequestContext {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }
}

/// Which part of the request produced the tenant key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Subdomain,
    PathSegment,
    Default,
}

impl ResolutionSource {
    pub const fn label(self) -> &'static str {
        match self {
            ResolutionSource::Subdomain => "subdomain",
            ResolutionSource::PathSegment => "path_segment",
            ResolutionSource::Default => "default",
        }
    }
}

/// Derives the active tenant from the request host or path.
///
/// Resolution never fails: a host such as `dndc.example.org` yields `dndc`, otherwise the first
/// usable path segment (`/dndc/programs`), otherwise the configured default.
#[derive(Debug, Clone)]
pub struct TenantResolver {
    default_key: TenantKey,
    placeholder_label: String,
}

impl TenantResolver {
    pub fn new(default_key: TenantKey, placeholder_label: impl Into<String>) -> Self {
        Self {
            default_key,
            placeholder_label: placeholder_label.into().to_ascii_lowercase(),
        }
    }

    pub fn resolve(&self, context: &RequestContext) -> TenantScope {
        self.resolve_with_source(context).0
    }

    pub fn resolve_with_source(&self, context: &RequestContext) -> (TenantScope, ResolutionSource) {
        if let Some(key) = self.from_host(&context.host) {
            tracing::debug!(tenant = %key, host = %context.host, "tenant resolved from subdomain");
            return (TenantScope::Tenant(key), ResolutionSource::Subdomain);
        }

        if let Some(key) = first_path_segment(&context.path) {
            tracing::debug!(tenant = %key, path = %context.path, "tenant resolved from path");
            return (TenantScope::Tenant(key), ResolutionSource::PathSegment);
        }

        (
            TenantScope::Tenant(self.default_key.clone()),
            ResolutionSource::Default,
        )
    }

    fn from_host(&self, host: &str) -> Option<TenantKey> {
        let host = strip_port(host.trim()).to_ascii_lowercase();
        if host.parse::<IpAddr>().is_ok() {
            return None;
        }

        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() <= 2 {
            return None;
        }

        let leftmost = labels[0];
        if leftmost.is_empty() || leftmost == self.placeholder_label {
            return None;
        }

        TenantKey::new(leftmost).ok()
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host
            .split_once(']')
            .map(|(addr, _)| addr.trim_start_matches('['))
            .unwrap_or(host);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

fn first_path_segment(path: &str) -> Option<TenantKey> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/')
        .find(|segment| !segment.trim().is_empty())
        .and_then(|segment| TenantKey::new(segment).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> TenantResolver {
        TenantResolver::new(TenantKey::new("dndc").expect("valid key"), "www")
    }

    fn key(value: &str) -> TenantScope {
        TenantScope::Tenant(TenantKey::new(value).expect("valid key"))
    }

    #[test]
    fn subdomain_wins_over_path() {
        let context = RequestContext::new("eastside.portal.org", "/westside/programs");
        assert_eq!(
            resolver().resolve_with_source(&context),
            (key("eastside"), ResolutionSource::Subdomain)
        );
    }

    #[test]
    fn www_placeholder_falls_through_to_path() {
        let context = RequestContext::new("www.portal.org", "/westside/programs");
        assert_eq!(
            resolver().resolve_with_source(&context),
            (key("westside"), ResolutionSource::PathSegment)
        );
    }

    #[test]
    fn two_label_host_uses_first_non_empty_segment() {
        let context = RequestContext::new("portal.org:8443", "//riverside/");
        assert_eq!(resolver().resolve(&context), key("riverside"));
    }

    #[test]
    fn falls_back_to_default_tenant() {
        let context = RequestContext::new("localhost:3000", "/");
        assert_eq!(
            resolver().resolve_with_source(&context),
            (key("dndc"), ResolutionSource::Default)
        );
    }

    #[test]
    fn ip_hosts_are_not_treated_as_subdomains() {
        let context = RequestContext::new("127.0.0.1:3000", "");
        assert_eq!(resolver().resolve(&context), key("dndc"));
    }

    #[test]
    fn unusable_segments_are_skipped() {
        let context = RequestContext::new("portal.org", "/Not Valid/");
        assert_eq!(resolver().resolve(&context), key("dndc"));

        let context = RequestContext::new("portal.org", "/?tab=alerts");
        assert_eq!(resolver().resolve(&context), key("dndc"));
    }

    #[test]
    fn tenant_keys_are_normalized_and_validated() {
        assert_eq!(
            TenantKey::new("  DNDC ").expect("valid").as_str(),
            "dndc"
        );
        assert_eq!(TenantKey::new(""), Err(InvalidTenantKey::Empty));
        assert!(matches!(
            TenantKey::new("a_b"),
            Err(InvalidTenantKey::Character { ch: '_', .. })
        ));
    }

    #[test]
    fn scope_admission() {
        let east = TenantKey::new("east").expect("valid");
        let west = TenantKey::new("west").expect("valid");
        let scope = TenantScope::Tenant(east.clone());
        assert!(scope.admits(Some(&east)));
        assert!(!scope.admits(Some(&west)));
        assert!(!scope.admits(None));
        assert!(TenantScope::Global.admits(None));
    }
}
