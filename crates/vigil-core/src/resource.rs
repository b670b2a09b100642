//! Resource identifiers.
//!
//! Websites are keyed by their normalized host and desktop apps by their
//! process name, so `https://WWW.Example.com/a?b` and `example.com` share one
//! policy entry.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, VigilError};

/// The two kinds of resource a policy can govern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Website,
    DesktopApp,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Website => "website",
            ResourceKind::DesktopApp => "desktop_app",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "website" => Some(ResourceKind::Website),
            "desktop_app" => Some(ResourceKind::DesktopApp),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a URL or bare domain to the host used as the policy key.
///
/// Inputs without a scheme are parsed as `http://`. The host is lowercased,
/// a leading `www.` and a trailing dot are dropped, and ports are ignored.
pub fn normalize_domain(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(VigilError::validation("url", "must not be empty"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let parsed = Url::parse(&candidate)
        .map_err(|e| VigilError::validation("url", format!("'{trimmed}' is not a valid URL: {e}")))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| VigilError::validation("url", format!("'{trimmed}' has no host")))?
        .trim_end_matches('.')
        .to_lowercase();

    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() {
        return Err(VigilError::validation("url", format!("'{trimmed}' has no host")));
    }
    Ok(host)
}

/// Normalize a desktop application name (e.g. `Steam.EXE ` → `steam.exe`).
pub fn normalize_app(raw: &str) -> Result<String> {
    let name = raw.trim().to_lowercase();
    if name.is_empty() {
        return Err(VigilError::validation("app_name", "must not be empty"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(VigilError::validation(
            "app_name",
            "must be a process name, not a path",
        ));
    }
    Ok(name)
}

/// Normalize an identifier according to its resource kind.
pub fn normalize_identifier(kind: ResourceKind, raw: &str) -> Result<String> {
    match kind {
        ResourceKind::Website => normalize_domain(raw),
        ResourceKind::DesktopApp => normalize_app(raw),
    }
}
