//! Target resolution: WebSocket request URI → [`Target`].
//!
//! # Resolution order
//!
//! The first rule that produces a target wins:
//!
//! 1. **Explicit mapping** – the request path exactly matches an
//!    operator-configured key, e.g. `"/nist" → "time.nist.gov:13"`.
//! 2. **Subpath** – the path starts with `/ws/`; the next two segments are
//!    host and port: `/ws/telehack.com/23`.
//! 3. **Query parameter** – `?target=host:port`.  Its position relative to
//!    rule 2 is configurable, see [`QueryTargetMode`].
//! 4. **Fallback** – the configured default target.
//!
//! A rule that matches but yields a malformed target (`/ws/host/telnet`) is an
//! error, not a reason to try the next rule.  Resolution is pure: no I/O, no
//! logging side effects beyond `debug!` traces.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::target::{Target, TargetParseError};

/// Path prefix of the subpath convention (`/ws/host/port`).
pub const SUBPATH_PREFIX: &str = "/ws/";

/// Name of the query parameter carrying a `host:port` target.
pub const TARGET_QUERY_PARAM: &str = "target";

/// Why a request could not be turned into a target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// No rule matched and no fallback is configured.
    #[error("no target specified")]
    NoTargetSpecified,

    /// A rule produced a target string that is not `host:port`.
    #[error(transparent)]
    InvalidTargetFormat(#[from] TargetParseError),
}

/// Where the `?target=` query parameter sits in the resolution order.
///
/// Two historical client front-ends disagreed on this, so it is left to the
/// operator.  Explicit mappings always win and the fallback always comes
/// last regardless of the mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryTargetMode {
    /// Subpath first, then query parameter.
    #[default]
    AfterSubpath,
    /// Query parameter first, then subpath.
    BeforeSubpath,
    /// Ignore the query parameter entirely.
    Disabled,
}

/// Error returned when parsing an unknown [`QueryTargetMode`] name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown query target mode '{0}' (expected after-subpath, before-subpath, or disabled)")]
pub struct ParseQueryTargetModeError(String);

impl FromStr for QueryTargetMode {
    type Err = ParseQueryTargetModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "after-subpath" => Ok(Self::AfterSubpath),
            "before-subpath" => Ok(Self::BeforeSubpath),
            "disabled" => Ok(Self::Disabled),
            other => Err(ParseQueryTargetModeError(other.to_string())),
        }
    }
}

impl fmt::Display for QueryTargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AfterSubpath => "after-subpath",
            Self::BeforeSubpath => "before-subpath",
            Self::Disabled => "disabled",
        })
    }
}

/// Resolves request URIs against a fixed set of mappings and a fallback.
///
/// Built once at startup from configuration and shared read-only by every
/// session.
#[derive(Debug, Clone, Default)]
pub struct TargetResolver {
    mappings: HashMap<String, String>,
    fallback: Option<String>,
    query_mode: QueryTargetMode,
}

impl TargetResolver {
    /// Creates a resolver with the default query mode.
    pub fn new(mappings: HashMap<String, String>, fallback: Option<String>) -> Self {
        Self {
            mappings,
            fallback,
            query_mode: QueryTargetMode::default(),
        }
    }

    /// Sets where the `?target=` parameter is consulted.
    pub fn with_query_mode(mut self, mode: QueryTargetMode) -> Self {
        self.query_mode = mode;
        self
    }

    pub fn query_mode(&self) -> QueryTargetMode {
        self.query_mode
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    /// Resolves a request URI (`/path?query`) to a target.
    ///
    /// # Errors
    ///
    /// - [`ResolutionError::NoTargetSpecified`] if nothing matched and there
    ///   is no fallback.
    /// - [`ResolutionError::InvalidTargetFormat`] if the matching rule
    ///   produced a malformed target.
    pub fn resolve(&self, request_uri: &str) -> Result<Target, ResolutionError> {
        let (path, query) = split_request_uri(request_uri);
        debug!("resolving request path='{path}' query={query:?}");

        // 1) Exact mapping.
        if let Some(mapped) = self.mappings.get(path) {
            debug!("matched path mapping {path} => {mapped}");
            return Ok(mapped.parse()?);
        }

        // 2) and 3), in the configured order.
        let query_target = match self.query_mode {
            QueryTargetMode::Disabled => None,
            _ => query.and_then(target_from_query),
        };
        match self.query_mode {
            QueryTargetMode::BeforeSubpath => {
                if let Some(t) = query_target {
                    return Ok(t.parse()?);
                }
                if let Some(result) = target_from_subpath(path) {
                    return result;
                }
            }
            QueryTargetMode::AfterSubpath | QueryTargetMode::Disabled => {
                if let Some(result) = target_from_subpath(path) {
                    return result;
                }
                if let Some(t) = query_target {
                    return Ok(t.parse()?);
                }
            }
        }

        // 4) Fallback.
        match &self.fallback {
            Some(fallback) => {
                debug!("no subpath, mapping, or query target; using default {fallback}");
                Ok(fallback.parse()?)
            }
            None => Err(ResolutionError::NoTargetSpecified),
        }
    }
}

/// Resolves `request_uri` with explicit mappings and an optional fallback.
///
/// Convenience wrapper over [`TargetResolver`] with the default query mode.
///
/// # Example
///
/// ```rust
/// use std::collections::HashMap;
/// use telnet_bridge_core::resolve;
///
/// let target = resolve("/ws/example.com/23", &HashMap::new(), None).unwrap();
/// assert_eq!(target.to_string(), "example.com:23");
/// ```
pub fn resolve(
    request_uri: &str,
    mappings: &HashMap<String, String>,
    fallback: Option<&str>,
) -> Result<Target, ResolutionError> {
    TargetResolver::new(mappings.clone(), fallback.map(str::to_string)).resolve(request_uri)
}

/// Splits `"/path?query#frag"` into `("/path", Some("query"))`.
fn split_request_uri(request_uri: &str) -> (&str, Option<&str>) {
    let without_fragment = request_uri.split('#').next().unwrap_or_default();
    match without_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (without_fragment, None),
    }
}

/// Applies the `/ws/host/port` rule.
///
/// Returns `None` when the rule does not apply (wrong prefix, or fewer than
/// two segments) so the caller can fall through.
fn target_from_subpath(path: &str) -> Option<Result<Target, ResolutionError>> {
    let remainder = path.strip_prefix(SUBPATH_PREFIX)?;
    let mut segments = remainder.split('/');
    let host = segments.next()?;
    let port = segments.next().filter(|p| !p.is_empty())?;

    // "/ws/[::1]/23" names the IPv6 host "::1".
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    debug!("subpath remainder => host='{host}' port='{port}'");
    Some(Target::from_parts(host, port).map_err(ResolutionError::from))
}

/// Extracts a non-empty, URL-decoded `target` query parameter.
fn target_from_query(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == TARGET_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.trim().is_empty())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
