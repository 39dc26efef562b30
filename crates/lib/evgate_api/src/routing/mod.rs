//! Request dispatch: the route table and the proxy that serves its
//! collaborator routes.
//!
//! The table is built once at startup and shared read-only. Rules are
//! matched in order on path-segment boundaries, so `/api/v1/events` matches
//! `/api/v1/events` and `/api/v1/events/42` but not `/api/v1/eventsfoo`.

pub mod proxy;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Root under which the default rules live.
pub const API_PREFIX: &str = "/api/v1";

/// Route table construction errors. All of them are fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route prefix {0:?} must start with '/', name at least one segment and not end with '/'")]
    InvalidPrefix(String),

    #[error("route prefix {0:?} is listed twice")]
    DuplicatePrefix(String),

    #[error("route prefix {prefix:?} is unreachable behind {shadowed_by:?}")]
    Shadowed { prefix: String, shadowed_by: String },

    #[error("route {prefix:?} names unknown collaborator {name:?}")]
    UnknownCollaborator { prefix: String, name: String },

    #[error("collaborator {name:?} has an invalid base URL {url:?}: {reason}")]
    InvalidUpstream {
        name: String,
        url: String,
        reason: String,
    },

    #[error("route {0:?} must set exactly one of `local` or `proxy`")]
    AmbiguousTarget(String),

    #[error("cannot read routes file: {0}")]
    Io(String),

    #[error("cannot parse routes file: {0}")]
    Parse(String),
}

/// Who may use a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Public,
    #[default]
    Authenticated,
    Admin,
}

/// Handler groups served inside the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalService {
    Auth,
    Admin,
}

/// Where a matched request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    Local(LocalService),
    /// Forward to the named collaborator.
    Proxy(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub prefix: String,
    pub access: Access,
    pub target: RouteTarget,
}

impl RouteRule {
    pub fn new(prefix: impl Into<String>, access: Access, target: RouteTarget) -> Self {
        Self {
            prefix: prefix.into(),
            access,
            target,
        }
    }

    /// Whether `path` falls under this rule's prefix.
    pub fn matches(&self, path: &str) -> bool {
        under_prefix(path, &self.prefix)
    }
}

/// Ordered rules plus the collaborator address book.
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
    upstreams: BTreeMap<String, Url>,
}

impl RouteTable {
    /// Validate and build a table.
    pub fn new(
        rules: Vec<RouteRule>,
        collaborators: &BTreeMap<String, String>,
    ) -> Result<Self, RouteError> {
        let mut upstreams = BTreeMap::new();
        for (name, raw) in collaborators {
            upstreams.insert(name.clone(), parse_upstream(name, raw)?);
        }

        for (i, rule) in rules.iter().enumerate() {
            if !valid_prefix(&rule.prefix) {
                return Err(RouteError::InvalidPrefix(rule.prefix.clone()));
            }
            for earlier in &rules[..i] {
                if earlier.prefix == rule.prefix {
                    return Err(RouteError::DuplicatePrefix(rule.prefix.clone()));
                }
                if earlier.matches(&rule.prefix) {
                    return Err(RouteError::Shadowed {
                        prefix: rule.prefix.clone(),
                        shadowed_by: earlier.prefix.clone(),
                    });
                }
            }
            if let RouteTarget::Proxy(name) = &rule.target
                && !upstreams.contains_key(name)
            {
                return Err(RouteError::UnknownCollaborator {
                    prefix: rule.prefix.clone(),
                    name: name.clone(),
                });
            }
        }

        Ok(Self { rules, upstreams })
    }

    /// The gateway's standard layout under [`API_PREFIX`].
    pub fn default_rules() -> Vec<RouteRule> {
        let at = |segment: &str| format!("{API_PREFIX}/{segment}");
        vec![
            RouteRule::new(at("auth"), Access::Public, RouteTarget::Local(LocalService::Auth)),
            RouteRule::new(at("admin"), Access::Admin, RouteTarget::Local(LocalService::Admin)),
            RouteRule::new(
                at("events"),
                Access::Authenticated,
                RouteTarget::Proxy("core".into()),
            ),
            RouteRule::new(
                at("comments"),
                Access::Authenticated,
                RouteTarget::Proxy("communication".into()),
            ),
            RouteRule::new(
                at("notifications"),
                Access::Authenticated,
                RouteTarget::Proxy("notification".into()),
            ),
        ]
    }

    /// Load rules from a YAML file.
    ///
    /// ```yaml
    /// collaborators:          # optional, merged over the configured ones
    ///   billing: http://billing:8090
    /// routes:
    ///   - prefix: /api/v1/auth
    ///     access: public
    ///     local: auth
    ///   - prefix: /api/v1/billing
    ///     proxy: billing      # access defaults to authenticated
    /// ```
    pub fn from_yaml_file(
        path: &Path,
        collaborators: &BTreeMap<String, String>,
    ) -> Result<Self, RouteError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RouteError::Io(format!("{}: {e}", path.display())))?;
        Self::from_yaml(&text, collaborators)
    }

    pub fn from_yaml(
        text: &str,
        collaborators: &BTreeMap<String, String>,
    ) -> Result<Self, RouteError> {
        let file: RoutesFile =
            serde_yaml::from_str(text).map_err(|e| RouteError::Parse(e.to_string()))?;

        let mut merged = collaborators.clone();
        merged.extend(file.collaborators);

        let rules = file
            .routes
            .into_iter()
            .map(RuleEntry::into_rule)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(rules, &merged)
    }

    /// First rule whose prefix covers `path`.
    pub fn resolve(&self, path: &str) -> Option<&RouteRule> {
        self.rules.iter().find(|r| r.matches(path))
    }

    /// Base URL of a collaborator.
    pub fn upstream(&self, name: &str) -> Option<&Url> {
        self.upstreams.get(name)
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

#[derive(Debug, Deserialize)]
struct RoutesFile {
    #[serde(default)]
    collaborators: BTreeMap<String, String>,
    routes: Vec<RuleEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    prefix: String,
    #[serde(default)]
    access: Access,
    local: Option<LocalService>,
    proxy: Option<String>,
}

impl RuleEntry {
    fn into_rule(self) -> Result<RouteRule, RouteError> {
        let target = match (self.local, self.proxy) {
            (Some(service), None) => RouteTarget::Local(service),
            (None, Some(name)) => RouteTarget::Proxy(name),
            _ => return Err(RouteError::AmbiguousTarget(self.prefix)),
        };
        Ok(RouteRule::new(self.prefix, self.access, target))
    }
}

fn under_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn valid_prefix(prefix: &str) -> bool {
    prefix.len() > 1
        && prefix.starts_with('/')
        && !prefix.ends_with('/')
        && !prefix.contains("//")
        && !prefix.contains(['{', '}', '*', '?', '#'])
}

fn parse_upstream(name: &str, raw: &str) -> Result<Url, RouteError> {
    let invalid = |reason: String| RouteError::InvalidUpstream {
        name: name.to_string(),
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https".into()));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".into()));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("must not carry a query or fragment".into()));
    }
    Ok(url)
}
