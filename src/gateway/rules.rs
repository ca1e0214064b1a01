use serde::{Deserialize, Serialize};
use url::Url;

/// How the matched prefix is rewritten before the request goes upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathRewrite {
    /// Forward the path untouched.
    #[default]
    Identity,
    /// Drop the route prefix: `/ia/chat` -> `/chat`.
    StripPrefix,
    /// Swap the route prefix: `/users/5` -> `/api/users/5`.
    ReplacePrefix { with: String },
}

impl PathRewrite {
    /// Apply the rewrite to `path`, which must already match `prefix`.
    pub fn apply(&self, prefix: &str, path: &str) -> String {
        match self {
            PathRewrite::Identity => path.to_string(),
            PathRewrite::StripPrefix => {
                let rest = path.strip_prefix(prefix).unwrap_or(path);
                if rest.is_empty() {
                    "/".to_string()
                } else {
                    rest.to_string()
                }
            }
            PathRewrite::ReplacePrefix { with } => {
                let rest = path.strip_prefix(prefix).unwrap_or(path);
                let replaced = format!("{}{}", with.trim_end_matches('/'), rest);
                if replaced.is_empty() {
                    "/".to_string()
                } else {
                    replaced
                }
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            PathRewrite::Identity => "identity".to_string(),
            PathRewrite::StripPrefix => "strip prefix".to_string(),
            PathRewrite::ReplacePrefix { with } => format!("replace -> {}", with),
        }
    }
}

fn default_requires_auth() -> bool {
    true
}

/// One configured upstream mapping. Immutable once the gateway starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub prefix: String,
    /// Name used in logs and in 502 messages.
    pub service: String,
    pub upstream: Url,
    #[serde(default)]
    pub rewrite: PathRewrite,
    #[serde(default = "default_requires_auth")]
    pub requires_auth: bool,
    /// Subject to the stricter login-attempt limiter.
    #[serde(default)]
    pub strict_rate_limit: bool,
}

impl RouteRule {
    pub fn new(prefix: impl Into<String>, service: impl Into<String>, upstream: Url) -> Self {
        Self {
            prefix: prefix.into(),
            service: service.into(),
            upstream,
            rewrite: PathRewrite::Identity,
            requires_auth: true,
            strict_rate_limit: false,
        }
    }

    pub fn rewrite(mut self, rewrite: PathRewrite) -> Self {
        self.rewrite = rewrite;
        self
    }

    pub fn public(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    pub fn strict_rate_limit(mut self) -> Self {
        self.strict_rate_limit = true;
        self
    }

    /// Segment-aware prefix match: `/users` matches `/users` and `/users/1`
    /// but not `/usersx`.
    pub fn matches(&self, path: &str) -> bool {
        let prefix = self.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    pub fn rewrite_path(&self, path: &str) -> String {
        self.rewrite.apply(self.prefix.trim_end_matches('/'), path)
    }

    /// Full upstream URL for an inbound path and optional query string.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.upstream.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", base, self.rewrite_path(path)));
        url.set_query(query);
        url
    }
}

/// Route rules ordered for lookup: longest prefix first.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(mut rules: Vec<RouteRule>) -> Self {
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { rules }
    }

    pub fn resolve(&self, path: &str) -> Option<&RouteRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}
