/// A single public-route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RoutePattern {
    /// `/health`
    Exact(String),
    /// `/api-docs*` - any path starting with the text.
    Prefix(String),
    /// `/auth/*` - the base itself or anything below it.
    SegmentPrefix(String),
}

impl RoutePattern {
    fn parse(raw: &str) -> Self {
        if let Some(base) = raw.strip_suffix("/*") {
            RoutePattern::SegmentPrefix(base.to_string())
        } else if let Some(base) = raw.strip_suffix('*') {
            RoutePattern::Prefix(base.to_string())
        } else {
            RoutePattern::Exact(raw.to_string())
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            RoutePattern::Exact(route) => path == route,
            RoutePattern::Prefix(base) => path.starts_with(base.as_str()),
            RoutePattern::SegmentPrefix(base) => match path.strip_prefix(base.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            },
        }
    }
}

/// Decides from the configured allow-list whether a path skips authentication.
/// Anything not on the list is protected.
#[derive(Debug, Clone, Default)]
pub struct RouteClassifier {
    patterns: Vec<RoutePattern>,
}

impl RouteClassifier {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .map(|p| RoutePattern::parse(&p))
            .collect();

        Self { patterns }
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(path))
    }
}
