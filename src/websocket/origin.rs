use std::collections::HashSet;
use std::fmt;

use axum::http::HeaderValue;

/// Decides whether an upgrade request's `Origin` header is acceptable.
///
/// The default accepts every origin, including requests that carry no
/// `Origin` header at all (non-browser clients). That is deliberate
/// permissiveness suitable only for trusted or development deployments;
/// production deployments should configure an allow-list or install a
/// custom predicate.
pub struct OriginPolicy {
    rule: Rule,
}

enum Rule {
    AllowAll,
    AllowList(HashSet<String>),
    Custom(Box<dyn Fn(Option<&str>) -> bool + Send + Sync>),
}

impl OriginPolicy {
    pub fn allow_all() -> Self {
        Self { rule: Rule::AllowAll }
    }

    /// Accept only the listed origins. A request with a missing or
    /// unparseable `Origin` header is rejected once a list is configured.
    /// An empty list falls back to accept-all.
    pub fn allow_list(origins: impl IntoIterator<Item = String>) -> Self {
        let list: HashSet<String> = origins.into_iter().collect();
        if list.is_empty() {
            Self::allow_all()
        } else {
            Self {
                rule: Rule::AllowList(list),
            }
        }
    }

    /// Install an arbitrary predicate over the raw `Origin` value.
    pub fn custom(predicate: impl Fn(Option<&str>) -> bool + Send + Sync + 'static) -> Self {
        Self {
            rule: Rule::Custom(Box::new(predicate)),
        }
    }

    pub fn allows(&self, origin: Option<&HeaderValue>) -> bool {
        let origin = origin.and_then(|value| value.to_str().ok());
        match &self.rule {
            Rule::AllowAll => true,
            Rule::AllowList(list) => origin.map(|o| list.contains(o)).unwrap_or(false),
            Rule::Custom(predicate) => predicate(origin),
        }
    }
}

impl Default for OriginPolicy {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl fmt::Debug for OriginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rule {
            Rule::AllowAll => write!(f, "OriginPolicy::AllowAll"),
            Rule::AllowList(list) => f.debug_tuple("OriginPolicy::AllowList").field(list).finish(),
            Rule::Custom(_) => write!(f, "OriginPolicy::Custom"),
        }
    }
}
