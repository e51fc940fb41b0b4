//! HTTP methods and endpoint normalization.
//!
//! Before the upstream has told us a real bucket hash, requests are grouped
//! by `METHOD|normalized_route`. Normalization drops the query string and,
//! for resource families the upstream rate-limits per top-level resource
//! (e.g. `guilds/{id}/members`), collapses the route to its first three
//! segments so all requests against that resource share one grouping key.

use std::fmt;

/// HTTP methods accepted by the upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Patch,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Canonical upper-case name, as used in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Patch => "PATCH",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resource family the upstream scopes per top-level resource.
///
/// A route matches when its first segment equals `root` and its third
/// segment equals `resource` (e.g. `guilds/{id}/members/...`). Matching
/// routes are grouped under their first three segments.
///
/// The set of families is upstream documentation, not something this crate
/// can infer; pass the full list via
/// [`CoordinatorConfig`](crate::CoordinatorConfig) and keep it in sync with
/// the upstream's published per-resource rate-limit scopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteScope {
    root: String,
    resource: String,
}

impl RouteScope {
    pub fn new(root: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { root: root.into(), resource: resource.into() }
    }

    fn matches(&self, segments: &[&str]) -> bool {
        segments.len() > 2 && segments[0] == self.root && segments[2] == self.resource
    }
}

/// The families known to be per-resource in the upstream API today.
pub(crate) fn default_scopes() -> Vec<RouteScope> {
    vec![RouteScope::new("guilds", "members")]
}

/// Normalize a raw endpoint into the grouping key used for provisional
/// buckets and hash mappings.
///
/// Leading slashes and the query string are stripped; scoped families are
/// collapsed to `root/{id}/resource`.
pub fn normalize_route(endpoint: &str, scopes: &[RouteScope]) -> String {
    let path = endpoint.split('?').next().unwrap_or(endpoint);
    let path = path.trim_start_matches('/');
    let segments: Vec<&str> = path.split('/').collect();

    if scopes.iter().any(|scope| scope.matches(&segments)) {
        return segments[..3].join("/");
    }

    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes() -> Vec<RouteScope> {
        default_scopes()
    }

    #[test]
    fn strips_query_string() {
        assert_eq!(normalize_route("channels/123/messages?limit=50", &scopes()), "channels/123/messages");
    }

    #[test]
    fn scoped_family_groups_per_resource() {
        let a = normalize_route("/guilds/123/members/456?x=1", &scopes());
        let b = normalize_route("/guilds/123/members/789", &scopes());
        assert_eq!(a, b);
        assert_eq!(a, "guilds/123/members");
    }

    #[test]
    fn unscoped_routes_stay_distinct() {
        let a = normalize_route("/channels/123/messages", &scopes());
        let b = normalize_route("/channels/123", &scopes());
        assert_ne!(a, b);
    }

    #[test]
    fn different_resources_of_scoped_root_stay_per_endpoint() {
        // Only the configured nested resource collapses; other guild routes
        // keep their full path.
        assert_eq!(normalize_route("guilds/123/channels", &scopes()), "guilds/123/channels");
        assert_eq!(normalize_route("guilds/123", &scopes()), "guilds/123");
    }

    #[test]
    fn custom_scope_set_is_honored() {
        let custom = vec![RouteScope::new("channels", "messages")];
        assert_eq!(normalize_route("channels/42/messages/7", &custom), "channels/42/messages");
        // guilds/members is no longer scoped under the custom set
        assert_eq!(
            normalize_route("guilds/123/members/456", &custom),
            "guilds/123/members/456"
        );
    }

    #[test]
    fn method_display_is_canonical() {
        assert_eq!(Method::Get.to_string(), "GET");
        assert_eq!(Method::Patch.as_str(), "PATCH");
        assert_eq!(Method::Delete.as_str(), "DELETE");
    }
}
