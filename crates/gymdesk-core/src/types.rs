//! Common types used throughout GymDesk

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one logical cache: `{name}-{version}`.
///
/// Namespaces found in storage may come from older versions, so the
/// identifier is kept opaque rather than parsed back into parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheNamespace(String);

impl CacheNamespace {
    /// Build a versioned namespace identifier.
    pub fn versioned(name: &str, version: &str) -> Self {
        Self(format!("{}-{}", name, version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheNamespace {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CacheNamespace {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The four logical cache roles, versioned together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheRole {
    /// Application shell and documents.
    Primary,
    /// Scripts, stylesheets and fonts.
    Static,
    /// API responses.
    Dynamic,
    /// Images.
    Images,
}

impl CacheRole {
    pub const ALL: [CacheRole; 4] = [
        CacheRole::Primary,
        CacheRole::Static,
        CacheRole::Dynamic,
        CacheRole::Images,
    ];

    /// Suffix appended to the application name, if any.
    fn suffix(self) -> Option<&'static str> {
        match self {
            CacheRole::Primary => None,
            CacheRole::Static => Some("static"),
            CacheRole::Dynamic => Some("dynamic"),
            CacheRole::Images => Some("images"),
        }
    }
}

/// The current-version namespace for every role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSet {
    pub primary: CacheNamespace,
    pub static_assets: CacheNamespace,
    pub dynamic: CacheNamespace,
    pub images: CacheNamespace,
}

impl CacheSet {
    /// Derive all four namespaces from an application name and version.
    pub fn new(app_name: &str, version: &str) -> Self {
        let ns = |role: CacheRole| match role.suffix() {
            Some(suffix) => CacheNamespace::versioned(&format!("{}-{}", app_name, suffix), version),
            None => CacheNamespace::versioned(app_name, version),
        };
        Self {
            primary: ns(CacheRole::Primary),
            static_assets: ns(CacheRole::Static),
            dynamic: ns(CacheRole::Dynamic),
            images: ns(CacheRole::Images),
        }
    }

    /// Namespace for a role.
    pub fn get(&self, role: CacheRole) -> &CacheNamespace {
        match role {
            CacheRole::Primary => &self.primary,
            CacheRole::Static => &self.static_assets,
            CacheRole::Dynamic => &self.dynamic,
            CacheRole::Images => &self.images,
        }
    }

    /// All current namespaces; anything else in storage is garbage after activation.
    pub fn allow_list(&self) -> Vec<CacheNamespace> {
        CacheRole::ALL.iter().map(|r| self.get(*r).clone()).collect()
    }

    pub fn contains(&self, namespace: &CacheNamespace) -> bool {
        CacheRole::ALL.iter().any(|r| self.get(*r) == namespace)
    }
}

/// Resource class of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceClass {
    Api,
    Image,
    StaticAsset,
    Document,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 4] = [
        ResourceClass::Api,
        ResourceClass::Image,
        ResourceClass::StaticAsset,
        ResourceClass::Document,
    ];

    /// Cache role that stores responses of this class.
    pub fn cache_role(self) -> CacheRole {
        match self {
            ResourceClass::Api => CacheRole::Dynamic,
            ResourceClass::Image => CacheRole::Images,
            ResourceClass::StaticAsset => CacheRole::Static,
            ResourceClass::Document => CacheRole::Primary,
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceClass::Api => "api",
            ResourceClass::Image => "image",
            ResourceClass::StaticAsset => "static",
            ResourceClass::Document => "document",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_set_names() {
        let set = CacheSet::new("gymdesk", "v1");
        assert_eq!(set.primary.as_str(), "gymdesk-v1");
        assert_eq!(set.static_assets.as_str(), "gymdesk-static-v1");
        assert_eq!(set.dynamic.as_str(), "gymdesk-dynamic-v1");
        assert_eq!(set.images.as_str(), "gymdesk-images-v1");
    }

    #[test]
    fn test_allow_list_tracks_version() {
        let v1 = CacheSet::new("gymdesk", "v1");
        let v2 = CacheSet::new("gymdesk", "v2");

        assert_eq!(v2.allow_list().len(), 4);
        for old in v1.allow_list() {
            assert!(!v2.contains(&old));
        }
    }

    #[test]
    fn test_class_roles_are_distinct() {
        let mut roles: Vec<_> = ResourceClass::ALL.iter().map(|c| c.cache_role()).collect();
        roles.dedup();
        assert_eq!(roles.len(), 4);
    }
}
