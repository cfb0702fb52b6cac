//! Platform tuples and the user's platform allow-set.

use serde::{Deserialize, Serialize};

/// A platform tuple as it appears in manifest list entries and image configs.
///
/// `os_features` is order-preserving; two platforms with the same features in
/// a different order are not equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub architecture: String,

    #[serde(default)]
    pub os: String,

    #[serde(rename = "os.version", default, skip_serializing_if = "String::is_empty")]
    pub os_version: String,

    #[serde(rename = "os.features", default, skip_serializing_if = "Vec::is_empty")]
    pub os_features: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub variant: String,
}

/// The user's architecture/OS/variant allow-set.
///
/// An empty dimension is a wildcard. Variant matching is exact string
/// equality: "v7" and "arm/v7" are different values and are not normalized.
/// `os_version` and `os_features` are never consulted.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    arch: Vec<String>,
    os: Vec<String>,
    variant: Vec<String>,
}

impl FilterSet {
    pub fn new(arch: Vec<String>, os: Vec<String>, variant: Vec<String>) -> Self {
        Self { arch, os, variant }
    }

    /// True iff every non-empty dimension contains the given value.
    pub fn allow(&self, arch: &str, os: &str, variant: &str) -> bool {
        dimension_allows(&self.arch, arch)
            && dimension_allows(&self.os, os)
            && dimension_allows(&self.variant, variant)
    }
}

fn dimension_allows(allowed: &[String], value: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|v| v == value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_allow_all_dimensions_empty() {
        let set = FilterSet::default();
        assert!(set.allow("amd64", "linux", ""));
        assert!(set.allow("s390x", "windows", "v7"));
    }

    #[test]
    fn test_allow_matching() {
        let set = FilterSet::new(strings(&["amd64", "arm64"]), strings(&["linux"]), vec![]);
        assert!(set.allow("amd64", "linux", ""));
        assert!(set.allow("arm64", "linux", "v8"));
        assert!(!set.allow("s390x", "linux", ""));
        assert!(!set.allow("amd64", "windows", ""));
    }

    #[test]
    fn test_variant_is_exact_match() {
        let set = FilterSet::new(vec![], vec![], strings(&["v7"]));
        assert!(set.allow("arm", "linux", "v7"));
        assert!(!set.allow("arm", "linux", "arm/v7"));
        assert!(!set.allow("arm", "linux", ""));
    }

    #[test]
    fn test_platform_deserialize_wire_keys() {
        let p: Platform = serde_json::from_str(
            r#"{
                "architecture": "amd64",
                "os": "windows",
                "os.version": "10.0.17763.4131",
                "os.features": ["win32k"]
            }"#,
        )
        .unwrap();
        assert_eq!(p.architecture, "amd64");
        assert_eq!(p.os, "windows");
        assert_eq!(p.os_version, "10.0.17763.4131");
        assert_eq!(p.os_features, vec!["win32k"]);
        assert_eq!(p.variant, "");
    }

    #[test]
    fn test_os_features_order_matters() {
        let a = Platform {
            os_features: vec!["x".into(), "y".into()],
            ..Platform::default()
        };
        let b = Platform {
            os_features: vec!["y".into(), "x".into()],
            ..Platform::default()
        };
        assert_ne!(a, b);
    }
}
