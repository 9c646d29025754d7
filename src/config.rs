//! Deployment target configuration
//!
//! Built once at startup and threaded into the reconciler and lifecycle API.
//! Nothing below this module reads the process environment.

use crate::Error;

/// Namespace apps are deployed into when none is configured
pub const DEFAULT_NAMESPACE: &str = "apps";

/// DNS zone apps are published under when none is configured
pub const DEFAULT_ZONE: &str = "nstsdc.org";

/// Scheme used for app URLs when none is configured
pub const DEFAULT_SCHEME: &str = "https";

/// Ingress class routes are bound to when none is configured
pub const DEFAULT_INGRESS_CLASS: &str = "traefik";

/// Where and how apps are published
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Namespace holding every managed resource
    pub namespace: String,
    /// DNS zone suffix; an app named `web` is served at `web.{zone}`
    pub zone: String,
    /// Externally visible scheme, only used to build URLs
    pub scheme: String,
    /// Ingress class for routes (`None` leaves the cluster default)
    pub ingress_class: Option<String>,
}

impl Config {
    /// Build a validated configuration
    ///
    /// Values are trimmed. An empty namespace or zone and any scheme other than
    /// `http`/`https` are fatal.
    pub fn new(
        namespace: impl AsRef<str>,
        zone: impl AsRef<str>,
        scheme: impl AsRef<str>,
        ingress_class: Option<&str>,
    ) -> Result<Self, Error> {
        let namespace = namespace.as_ref().trim();
        if namespace.is_empty() {
            return Err(Error::config("namespace is empty"));
        }

        let zone = zone.as_ref().trim().trim_matches('.');
        if zone.is_empty() {
            return Err(Error::config("app zone is empty"));
        }

        let scheme = scheme.as_ref().trim().to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(Error::config(format!(
                "app scheme must be http or https, got '{scheme}'"
            )));
        }

        let ingress_class = ingress_class
            .map(str::trim)
            .filter(|class| !class.is_empty())
            .map(str::to_string);

        Ok(Self {
            namespace: namespace.to_string(),
            zone: zone.to_string(),
            scheme,
            ingress_class,
        })
    }

    /// Public hostname for an app slug
    pub fn host_for(&self, app_slug: &str) -> String {
        format!("{}.{}", app_slug, self.zone)
    }

    /// Public URL for a hostname
    pub fn url_for(&self, host: &str) -> String {
        format!("{}://{}", self.scheme, host)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            zone: DEFAULT_ZONE.to_string(),
            scheme: DEFAULT_SCHEME.to_string(),
            ingress_class: Some(DEFAULT_INGRESS_CLASS.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_normalizes_values() {
        let config = Config::new(" apps ", "example.com.", "HTTPS", Some(" nginx ")).unwrap();
        assert_eq!(config.namespace, "apps");
        assert_eq!(config.zone, "example.com");
        assert_eq!(config.scheme, "https");
        assert_eq!(config.ingress_class.as_deref(), Some("nginx"));
    }

    #[test]
    fn empty_namespace_is_fatal() {
        let err = Config::new("  ", "example.com", "https", None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("namespace"));
    }

    #[test]
    fn empty_zone_is_fatal() {
        assert!(Config::new("apps", "", "https", None).is_err());
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let err = Config::new("apps", "example.com", "ftp", None).unwrap_err();
        assert!(err.to_string().contains("ftp"));
    }

    #[test]
    fn blank_ingress_class_means_cluster_default() {
        let config = Config::new("apps", "example.com", "http", Some("")).unwrap();
        assert_eq!(config.ingress_class, None);
    }

    #[test]
    fn builds_hosts_and_urls() {
        let config = Config::new("apps", "example.com", "http", None).unwrap();
        let host = config.host_for("my-app");
        assert_eq!(host, "my-app.example.com");
        assert_eq!(config.url_for(&host), "http://my-app.example.com");
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.zone, DEFAULT_ZONE);
        assert_eq!(config.scheme, DEFAULT_SCHEME);
        assert_eq!(config.ingress_class.as_deref(), Some(DEFAULT_INGRESS_CLASS));
    }
}
