use std::fmt;

use url::Url;

use crate::error::LinkError;

/// Logical destination of a duplex connection, independent of any attempt.
///
/// The id is the path relative to the origin, e.g. `projection/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Where the dashboard was served from. Endpoint URLs inherit its host and
/// pick `wss` iff the origin itself is secure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    host: String,
    secure: bool,
}

impl Origin {
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            secure,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn url_for(&self, endpoint: &EndpointId) -> Result<Url, LinkError> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = endpoint.as_str().trim_start_matches('/');
        Url::parse(&format!("{scheme}://{}/{path}", self.host)).map_err(|source| {
            LinkError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_origin_uses_ws() {
        let origin = Origin::new("127.0.0.1:8000", false);
        let url = origin.url_for(&EndpointId::new("projection/")).unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8000/projection/");
    }

    #[test]
    fn secure_origin_uses_wss_and_strips_leading_slash() {
        let origin = Origin::new("holmes.example.org", true);
        let url = origin.url_for(&EndpointId::new("/calibration/")).unwrap();
        assert_eq!(url.as_str(), "wss://holmes.example.org/calibration/");
    }

    #[test]
    fn invalid_host_is_reported() {
        let origin = Origin::new("bad host", false);
        let err = origin.url_for(&EndpointId::new("simulation/")).unwrap_err();
        assert!(matches!(err, LinkError::InvalidEndpoint { .. }));
    }
}
