//! Endpoint key generation and handling.

use serde::{Deserialize, Serialize};

/// A key that identifies an endpoint by method and path.
///
/// Methods are compared case-insensitively and stored upper-cased; paths
/// are compared exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointKey {
    /// HTTP method, upper-cased
    pub method: String,
    /// Request path
    pub path: String,
}

impl EndpointKey {
    /// Create a new endpoint key.
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
        }
    }

    /// Parse the `"METHOD /path"` form.
    pub fn parse(key: &str) -> Option<Self> {
        let (method, path) = key.trim().split_once(char::is_whitespace)?;
        let path = path.trim();
        if method.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self::new(method, path))
    }

    /// Convert the endpoint key to its `"METHOD /path"` form.
    pub fn to_string_key(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    /// Counter key for `actor` on this endpoint.
    pub fn scoped_actor_key(&self, actor: &str) -> String {
        format!("{}|{}", actor, self.to_string_key())
    }
}

impl std::fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}
