//! API-key authentication for the gateway's administrative surface.
//!
//! The dispatch hot path is open; only registry-mutating endpoints
//! (`/api/ai/register`, `/api/ai/unregister/{name}`) consult this config.
//! Authentication is optional: a gateway started without `--api-key` accepts
//! all administrative requests.
//!
//! Keys are shared secrets presented via the `X-API-Key` header and compared
//! in constant time.

use std::fmt;

/// Administrative authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// The API key if authentication is enabled, None if disabled
    api_key: Option<String>,
}

impl AuthConfig {
    /// Enables API-key authentication with the given shared secret.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
        }
    }

    /// Disables authentication (the default).
    pub fn disabled() -> Self {
        Self { api_key: None }
    }

    pub fn requires_auth(&self) -> bool {
        self.api_key.is_some()
    }

    /// Validates a client-provided key.
    ///
    /// Always `true` when authentication is disabled. Comparison is
    /// constant-time so the key cannot be guessed byte-by-byte from response
    /// latency.
    pub fn validate_api_key(&self, provided_key: &str) -> bool {
        match &self.api_key {
            Some(expected_key) => constant_time_eq(expected_key, provided_key),
            None => true,
        }
    }
}

impl fmt::Display for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.api_key {
            Some(_key) => write!(f, "ApiKey(*****)"),
            None => write!(f, "Disabled"),
        }
    }
}

/// Constant-time string comparison.
///
/// Iterates the full length regardless of where the first difference occurs.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_api_key_validates() {
        let auth = AuthConfig::with_api_key("test-key");
        assert!(auth.requires_auth());
        assert!(auth.validate_api_key("test-key"));
        assert!(!auth.validate_api_key("wrong-key"));
    }

    #[test]
    fn test_disabled_accepts_everything() {
        let auth = AuthConfig::disabled();
        assert!(!auth.requires_auth());
        assert!(auth.validate_api_key("anything"));
        assert!(auth.validate_api_key(""));
    }

    #[test]
    fn test_default_is_disabled() {
        assert!(!AuthConfig::default().requires_auth());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("same-key-123", "same-key-123"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("hello", "world"));
        assert!(!constant_time_eq("short", "longer"));
    }

    #[test]
    fn test_display_masks_key() {
        assert_eq!(format!("{}", AuthConfig::with_api_key("secret")), "ApiKey(*****)");
        assert_eq!(format!("{}", AuthConfig::disabled()), "Disabled");
    }
}
