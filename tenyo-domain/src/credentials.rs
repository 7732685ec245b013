//! OKX API Credentials
//!
//! Key, secret and passphrase for signed REST calls.
//!
//! # Security Model
//!
//! - Secret and passphrase are wiped from memory on drop
//! - `Debug` never prints secrets, and the key only in masked form
//! - Placeholder values copied from sample configs are rejected

use std::fmt;

use zeroize::Zeroizing;

use crate::value_objects::DomainError;

/// Values shipped in sample configuration files.
const PLACEHOLDERS: &[&str] = &[
    "your-api-key",
    "your-api-secret",
    "your-passphrase",
    "your_api_key",
    "your_api_secret",
    "your_passphrase",
    "changeme",
];

/// Credentials for the OKX v5 REST API.
#[derive(Clone)]
pub struct OkxCredentials {
    api_key: String,
    api_secret: Zeroizing<String>,
    passphrase: Zeroizing<String>,
}

impl OkxCredentials {
    /// Build credentials, rejecting empty or placeholder values.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidCredentials` naming the offending field.
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let api_key = api_key.into();
        let api_secret = Zeroizing::new(api_secret.into());
        let passphrase = Zeroizing::new(passphrase.into());

        check_field("api key", &api_key)?;
        check_field("api secret", &api_secret)?;
        check_field("passphrase", &passphrase)?;

        Ok(Self {
            api_key,
            api_secret,
            passphrase,
        })
    }

    /// API key (sent as a header, not secret material)
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// API secret used for HMAC signing
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }

    /// Account passphrase
    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// First four characters of the key followed by `****`.
    pub fn masked_key(&self) -> String {
        mask(&self.api_key)
    }
}

impl fmt::Debug for OkxCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OkxCredentials")
            .field("api_key", &self.masked_key())
            .field("api_secret", &"****")
            .field("passphrase", &"****")
            .finish()
    }
}

/// Mask a sensitive value, keeping at most its first four characters.
pub fn mask(value: &str) -> String {
    if value.chars().count() <= 4 {
        return "****".to_string();
    }
    let prefix: String = value.chars().take(4).collect();
    format!("{}****", prefix)
}

fn check_field(name: &str, value: &str) -> Result<(), DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::InvalidCredentials(format!("{} is empty", name)));
    }
    if PLACEHOLDERS.contains(&trimmed.to_lowercase().as_str()) {
        return Err(DomainError::InvalidCredentials(format!(
            "{} is still set to a placeholder value",
            name
        )));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_credentials() {
        let creds = OkxCredentials::new("abcd1234", "s3cret", "pass").unwrap();
        assert_eq!(creds.api_key(), "abcd1234");
        assert_eq!(creds.api_secret(), "s3cret");
        assert_eq!(creds.passphrase(), "pass");
    }

    #[test]
    fn test_placeholder_rejected() {
        let err = OkxCredentials::new("your-api-key", "s3cret", "pass").unwrap_err();
        assert!(err.to_string().contains("api key"));

        assert!(OkxCredentials::new("abcd1234", "s3cret", "YOUR-PASSPHRASE").is_err());
        assert!(OkxCredentials::new("abcd1234", "", "pass").is_err());
    }

    #[test]
    fn test_debug_does_not_leak() {
        let creds = OkxCredentials::new("abcd1234", "topsecret", "hunter2").unwrap();
        let debug = format!("{:?}", creds);
        assert!(debug.contains("abcd****"));
        assert!(!debug.contains("topsecret"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_mask_short_values() {
        assert_eq!(mask("abc"), "****");
        assert_eq!(mask("abcdef"), "abcd****");
    }
}
