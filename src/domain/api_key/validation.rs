//! API Key validation utilities

use std::net::IpAddr;

use thiserror::Error;

/// Errors that can occur during API key validation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiKeyValidationError {
    #[error("API key ID cannot be empty")]
    EmptyId,

    #[error("API key ID exceeds maximum length of {0} characters")]
    TooLong(usize),

    #[error("API key ID must start with a letter or number")]
    InvalidStart,

    #[error("API key ID must end with a letter or number")]
    InvalidEnd,

    #[error("API key ID contains invalid character: '{0}'. Only alphanumeric characters and hyphens are allowed")]
    InvalidCharacter(char),

    #[error("API key ID cannot contain consecutive hyphens")]
    ConsecutiveHyphens,

    #[error("API key name cannot be empty")]
    EmptyName,

    #[error("API key name exceeds maximum length of {0} characters")]
    NameTooLong(usize),

    #[error("Rate limit '{0}' must be a positive integer")]
    ZeroRateLimit(&'static str),

    #[error("Invalid IP pattern: '{0}'")]
    InvalidIpPattern(String),

    #[error("Invalid domain pattern: '{0}'")]
    InvalidDomainPattern(String),

    #[error("Scope and permission tags cannot be empty")]
    EmptyTag,
}

const MAX_API_KEY_ID_LENGTH: usize = 50;
const MAX_API_KEY_NAME_LENGTH: usize = 100;

/// Validate an API key ID
///
/// Rules:
/// - Cannot be empty
/// - Maximum 50 characters
/// - Only alphanumeric characters and hyphens
/// - Must start and end with alphanumeric
/// - No consecutive hyphens
pub fn validate_api_key_id(id: &str) -> Result<(), ApiKeyValidationError> {
    if id.is_empty() {
        return Err(ApiKeyValidationError::EmptyId);
    }

    if id.len() > MAX_API_KEY_ID_LENGTH {
        return Err(ApiKeyValidationError::TooLong(MAX_API_KEY_ID_LENGTH));
    }

    let chars: Vec<char> = id.chars().collect();

    if !chars[0].is_ascii_alphanumeric() {
        return Err(ApiKeyValidationError::InvalidStart);
    }

    if !chars[chars.len() - 1].is_ascii_alphanumeric() {
        return Err(ApiKeyValidationError::InvalidEnd);
    }

    let mut prev_hyphen = false;

    for c in &chars {
        if *c == '-' {
            if prev_hyphen {
                return Err(ApiKeyValidationError::ConsecutiveHyphens);
            }
            prev_hyphen = true;
        } else if c.is_ascii_alphanumeric() {
            prev_hyphen = false;
        } else {
            return Err(ApiKeyValidationError::InvalidCharacter(*c));
        }
    }

    Ok(())
}

/// Validate a display name for a key
pub fn validate_key_name(name: &str) -> Result<(), ApiKeyValidationError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(ApiKeyValidationError::EmptyName);
    }

    if trimmed.chars().count() > MAX_API_KEY_NAME_LENGTH {
        return Err(ApiKeyValidationError::NameTooLong(MAX_API_KEY_NAME_LENGTH));
    }

    Ok(())
}

/// Validate a scope or permission tag
pub fn validate_tag(tag: &str) -> Result<(), ApiKeyValidationError> {
    if tag.trim().is_empty() {
        return Err(ApiKeyValidationError::EmptyTag);
    }

    Ok(())
}

/// Validate an IP allowlist entry
///
/// Accepted forms: a literal IPv4/IPv6 address, `*`, or a literal prefix
/// followed by a trailing `*` (e.g. `10.0.*`).
pub fn validate_ip_pattern(pattern: &str) -> Result<(), ApiKeyValidationError> {
    if pattern == "*" {
        return Ok(());
    }

    if let Some(prefix) = pattern.strip_suffix('*') {
        let valid = !prefix.is_empty()
            && prefix
                .chars()
                .all(|c| c.is_ascii_hexdigit() || c == '.' || c == ':');

        if valid {
            return Ok(());
        }

        return Err(ApiKeyValidationError::InvalidIpPattern(pattern.to_string()));
    }

    pattern
        .parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| ApiKeyValidationError::InvalidIpPattern(pattern.to_string()))
}

/// Validate a domain allowlist entry
///
/// Accepted forms: `example.com` or `*.example.com`. Both match the domain
/// itself and any subdomain.
pub fn validate_domain_pattern(pattern: &str) -> Result<(), ApiKeyValidationError> {
    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    let valid = !domain.is_empty()
        && domain.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });

    if valid {
        Ok(())
    } else {
        Err(ApiKeyValidationError::InvalidDomainPattern(
            pattern.to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_api_key_ids() {
        assert!(validate_api_key_id("my-api-key").is_ok());
        assert!(validate_api_key_id("key123").is_ok());
        assert!(validate_api_key_id("a").is_ok());
        assert!(validate_api_key_id("key-0f1e2d3c4b5a69788796a5b4c3d2e1f0").is_ok());
    }

    #[test]
    fn test_empty_id() {
        assert_eq!(validate_api_key_id(""), Err(ApiKeyValidationError::EmptyId));
    }

    #[test]
    fn test_too_long_id() {
        let long_id = "a".repeat(51);
        assert_eq!(
            validate_api_key_id(&long_id),
            Err(ApiKeyValidationError::TooLong(50))
        );
    }

    #[test]
    fn test_invalid_boundaries() {
        assert_eq!(
            validate_api_key_id("-key"),
            Err(ApiKeyValidationError::InvalidStart)
        );
        assert_eq!(
            validate_api_key_id("key-"),
            Err(ApiKeyValidationError::InvalidEnd)
        );
    }

    #[test]
    fn test_invalid_character() {
        assert_eq!(
            validate_api_key_id("my_key"),
            Err(ApiKeyValidationError::InvalidCharacter('_'))
        );
        assert_eq!(
            validate_api_key_id("my key"),
            Err(ApiKeyValidationError::InvalidCharacter(' '))
        );
    }

    #[test]
    fn test_consecutive_hyphens() {
        assert_eq!(
            validate_api_key_id("my--key"),
            Err(ApiKeyValidationError::ConsecutiveHyphens)
        );
    }

    #[test]
    fn test_key_name() {
        assert!(validate_key_name("CI deploy key").is_ok());
        assert_eq!(validate_key_name("   "), Err(ApiKeyValidationError::EmptyName));
        assert_eq!(
            validate_key_name(&"n".repeat(101)),
            Err(ApiKeyValidationError::NameTooLong(100))
        );
    }

    #[test]
    fn test_ip_patterns() {
        assert!(validate_ip_pattern("*").is_ok());
        assert!(validate_ip_pattern("192.168.1.10").is_ok());
        assert!(validate_ip_pattern("::1").is_ok());
        assert!(validate_ip_pattern("10.0.*").is_ok());
        assert!(validate_ip_pattern("10.0.0.300").is_err());
        assert!(validate_ip_pattern("localhost").is_err());
        assert!(validate_ip_pattern("10.x.*").is_err());
    }

    #[test]
    fn test_domain_patterns() {
        assert!(validate_domain_pattern("example.com").is_ok());
        assert!(validate_domain_pattern("*.example.com").is_ok());
        assert!(validate_domain_pattern("localhost").is_ok());
        assert!(validate_domain_pattern("").is_err());
        assert!(validate_domain_pattern("bad..com").is_err());
        assert!(validate_domain_pattern("https://example.com").is_err());
        assert!(validate_domain_pattern("-bad.com").is_err());
    }
}
