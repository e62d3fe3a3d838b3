//! Error types for webhook dispatch.

use thiserror::Error;

/// Errors returned by a [`crate::SecretProvider`].
#[derive(Debug, Error)]
pub enum SecretError {
    /// No secret exists under the requested name.
    #[error("secret not found: {0}")]
    NotFound(String),

    /// The secret exists but could not be read.
    #[error("access denied to secret: {0}")]
    AccessDenied(String),
}

/// Errors that can occur while fetching the CI provider's public key.
///
/// These carry transport detail for logging only. Routers convert them into
/// a [`DispatchError`] with a fixed message before anything reaches a caller.
#[derive(Debug, Error)]
pub enum KeyFetchError {
    /// The config endpoint did not answer within the timeout.
    #[error("timed out fetching public key from {url}")]
    Timeout {
        /// Endpoint that timed out
        url: String,
    },

    /// Connection, TLS or other transport failure.
    #[error("transport error fetching public key: {0}")]
    Transport(#[source] reqwest::Error),

    /// The endpoint answered, but not with a usable key.
    #[error("protocol error fetching public key: {0}")]
    Protocol(String),
}

impl KeyFetchError {
    /// Classify a reqwest failure for the given endpoint.
    #[must_use]
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Transport(err)
        }
    }
}

/// Signature verification failed.
///
/// Carries no detail; the cause is only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unauthorized")]
pub struct SignatureError;

/// Errors raised by deploy and notify actions.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The deploy command could not be started or the request never completed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote command ran and reported failure.
    #[error("remote command failed with {status}: {stderr}")]
    RemoteCommand {
        /// Exit status description
        status: String,
        /// Trimmed standard error output
        stderr: String,
    },

    /// The notification could not be delivered.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The action has no backing configuration.
    #[error("action not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for ActionError {
    fn from(err: reqwest::Error) -> Self {
        Self::Delivery(err.to_string())
    }
}

/// Failures a router reports back to the webhook caller.
///
/// The `Display` text of each variant is the exact body of the failure
/// envelope, so it must never include upstream error detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The request body is missing required fields or is not decodable.
    #[error("Malformed request")]
    MalformedRequest,

    /// Chat token mismatch.
    #[error("Invalid request token")]
    Unauthenticated,

    /// Signature check failed, or the caller is not allowed to run the command.
    #[error("Unauthorized")]
    Unauthorized,

    /// Public key endpoint timed out.
    #[error("Timed out when attempting to retrieve Travis CI public key")]
    KeyFetchTimeout,

    /// Public key endpoint was unreachable.
    #[error("Failed to retrieve Travis CI public key")]
    KeyFetchTransport,

    /// Public key endpoint returned an unusable response.
    #[error("Failed to retrieve Travis CI public key")]
    KeyFetchProtocol,
}

impl From<&KeyFetchError> for DispatchError {
    fn from(err: &KeyFetchError) -> Self {
        match err {
            KeyFetchError::Timeout { .. } => Self::KeyFetchTimeout,
            KeyFetchError::Transport(_) => Self::KeyFetchTransport,
            KeyFetchError::Protocol(_) => Self::KeyFetchProtocol,
        }
    }
}

impl From<SignatureError> for DispatchError {
    fn from(_: SignatureError) -> Self {
        Self::Unauthorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_fetch_errors_map_to_fixed_messages() {
        let timeout = KeyFetchError::Timeout {
            url: "https://api.travis-ci.com/config".to_string(),
        };
        let protocol = KeyFetchError::Protocol("missing public_key at 10.0.0.7".to_string());

        let timeout_msg = DispatchError::from(&timeout).to_string();
        let protocol_msg = DispatchError::from(&protocol).to_string();

        assert_eq!(
            timeout_msg,
            "Timed out when attempting to retrieve Travis CI public key"
        );
        assert_eq!(protocol_msg, "Failed to retrieve Travis CI public key");
        assert!(!timeout_msg.contains("api.travis-ci.com"));
        assert!(!protocol_msg.contains("10.0.0.7"));
    }

    #[test]
    fn test_signature_error_is_unauthorized() {
        assert_eq!(
            DispatchError::from(SignatureError),
            DispatchError::Unauthorized
        );
        assert_eq!(SignatureError.to_string(), "Unauthorized");
    }
}
