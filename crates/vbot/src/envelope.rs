//! Response envelope and chat reply types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::error;

/// Status code string for a handled request.
pub const STATUS_OK: &str = "200";
/// Status code string for a rejected request.
pub const STATUS_FAILED: &str = "400";

/// Uniform response shape returned to the hosting layer.
///
/// A success carries a JSON-encoded result; a failure carries the error's
/// message verbatim, not JSON-wrapped. Callers branch on body shape by status,
/// so the asymmetry is part of the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    /// `"200"` or `"400"`
    pub status_code: String,
    /// JSON result or raw error message
    pub body: String,
    /// Always `Content-Type: application/json`
    pub headers: BTreeMap<String, String>,
}

impl ResponseEnvelope {
    /// Build an envelope from a result or an error.
    pub fn build<T, E>(outcome: Result<&T, &E>) -> Self
    where
        T: Serialize + ?Sized,
        E: std::fmt::Display + ?Sized,
    {
        match outcome {
            Ok(result) => match serde_json::to_string(result) {
                Ok(body) => Self::with_body(STATUS_OK, body),
                Err(e) => {
                    error!(error = %e, "Failed to encode response body");
                    Self::with_body(STATUS_FAILED, "Internal error".to_string())
                }
            },
            Err(err) => Self::with_body(STATUS_FAILED, err.to_string()),
        }
    }

    /// Success envelope for a serializable result.
    pub fn success<T: Serialize + ?Sized>(result: &T) -> Self {
        Self::build::<T, str>(Ok(result))
    }

    /// Failure envelope carrying `err`'s message.
    pub fn failure<E: std::fmt::Display + ?Sized>(err: &E) -> Self {
        Self::build::<(), E>(Err(err))
    }

    /// Whether this envelope reports success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }

    fn with_body(status_code: &str, body: String) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            status_code: status_code.to_string(),
            body,
            headers,
        }
    }
}

/// A Slack message body, used both for slash-command replies and alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    /// Message text (Slack mrkdwn)
    pub text: String,
    /// Ordered title/text attachments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ChatReply {
    /// Plain text reply without attachments.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    /// Append an attachment.
    #[must_use]
    pub fn with_attachment(mut self, title: impl Into<String>, text: impl Into<String>) -> Self {
        self.attachments.push(Attachment {
            title: title.into(),
            text: text.into(),
        });
        self
    }
}

/// Slack message attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Attachment title
    pub title: String,
    /// Attachment body
    pub text: String,
}
