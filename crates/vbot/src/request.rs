//! Inbound request envelope and the payloads parsed out of it.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::DispatchError;

/// Marker the scheduler sets on warm-up invocations.
pub const SCHEDULED_EVENT: &str = "Scheduled Event";

/// Transport envelope for a single webhook invocation.
///
/// Deserializes from the hosting layer's invocation document, where the
/// warm-up marker arrives under `detail-type`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InboundRequest {
    /// Request headers as received.
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: HashMap<String, String>,
    /// Raw request body.
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: String,
    /// Synthetic event marker, if any.
    #[serde(default, rename = "detail-type")]
    pub event_source: Option<String>,
}

impl InboundRequest {
    /// Create a request with the given raw body.
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Create a scheduled warm-up invocation.
    #[must_use]
    pub fn scheduled() -> Self {
        Self {
            event_source: Some(SCHEDULED_EVENT.to_string()),
            ..Self::default()
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Look up a header by name, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether this is a warm-up invocation with no real user intent.
    #[must_use]
    pub fn is_warmup(&self) -> bool {
        self.event_source.as_deref() == Some(SCHEDULED_EVENT)
    }

    /// Decode the body as `application/x-www-form-urlencoded`.
    ///
    /// The first occurrence of a repeated field wins. Blank values are kept.
    #[must_use]
    pub fn form(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(self.body.as_bytes()) {
            fields
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        fields
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A parsed Slack slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCommand {
    /// Verification token sent by Slack
    pub token: String,
    /// Invoking user ID
    pub user_id: String,
    /// Slash command name, e.g. `/vbot`
    pub command: String,
    /// Channel the command was issued in
    pub channel_name: String,
    /// Text after the command name
    pub command_text: String,
    /// URL for delayed responses
    pub response_url: String,
}

impl ChatCommand {
    /// Parse a slash command from decoded form fields.
    pub fn from_form(form: &HashMap<String, String>) -> Result<Self, DispatchError> {
        let required = |name: &str| {
            form.get(name)
                .cloned()
                .ok_or(DispatchError::MalformedRequest)
        };
        let optional = |name: &str| form.get(name).cloned().unwrap_or_default();

        Ok(Self {
            token: required("token")?,
            user_id: required("user_id")?,
            command: required("command")?,
            channel_name: optional("channel_name"),
            command_text: optional("text"),
            response_url: optional("response_url"),
        })
    }
}

/// Travis CI build outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildState {
    /// Build passed
    Passed,
    /// Build failed
    Failed,
    /// Any other state (errored, canceled, started, ...)
    Other(String),
}

impl From<Option<String>> for BuildState {
    fn from(state: Option<String>) -> Self {
        match state.as_deref() {
            Some("passed") => Self::Passed,
            Some("failed") => Self::Failed,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Other(String::new()),
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => f.write_str("passed"),
            Self::Failed => f.write_str("failed"),
            Self::Other(state) if state.is_empty() => f.write_str("unknown"),
            Self::Other(state) => f.write_str(state),
        }
    }
}

/// Build metadata from a verified Travis CI notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiBuildEvent {
    /// Build number
    pub build_number: String,
    /// Build page URL
    pub build_url: String,
    /// Build outcome
    pub state: BuildState,
    /// Branch that was built
    pub branch: String,
    /// Repository name
    pub repository_name: String,
    /// Repository owner
    pub owner_name: String,
}

/// Travis CI notification payload (simplified)
#[derive(Debug, Deserialize)]
struct TravisPayload {
    number: Value,
    build_url: String,
    #[serde(default)]
    state: Option<String>,
    branch: String,
    repository: TravisRepository,
}

/// Travis CI repository
#[derive(Debug, Deserialize)]
struct TravisRepository {
    name: String,
    owner_name: String,
}

impl CiBuildEvent {
    /// Decode a payload whose signature has already been verified.
    pub fn from_payload(payload: &str) -> Result<Self, DispatchError> {
        let raw: TravisPayload =
            serde_json::from_str(payload).map_err(|_| DispatchError::MalformedRequest)?;

        let build_number = match raw.number {
            Value::String(number) => number,
            Value::Null => String::new(),
            other => other.to_string(),
        };

        Ok(Self {
            build_number,
            build_url: raw.build_url,
            state: raw.state.into(),
            branch: raw.branch,
            repository_name: raw.repository.name,
            owner_name: raw.repository.owner_name,
        })
    }
}

/// Read `build_url` from an unverified payload.
///
/// Only used to choose which provider's key to fetch; nothing else in the
/// payload is looked at before verification.
#[must_use]
pub fn peek_build_url(payload: &str) -> Option<String> {
    serde_json::from_str::<Value>(payload)
        .ok()?
        .get("build_url")?
        .as_str()
        .map(String::from)
}
