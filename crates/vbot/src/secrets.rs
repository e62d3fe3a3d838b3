//! Secret retrieval.
//!
//! Routers only know secrets by logical name. Where the value actually comes
//! from (environment, a mounted secrets directory, a fixed map in tests) is
//! decided once at startup.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::SecretError;

/// Source of decrypted secret values.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Look up a secret by name.
    async fn get(&self, name: &str) -> Result<String, SecretError>;
}

/// Reads secrets from environment variables of the same name.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

#[async_trait]
impl SecretProvider for EnvSecrets {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            Ok(_) | Err(std::env::VarError::NotPresent) => {
                Err(SecretError::NotFound(name.to_string()))
            }
            Err(std::env::VarError::NotUnicode(_)) => {
                Err(SecretError::AccessDenied(name.to_string()))
            }
        }
    }
}

/// Reads secrets from a directory holding one file per secret.
///
/// Matches the layout of mounted Kubernetes or Docker secrets. A single
/// trailing newline is stripped from the file contents.
#[derive(Debug, Clone)]
pub struct DirectorySecrets {
    root: PathBuf,
}

impl DirectorySecrets {
    /// Create a provider rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SecretProvider for DirectorySecrets {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        // Secret names may look like paths ("/vbot/SlackVerificationToken");
        // keep lookups inside the root.
        let relative = name.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').any(|part| part == "..") {
            return Err(SecretError::AccessDenied(name.to_string()));
        }

        let path = self.root.join(relative);
        debug!(path = %path.display(), "Reading secret file");

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let value = contents
                    .strip_suffix('\n')
                    .map(|v| v.strip_suffix('\r').unwrap_or(v))
                    .unwrap_or(&contents);
                Ok(value.to_string())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SecretError::NotFound(name.to_string()))
            }
            Err(_) => Err(SecretError::AccessDenied(name.to_string())),
        }
    }
}

/// Fixed in-memory secrets.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretProvider for StaticSecrets {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vbot-secrets-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    #[serial]
    async fn test_env_secrets() {
        std::env::set_var("VBOT_TEST_SECRET", "s3cret");
        std::env::set_var("VBOT_TEST_EMPTY_SECRET", "");

        let secrets = EnvSecrets;
        assert_eq!(secrets.get("VBOT_TEST_SECRET").await.unwrap(), "s3cret");
        assert!(matches!(
            secrets.get("VBOT_TEST_EMPTY_SECRET").await,
            Err(SecretError::NotFound(_))
        ));
        assert!(matches!(
            secrets.get("VBOT_TEST_MISSING_SECRET").await,
            Err(SecretError::NotFound(_))
        ));

        std::env::remove_var("VBOT_TEST_SECRET");
        std::env::remove_var("VBOT_TEST_EMPTY_SECRET");
    }

    #[tokio::test]
    async fn test_directory_secrets() {
        let dir = scratch_dir("read");
        std::fs::create_dir_all(dir.join("vbot")).unwrap();
        std::fs::write(dir.join("vbot/SlackVerificationToken"), "tok3n\n").unwrap();
        std::fs::write(dir.join("SLACK_ALERTS_HOOK_URL"), "https://hooks.example/x").unwrap();

        let secrets = DirectorySecrets::new(&dir);
        assert_eq!(
            secrets.get("/vbot/SlackVerificationToken").await.unwrap(),
            "tok3n"
        );
        assert_eq!(
            secrets.get("SLACK_ALERTS_HOOK_URL").await.unwrap(),
            "https://hooks.example/x"
        );
        assert!(matches!(
            secrets.get("missing").await,
            Err(SecretError::NotFound(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_directory_secrets_stay_inside_root() {
        let dir = scratch_dir("escape");
        let secrets = DirectorySecrets::new(&dir);

        assert!(matches!(
            secrets.get("../etc/passwd").await,
            Err(SecretError::AccessDenied(_))
        ));
        assert!(matches!(
            secrets.get("/").await,
            Err(SecretError::AccessDenied(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_static_secrets() {
        let secrets = StaticSecrets::new().with("token", "abc");
        assert_eq!(secrets.get("token").await.unwrap(), "abc");
        assert!(secrets.get("other").await.is_err());
    }
}
