//! Configuration for the vbot service.
//!
//! Every value is read from the environment once at startup. Secret values
//! themselves are never stored here, only the names under which the
//! [`crate::SecretProvider`] looks them up.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::ci::BuildFilter;
use crate::keys::{ProviderVariant, TRAVIS_COM_CONFIG_URL, TRAVIS_ORG_CONFIG_URL};

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// Directory holding one file per secret (secrets come from the environment when unset).
    pub secrets_dir: Option<PathBuf>,
    /// Slash-command settings.
    pub chat: ChatConfig,
    /// Travis CI webhook settings.
    pub ci: CiConfig,
    /// Deploy and alert action settings.
    pub actions: ActionsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: env::var("VBOT_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
            secrets_dir: env::var("VBOT_SECRETS_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            chat: ChatConfig::default(),
            ci: CiConfig::default(),
            actions: ActionsConfig::default(),
        }
    }
}

/// Slash-command configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// The only top-level command this service answers.
    pub command: String,
    /// Secret name holding the Slack verification token.
    pub token_secret: String,
    /// Comma-separated Slack user IDs allowed to run `deploy r10k`.
    pub deploy_allowed_users: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            command: env::var("VBOT_CHAT_COMMAND").unwrap_or_else(|_| "/vbot".to_string()),
            token_secret: env::var("VBOT_CHAT_TOKEN_SECRET")
                .unwrap_or_else(|_| "SLACK_VERIFICATION_TOKEN".to_string()),
            deploy_allowed_users: env::var("VBOT_DEPLOY_ALLOWED_USERS").unwrap_or_default(),
        }
    }
}

/// Travis CI webhook configuration.
#[derive(Debug, Clone)]
pub struct CiConfig {
    /// Which builds trigger a deploy.
    pub build_filter: BuildFilter,
    /// Provider used when the build URL does not identify one.
    pub default_provider: ProviderVariant,
    /// Config endpoint for travis-ci.com.
    pub com_config_url: String,
    /// Config endpoint for travis-ci.org.
    pub org_config_url: String,
    /// Hard timeout for the public key request.
    pub key_fetch_timeout: Duration,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            build_filter: BuildFilter {
                owner: env::var("VBOT_CI_OWNER").unwrap_or_else(|_| "vghn".to_string()),
                repository: env::var("VBOT_CI_REPOSITORY")
                    .unwrap_or_else(|_| "puppet".to_string()),
                require_passed: env::var("VBOT_CI_REQUIRE_PASSED")
                    .map(|v| !(v.eq_ignore_ascii_case("false") || v == "0"))
                    .unwrap_or(true),
                branch: env::var("VBOT_CI_BRANCH").ok().filter(|s| !s.is_empty()),
            },
            default_provider: env::var("VBOT_CI_DEFAULT_PROVIDER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(ProviderVariant::Com),
            com_config_url: env::var("TRAVIS_COM_CONFIG_URL")
                .unwrap_or_else(|_| TRAVIS_COM_CONFIG_URL.to_string()),
            org_config_url: env::var("TRAVIS_ORG_CONFIG_URL")
                .unwrap_or_else(|_| TRAVIS_ORG_CONFIG_URL.to_string()),
            key_fetch_timeout: Duration::from_secs(
                env::var("VBOT_KEY_FETCH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }
}

/// Deploy and alert action configuration.
#[derive(Debug, Clone)]
pub struct ActionsConfig {
    /// Command line run for a deploy, split on whitespace (deploys are disabled when unset).
    pub deploy_command: Option<String>,
    /// Secret name holding the Slack incoming-webhook URL for alerts.
    pub alerts_hook_secret: String,
    /// Upper bound on a single alert delivery.
    pub alerts_timeout: Duration,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            deploy_command: env::var("VBOT_DEPLOY_COMMAND")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            alerts_hook_secret: env::var("VBOT_ALERTS_HOOK_SECRET")
                .unwrap_or_else(|_| "SLACK_ALERTS_HOOK_URL".to_string()),
            alerts_timeout: Duration::from_secs(
                env::var("VBOT_ALERTS_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "VBOT_PORT",
        "VBOT_SECRETS_DIR",
        "VBOT_CHAT_COMMAND",
        "VBOT_CHAT_TOKEN_SECRET",
        "VBOT_DEPLOY_ALLOWED_USERS",
        "VBOT_CI_OWNER",
        "VBOT_CI_REPOSITORY",
        "VBOT_CI_REQUIRE_PASSED",
        "VBOT_CI_BRANCH",
        "VBOT_CI_DEFAULT_PROVIDER",
        "TRAVIS_COM_CONFIG_URL",
        "TRAVIS_ORG_CONFIG_URL",
        "VBOT_KEY_FETCH_TIMEOUT_SECS",
        "VBOT_DEPLOY_COMMAND",
        "VBOT_ALERTS_HOOK_SECRET",
        "VBOT_ALERTS_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_default_config() {
        clear_env();

        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert!(config.secrets_dir.is_none());
        assert_eq!(config.chat.command, "/vbot");
        assert_eq!(config.chat.token_secret, "SLACK_VERIFICATION_TOKEN");
        assert!(config.chat.deploy_allowed_users.is_empty());
        assert_eq!(config.ci.build_filter.owner, "vghn");
        assert_eq!(config.ci.build_filter.repository, "puppet");
        assert!(config.ci.build_filter.require_passed);
        assert!(config.ci.build_filter.branch.is_none());
        assert_eq!(config.ci.default_provider, ProviderVariant::Com);
        assert_eq!(config.ci.com_config_url, TRAVIS_COM_CONFIG_URL);
        assert_eq!(config.ci.key_fetch_timeout, Duration::from_secs(5));
        assert!(config.actions.deploy_command.is_none());
        assert_eq!(config.actions.alerts_hook_secret, "SLACK_ALERTS_HOOK_URL");
        assert_eq!(config.actions.alerts_timeout, Duration::from_secs(10));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_env();

        env::set_var("VBOT_PORT", "9000");
        env::set_var("VBOT_DEPLOY_ALLOWED_USERS", "U0474LR06, U999");
        env::set_var("VBOT_CI_REQUIRE_PASSED", "false");
        env::set_var("VBOT_CI_BRANCH", "production");
        env::set_var("VBOT_CI_DEFAULT_PROVIDER", "org");
        env::set_var("VBOT_KEY_FETCH_TIMEOUT_SECS", "2");
        env::set_var("VBOT_DEPLOY_COMMAND", "ssh puppet r10k deploy environment");
        env::set_var("VBOT_ALERTS_TIMEOUT_SECS", "3");

        let config = Config::default();
        assert_eq!(config.port, 9000);
        assert_eq!(config.chat.deploy_allowed_users, "U0474LR06, U999");
        assert!(!config.ci.build_filter.require_passed);
        assert_eq!(config.ci.build_filter.branch.as_deref(), Some("production"));
        assert_eq!(config.ci.default_provider, ProviderVariant::Org);
        assert_eq!(config.ci.key_fetch_timeout, Duration::from_secs(2));
        assert_eq!(
            config.actions.deploy_command.as_deref(),
            Some("ssh puppet r10k deploy environment")
        );
        assert_eq!(config.actions.alerts_timeout, Duration::from_secs(3));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back_to_defaults() {
        clear_env();

        env::set_var("VBOT_PORT", "not-a-port");
        env::set_var("VBOT_CI_DEFAULT_PROVIDER", "gitlab");
        env::set_var("VBOT_DEPLOY_COMMAND", "   ");

        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.ci.default_provider, ProviderVariant::Com);
        assert!(config.actions.deploy_command.is_none());

        clear_env();
    }
}
