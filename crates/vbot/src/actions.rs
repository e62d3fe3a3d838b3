//! Privileged actions: deployment and alert notifications.
//!
//! Routers only see the [`ActionInvoker`] trait. Action failures are logged
//! here and never propagate back to the webhook caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::envelope::ChatReply;
use crate::error::ActionError;
use crate::secrets::SecretProvider;

/// Side-effecting actions the routers can trigger.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    /// Run the remote deployment.
    async fn invoke_deploy(&self) -> Result<(), ActionError>;

    /// Post an alert message to the chat alerts channel.
    async fn notify(&self, message: &ChatReply) -> Result<(), ActionError>;
}

/// Run a deploy, then report its outcome as an alert.
///
/// Both failures are logged and swallowed, so this can run detached.
pub async fn deploy_and_report(invoker: Arc<dyn ActionInvoker>, trigger: String) {
    info!(trigger = %trigger, "Starting deployment");

    let alert = match invoker.invoke_deploy().await {
        Ok(()) => {
            info!(trigger = %trigger, "Deployment finished");
            ChatReply::text(format!("Deployment finished :white_check_mark: ({trigger})"))
        }
        Err(e) => {
            error!(trigger = %trigger, error = %e, "Deployment failed");
            ChatReply::text(format!("Deployment failed :x: ({trigger})"))
        }
    };

    match invoker.notify(&alert).await {
        Ok(()) => debug!("Deployment alert posted"),
        Err(ActionError::NotConfigured(what)) => {
            debug!(what = %what, "Alerts not configured, skipping deployment alert");
        }
        Err(e) => error!(error = %e, "Failed to post deployment alert"),
    }
}

/// Runs a fixed local command (typically `ssh host r10k deploy ...`) as the deploy.
#[derive(Debug, Clone)]
pub struct CommandDeployer {
    program: String,
    args: Vec<String>,
}

impl CommandDeployer {
    /// Split a command line on whitespace. Returns `None` for a blank line.
    #[must_use]
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Program that will be executed.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Execute the command and wait for it.
    pub async fn run(&self) -> Result<(), ActionError> {
        debug!(program = %self.program, args = ?self.args, "Running deploy command");

        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ActionError::Transport(format!("failed to start {}: {e}", self.program)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(status = %output.status, stderr = %stderr, "Deploy command failed");
            Err(ActionError::RemoteCommand {
                status: output.status.to_string(),
                stderr,
            })
        }
    }
}

/// Posts alert messages to a Slack incoming webhook.
///
/// The webhook URL is itself a secret and is looked up on every send.
pub struct SlackNotifier {
    hook_secret: String,
    secrets: Arc<dyn SecretProvider>,
    client: reqwest::Client,
}

impl SlackNotifier {
    /// Create a notifier reading its webhook URL from `hook_secret`.
    ///
    /// Each delivery is abandoned after `timeout`.
    pub fn new(
        hook_secret: impl Into<String>,
        secrets: Arc<dyn SecretProvider>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            hook_secret: hook_secret.into(),
            secrets,
            client,
        })
    }

    /// Send one message.
    pub async fn send(&self, message: &ChatReply) -> Result<(), ActionError> {
        let webhook_url = self
            .secrets
            .get(&self.hook_secret)
            .await
            .map_err(|e| ActionError::NotConfigured(e.to_string()))?;

        debug!(channel = "slack", "Sending alert");

        let response = self.client.post(&webhook_url).json(message).send().await?;

        if response.status().is_success() {
            info!(channel = "slack", "Alert posted to Slack channel");
            Ok(())
        } else if response.status() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5);

            warn!(
                channel = "slack",
                retry_after_secs = retry_after,
                "Rate limited by Slack"
            );

            Err(ActionError::Delivery(format!(
                "rate limited, retry after {retry_after}s"
            )))
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                channel = "slack",
                status = %status,
                body = %body,
                "Slack webhook request failed"
            );

            Err(ActionError::Delivery(format!("Slack returned {status}: {body}")))
        }
    }
}

/// Production [`ActionInvoker`]: optional deploy command plus optional Slack alerts.
#[derive(Default)]
pub struct Actions {
    deployer: Option<CommandDeployer>,
    notifier: Option<SlackNotifier>,
}

impl Actions {
    /// Create an invoker with no actions configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deploy command.
    #[must_use]
    pub fn with_deployer(mut self, deployer: CommandDeployer) -> Self {
        self.deployer = Some(deployer);
        self
    }

    /// Set the alert notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: SlackNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

#[async_trait]
impl ActionInvoker for Actions {
    async fn invoke_deploy(&self) -> Result<(), ActionError> {
        let Some(deployer) = &self.deployer else {
            warn!("Deploy requested but VBOT_DEPLOY_COMMAND is not set");
            return Err(ActionError::NotConfigured("deploy command".to_string()));
        };
        deployer.run().await
    }

    async fn notify(&self, message: &ChatReply) -> Result<(), ActionError> {
        let Some(notifier) = &self.notifier else {
            return Err(ActionError::NotConfigured("alerts".to_string()));
        };
        notifier.send(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::StaticSecrets;
    use crate::testing::RecordingActions;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_command_line_split() {
        let deployer = CommandDeployer::from_command_line("  ssh puppet  r10k deploy ").unwrap();
        assert_eq!(deployer.program(), "ssh");
        assert_eq!(deployer.args, vec!["puppet", "r10k", "deploy"]);

        assert!(CommandDeployer::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn test_command_deployer_success_and_failure() {
        let ok = CommandDeployer::from_command_line("true").unwrap();
        assert!(ok.run().await.is_ok());

        let failing = CommandDeployer::from_command_line("false").unwrap();
        assert!(matches!(
            failing.run().await,
            Err(ActionError::RemoteCommand { .. })
        ));

        let missing = CommandDeployer::from_command_line("vbot-no-such-binary --flag").unwrap();
        assert!(matches!(missing.run().await, Err(ActionError::Transport(_))));
    }

    #[tokio::test]
    async fn test_deploy_and_report_posts_outcome() {
        let recorder = Arc::new(RecordingActions::default());
        deploy_and_report(recorder.clone(), "travis build #7".to_string()).await;

        assert_eq!(recorder.deploy_count(), 1);
        let alerts = recorder.alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].text.starts_with("Deployment finished"));
    }

    #[tokio::test]
    async fn test_deploy_failure_is_reported_not_raised() {
        let recorder = Arc::new(RecordingActions::failing());
        deploy_and_report(recorder.clone(), "slack U1".to_string()).await;

        assert_eq!(recorder.deploy_count(), 1);
        let alerts = recorder.alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].text.starts_with("Deployment failed"));
        assert!(!alerts[0].text.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_unconfigured_actions() {
        let actions = Actions::new();
        assert!(matches!(
            actions.invoke_deploy().await,
            Err(ActionError::NotConfigured(_))
        ));
        assert!(matches!(
            actions.notify(&ChatReply::text("x")).await,
            Err(ActionError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_slack_notifier_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(json!({
                "text": "Deployment finished",
                "attachments": [{ "title": "build", "text": "#7" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let secrets = Arc::new(
            StaticSecrets::new().with("SLACK_ALERTS_HOOK_URL", format!("{}/hook", server.uri())),
        );
        let notifier = SlackNotifier::new("SLACK_ALERTS_HOOK_URL", secrets, TIMEOUT).unwrap();

        let message = ChatReply::text("Deployment finished").with_attachment("build", "#7");
        assert!(notifier.send(&message).await.is_ok());
    }

    #[tokio::test]
    async fn test_slack_notifier_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no_service"))
            .mount(&server)
            .await;

        let secrets: Arc<dyn SecretProvider> = Arc::new(
            StaticSecrets::new()
                .with("limited", format!("{}/limited", server.uri()))
                .with("gone", format!("{}/gone", server.uri())),
        );

        let limited = SlackNotifier::new("limited", secrets.clone(), TIMEOUT).unwrap();
        match limited.send(&ChatReply::text("x")).await {
            Err(ActionError::Delivery(msg)) => assert!(msg.contains("30s")),
            other => panic!("expected delivery error, got {other:?}"),
        }

        let gone = SlackNotifier::new("gone", secrets.clone(), TIMEOUT).unwrap();
        assert!(matches!(
            gone.send(&ChatReply::text("x")).await,
            Err(ActionError::Delivery(_))
        ));

        let unconfigured = SlackNotifier::new("missing", secrets, TIMEOUT).unwrap();
        assert!(matches!(
            unconfigured.send(&ChatReply::text("x")).await,
            Err(ActionError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_slack_notifier_gives_up_on_stalled_hook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stalled"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let secrets = Arc::new(
            StaticSecrets::new().with("stalled", format!("{}/stalled", server.uri())),
        );
        let notifier =
            SlackNotifier::new("stalled", secrets, Duration::from_millis(100)).unwrap();

        let started = std::time::Instant::now();
        let result = notifier.send(&ChatReply::text("x")).await;

        assert!(matches!(result, Err(ActionError::Delivery(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
