//! Slack slash-command routing.
//!
//! Every outcome, including authentication failures, is a normal chat reply
//! with a success status: Slack renders the body and ignores the status code.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use subtle::ConstantTimeEq;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::actions::{deploy_and_report, ActionInvoker};
use crate::authorizer::is_authorized;
use crate::config::ChatConfig;
use crate::envelope::{ChatReply, ResponseEnvelope};
use crate::request::{ChatCommand, InboundRequest};
use crate::secrets::SecretProvider;

/// Log target for security-relevant events.
pub const AUDIT_TARGET: &str = "vbot::audit";

const INVALID_TOKEN: &str = "Invalid request token :cry:";
const MALFORMED: &str = "Malformed request :cry:";
const NOT_ALLOWED: &str = "You are not on the allowed user list :cry:";
const DEPLOY_STARTED: &str = "Deployment in progress :hourglass_flowing_sand:";

/// Recognized subcommands (the text after the slash command).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subcommand {
    Help,
    DeployR10k,
}

impl Subcommand {
    fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "help" => Some(Self::Help),
            "deploy r10k" => Some(Self::DeployR10k),
            _ => None,
        }
    }
}

/// Routes Slack slash commands.
///
/// Deploys run after the reply is produced. They are tracked so a caller can
/// wait for them with [`ChatRouter::wait_for_deploys`] before exiting.
pub struct ChatRouter {
    config: ChatConfig,
    secrets: Arc<dyn SecretProvider>,
    actions: Arc<dyn ActionInvoker>,
    deploys: Mutex<JoinSet<()>>,
}

impl ChatRouter {
    /// Create a router with its collaborators.
    #[must_use]
    pub fn new(
        config: ChatConfig,
        secrets: Arc<dyn SecretProvider>,
        actions: Arc<dyn ActionInvoker>,
    ) -> Self {
        Self {
            config,
            secrets,
            actions,
            deploys: Mutex::new(JoinSet::new()),
        }
    }

    /// Wait for every deploy started so far to finish and report.
    pub async fn wait_for_deploys(&self) {
        let mut pending = std::mem::take(&mut *self.deploys());
        if !pending.is_empty() {
            info!(count = pending.len(), "Waiting for running deployments");
        }
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Deployment task did not complete");
            }
        }
    }

    fn deploys(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.deploys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle one invocation. Warm-up invocations produce no response at all.
    pub async fn handle(&self, request: &InboundRequest) -> Option<ResponseEnvelope> {
        if request.is_warmup() {
            debug!("Skipping scheduled warm-up invocation");
            return None;
        }

        let reply = self.reply_to(request).await;
        Some(ResponseEnvelope::success(&reply))
    }

    /// Produce the chat reply for a (non warm-up) request.
    pub async fn reply_to(&self, request: &InboundRequest) -> ChatReply {
        let command = match ChatCommand::from_form(&request.form()) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Rejecting slash command with missing fields");
                return ChatReply::text(MALFORMED);
            }
        };

        if !self.authenticate(&command).await {
            return ChatReply::text(INVALID_TOKEN);
        }

        if command.command != self.config.command {
            warn!(
                user = %command.user_id,
                command = %command.command,
                channel = %command.channel_name,
                "Unknown command"
            );
            return ChatReply::text(format!("Unknown command \"{}\" :cry:", command.command));
        }

        match Subcommand::parse(&command.command_text) {
            Some(Subcommand::Help) => usage(),
            Some(Subcommand::DeployR10k) => self.deploy(&command),
            None => {
                warn!(
                    user = %command.user_id,
                    channel = %command.channel_name,
                    text = %command.command_text,
                    "Unknown action"
                );
                ChatReply::text(format!(
                    "Unknown action \"{}\" :cry:; try \"{} help\"",
                    command.command_text, self.config.command
                ))
            }
        }
    }

    async fn authenticate(&self, command: &ChatCommand) -> bool {
        let expected = match self.secrets.get(&self.config.token_secret).await {
            Ok(token) => token,
            Err(e) => {
                error!(
                    secret = %self.config.token_secret,
                    error = %e,
                    "Unable to load Slack verification token"
                );
                return false;
            }
        };

        if expected.is_empty() {
            error!(secret = %self.config.token_secret, "Slack verification token is empty");
            return false;
        }

        let matches: bool = command.token.as_bytes().ct_eq(expected.as_bytes()).into();
        if !matches {
            error!(
                user = %command.user_id,
                command = %command.command,
                channel = %command.channel_name,
                "Request token does not match expected"
            );
        }
        matches
    }

    fn deploy(&self, command: &ChatCommand) -> ChatReply {
        if !is_authorized(&command.user_id, &self.config.deploy_allowed_users) {
            warn!(
                target: AUDIT_TARGET,
                user = %command.user_id,
                command = %command.command,
                channel = %command.channel_name,
                text = %command.command_text,
                "Unauthorized user tried to run a privileged command"
            );
            return ChatReply::text(NOT_ALLOWED);
        }

        info!(
            target: AUDIT_TARGET,
            user = %command.user_id,
            command = %command.command,
            channel = %command.channel_name,
            text = %command.command_text,
            "Authorized user invoked a privileged command"
        );

        let trigger = format!(
            "{} {} by <@{}>",
            command.command,
            command.command_text.trim(),
            command.user_id
        );
        let mut deploys = self.deploys();
        // Reap finished deploys so the set only holds running ones.
        while deploys.try_join_next().is_some() {}
        deploys.spawn(deploy_and_report(Arc::clone(&self.actions), trigger));

        ChatReply::text(DEPLOY_STARTED)
    }
}

/// Static usage reply for `help`.
fn usage() -> ChatReply {
    ChatReply::text("*USAGE*")
        .with_attachment("help", "Shows this")
        .with_attachment("deploy r10k", "Deploys Puppet Master changes via SSH")
}
