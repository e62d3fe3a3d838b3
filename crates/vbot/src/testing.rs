//! Test doubles shared by the router tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::actions::ActionInvoker;
use crate::envelope::ChatReply;
use crate::error::ActionError;

/// Records every action call instead of performing it.
#[derive(Default)]
pub struct RecordingActions {
    fail_deploys: bool,
    deploy_delay: Option<Duration>,
    deploys: AtomicUsize,
    alerts: Mutex<Vec<ChatReply>>,
}

impl RecordingActions {
    /// Recorder whose deploys always fail.
    pub fn failing() -> Self {
        Self {
            fail_deploys: true,
            ..Self::default()
        }
    }

    /// Recorder whose deploys take `delay` to complete.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            deploy_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn deploy_count(&self) -> usize {
        self.deploys.load(Ordering::SeqCst)
    }

    pub fn alerts(&self) -> Vec<ChatReply> {
        self.alerts.lock().unwrap().clone()
    }

    /// Wait for a detached deploy to land, up to one second.
    pub async fn wait_for_alerts(&self, count: usize) {
        for _ in 0..100 {
            if self.alerts.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl ActionInvoker for RecordingActions {
    async fn invoke_deploy(&self) -> Result<(), ActionError> {
        if let Some(delay) = self.deploy_delay {
            tokio::time::sleep(delay).await;
        }
        self.deploys.fetch_add(1, Ordering::SeqCst);
        if self.fail_deploys {
            Err(ActionError::Transport("connection reset by peer".to_string()))
        } else {
            Ok(())
        }
    }

    async fn notify(&self, message: &ChatReply) -> Result<(), ActionError> {
        self.alerts.lock().unwrap().push(message.clone());
        Ok(())
    }
}
