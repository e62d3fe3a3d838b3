//! Chat-ops webhook dispatcher.
//!
//! This crate provides:
//! - Slack slash-command routing with shared-token authentication
//! - Travis CI webhook routing with RSA/SHA-1 signature verification
//! - Allow-list authorization for privileged commands
//! - Deploy and alert actions behind the [`ActionInvoker`] trait
//! - A uniform [`ResponseEnvelope`] for every handled request
//! - HTTP server for webhook handling (standalone service)

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod actions;
pub mod authorizer;
pub mod chat;
pub mod ci;
pub mod config;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod request;
pub mod secrets;
pub mod server;
pub mod signature;

#[cfg(test)]
mod testing;

pub use actions::{ActionInvoker, Actions, CommandDeployer, SlackNotifier};
pub use authorizer::is_authorized;
pub use chat::ChatRouter;
pub use ci::{BuildFilter, CiRouter};
pub use config::Config;
pub use envelope::{Attachment, ChatReply, ResponseEnvelope};
pub use error::{ActionError, DispatchError, KeyFetchError, SecretError, SignatureError};
pub use keys::{ProviderVariant, PublicKeySource, TravisKeyFetcher};
pub use request::{BuildState, ChatCommand, CiBuildEvent, InboundRequest};
pub use secrets::{DirectorySecrets, EnvSecrets, SecretProvider, StaticSecrets};
pub use signature::verify_signature;
