//! GitHub authorization for the completion backend.
//!
//! A long-lived GitHub token is kept in a [`CredentialStore`]; the
//! [`CredentialManager`] trades it for short-lived backend tokens and runs the
//! OAuth device flow when it is missing or rejected.

pub mod device_flow;
pub mod manager;
pub mod store;

pub use device_flow::DeviceAuthorization;
pub use manager::{ApiToken, ConsolePrompt, CredentialManager, OperatorPrompt};
pub use store::{AuthCredential, CredentialStore};
