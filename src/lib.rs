pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod server;
pub mod translate;

pub use backend::BackendClient;
pub use config::BridgeConfig;
pub use error::{AuthError, BridgeError, Result};
pub use logging::SharedLogger;
pub use models::ModelResolver;
pub use server::{build_router, AppState};
