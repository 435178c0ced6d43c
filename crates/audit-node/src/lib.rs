//! HTTP surface for the audit ledger.

pub mod config;
pub mod constants;
pub mod error;
pub mod routes;

pub use config::NodeConfig;
pub use error::ApiError;
pub use routes::{router, AppState};
