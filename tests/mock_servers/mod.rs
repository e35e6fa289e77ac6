//! Mock servers for integration testing
//!
//! These mock servers simulate the app backend and the Janus media server,
//! allowing full integration testing without real services.

pub mod backend;
pub mod janus;

pub use backend::{MockBackend, Notification};
pub use janus::MockJanusServer;
