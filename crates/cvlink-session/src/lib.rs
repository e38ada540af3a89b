//! # cvlink-session
//!
//! The CVLink programming session: a FIFO request queue, the operational
//! state machine that serializes POM traffic toward the command station,
//! the two TCP stream pairs it owns, and the event surface the
//! application subscribes to.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod config;
pub mod session;
pub mod transport;

// Re-export the types a consumer needs to open a session and react to it.
pub use config::{load_config, save_config, AppConfig, ConfigError};
pub use session::driver::{Session, SessionOptions};
pub use session::events::{SessionEvent, StatusChannel};
pub use session::{SessionState, TransmitChannel};
pub use transport::TransportError;
