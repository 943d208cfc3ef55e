//! Two-party sessions for the Veil relay.
//!
//! Each session runs as an isolated Tokio task (actor model) that owns
//! its state machine, the reveal handshake and the accrual schedule.
//!
//! # Key types
//!
//! - [`SessionManager`]: creates and ends sessions, maps clients to them
//! - [`SessionHandle`]: send commands to a running session actor
//! - [`SessionState`]: lifecycle state machine
//! - [`SessionConfig`]: economy settings and channel sizing
//! - [`EndReason`]: why a session ended, which decides who is told what

mod config;
mod error;
mod manager;
mod session;

pub use config::{SessionConfig, SessionState};
pub use error::SessionError;
pub use manager::SessionManager;
pub use session::{EndReason, Member, SessionHandle, SessionInfo, SessionSummary};
