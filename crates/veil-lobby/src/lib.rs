//! Matchmaking for the Veil relay.
//!
//! Two independent flows feed session creation:
//!
//! - **Random pairing**: [`Matchmaker::request_match`] either reserves a
//!   partner from the [`WaitingPool`] or queues the caller.
//! - **Friend calls**: [`Matchmaker::call_friend`] creates an [`Invite`]
//!   that the callee accepts or rejects.
//!
//! Every operation takes the [`PresenceRegistry`](veil_presence::PresenceRegistry)
//! by `&mut`, so the caller holds one lock across "decide", "mark busy"
//! and "remove from pool". That is what keeps two concurrent requests
//! from selecting the same partner.

mod config;
mod error;
mod invite;
mod matchmaker;
mod pool;

pub use config::LobbyConfig;
pub use error::LobbyError;
pub use invite::{Invite, InviteBook};
pub use matchmaker::{MatchOutcome, Matchmaker};
pub use pool::WaitingPool;
