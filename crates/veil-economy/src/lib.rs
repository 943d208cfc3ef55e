//! Session economy for the Veil relay.
//!
//! Random sessions earn coins while their members stay anonymous:
//!
//! ```text
//!  Connected ──quiet period──┬─tick─┬─tick─┬─ … ─┬─ cap (no more ticks)
//!                            │ +1   │ +1   │     │
//!  Revealed ─────────────────┴──────┴──────┴─ +bonus, accrual stops
//!  Ended ──── session count +1 (and reveal count +1 if revealed)
//! ```
//!
//! The pieces:
//!
//! - [`AccrualSchedule`]: a cancellable timer that sits in the session
//!   actor's `tokio::select!` loop, like a tick scheduler with a long
//!   first interval.
//! - [`SessionEconomy`]: the per-session ledger. [`SessionEconomy::dispatch`]
//!   turns a [`SessionEvent`] into a [`Settlement`]: the store writes to
//!   submit, an optional award to announce, and what to do with the
//!   schedule.
//! - [`Store`]: the async persistence interface, with [`MemoryStore`]
//!   for development and tests.
//! - [`StoreWriter`]: submits writes in the background with retries so
//!   session state never waits on the store.
//!
//! # Integration
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         tick = schedule.wait_for_tick() => {
//!             let settlement = economy.dispatch(SessionEvent::Tick { at: tick.at });
//!             writer.submit(settlement.writes);
//!         }
//!     }
//! }
//! ```

mod config;
mod ledger;
mod memory;
mod schedule;
mod store;
mod writer;

pub use config::EconomyConfig;
pub use ledger::{AccrualState, Award, Directive, SessionEconomy, SessionEvent, Settlement};
pub use memory::{MemoryStore, SessionRecord};
pub use schedule::{AccrualSchedule, AccrualTick};
pub use store::{Report, Store, StoreError, StoreWrite, UserStats};
pub use writer::{RetryPolicy, StoreWriter};
