//! Core domain + application logic for the compile bot.
//!
//! This crate is intentionally framework-agnostic. The messaging platform and the
//! code execution service live behind ports (traits) implemented in adapter crates.

pub mod bot;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod inbox;
pub mod logging;
pub mod moderation;
pub mod notify;
pub mod ports;
pub mod retry;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, RemoteError, Result};
