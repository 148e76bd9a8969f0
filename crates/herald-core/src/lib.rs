//! Core of the Herald notification bot.
//!
//! Framework-agnostic: Telegram lives behind the messaging port implemented in
//! `herald-telegram`. Blocking and CPU work runs on the bounded worker pool in
//! [`executor`].

pub mod callback;
pub mod config;
pub mod domain;
pub mod errors;
pub mod executor;
pub mod fanout;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod notify;
pub mod paging;
pub mod roster;
pub mod security;

pub use errors::{Error, Result};
