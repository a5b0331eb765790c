//! Core types, collaborator traits and the subscription dispatcher.
//!
//! This crate knows nothing about HTTP or any particular database. The
//! registry, the transport and the GraphQL engine are traits; concrete
//! backends live in sibling crates (e.g. `subcast-store-sqlite`).

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod dispatcher;
pub mod document;
pub mod engine;
pub mod error;
pub mod events;
pub mod hooks;
pub mod outcome;
pub mod projection;
pub mod record;
pub mod registry;
pub mod retry;
pub mod topics;
pub mod transport;
pub mod validator;

#[cfg(test)]
mod testing;

pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{Error, ErrorContext, Result, Scope};
