//! Core types and trait definitions for the subwatch reconciliation engine.
//!
//! This crate is deliberately free of network, broker and database
//! dependencies. Every other crate depends on it; it depends on nothing
//! proprietary.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod event;
pub mod model;
pub mod ports;

pub use error::{Error, Result};
