//! Core types and services for the carematch interview-token ledger.
//!
//! This crate is deliberately free of HTTP and database dependencies. Storage
//! backends implement [`store::DocumentStore`]; every mutation in this crate
//! goes through [`coordinator::ConsistencyCoordinator`], which turns the
//! store's single-document compare-and-swap into a bounded retry loop.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod account;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod gate;
pub mod ids;
pub mod ledger;
pub mod rating;
pub mod reward;
pub mod services;
pub mod store;
pub mod subscription;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
