//! Guarded REST access to the upstream API.
//!
//! Every request made through [`GuardedRestClient`] waits for a quota slot,
//! is retried on transient failures and, for bulk symbol lookups, is split
//! into provider-sized batches.

mod client;

pub use client::{GuardedRestClient, GuardedRestClientBuilder};
