//! Proof relayer for the Trinity coordinator.
//!
//! One watcher per ledger follows the coordinator's event log. Each new
//! operation fans out into proof fetches against the two other ledgers'
//! validators, and every fetched proof is queued on the submission lane of
//! its ledger, where nonces are assigned one transaction at a time.

pub mod client;
pub mod config;
pub mod error;
pub mod lane;
pub mod relay;
pub mod retry;
pub mod watcher;

#[cfg(test)]
pub(crate) mod mock;
