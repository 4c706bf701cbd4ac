pub mod banner;
pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod metrics;
pub mod node;
pub mod simulator;
