// Parseline supplier scraping backend - server core
//
// This crate sequences per-supplier scraping runs: a Postgres-backed job
// queue drives the collect/reset/parse phase chain, and the external scraper
// subprocess reports progress back over the authenticated callback channel.

pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
