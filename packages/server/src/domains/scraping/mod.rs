//! Scraping domain: parsing-session orchestration.
//!
//! The session state machine ([`models::ParsingSession`]) is the single
//! writer of lifecycle state. Phase jobs ([`jobs`]) sequence the external
//! scraper through collect/reset/parse; the callback endpoint ([`callback`])
//! ingests what the scraper reports back.

pub mod callback;
pub mod jobs;
pub mod models;
pub mod scraper;
pub mod stop_reason;
