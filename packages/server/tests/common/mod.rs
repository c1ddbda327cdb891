// Common test utilities

pub mod fake_scraper;
pub mod harness;

pub use fake_scraper::*;
pub use harness::*;
