//! rorscrape - land-record scrape orchestration engine.
//!
//! Drives many isolated browser sessions through the rural land-record
//! form (district, taluka, village, survey), solves the per-submission
//! image captcha through a provider fallback chain, and turns each
//! harvested page into a normalized [`models::StructuredRecord`].
//! Completed work is tracked in a [`ledger::Ledger`] so interrupted runs
//! resume where they stopped.

pub mod archive;
pub mod browser;
pub mod captcha;
pub mod config;
pub mod extract;
pub mod ledger;
pub mod locale;
pub mod models;
pub mod retry;
pub mod scheduler;
pub mod session;
