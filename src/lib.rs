//! # Article Ingest
//!
//! Turns raw feed articles into canonical, sanitized HTML documents with a
//! single representative header image or video embed.
//!
//! ## Architecture
//!
//! Each article flows through the stages in order:
//! 1. **Fetching**: render the article page in a headless browser, with retry ([`fetcher`])
//! 2. **Extraction**: isolate the main content with provider selectors ([`extract`])
//! 3. **Standardization**: canonical `<article>` layout plus a generated header
//!    ([`standardize`], backed by [`media`] and [`images`])
//! 4. **Sanitizing**: strip scripts and presentational attributes ([`sanitize`])
//! 5. **Duplicate check**: URL and recent-title lookups ([`dedup`])
//!
//! [`aggregate::Aggregator`] drives one article through all of them and
//! reports a stored, skipped or failed outcome.

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod html;
pub mod images;
pub mod media;
pub mod models;
pub mod outputs;
pub mod retry;
pub mod sanitize;
pub mod standardize;
pub mod utils;
