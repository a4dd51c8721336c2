//! Upstream access for CampusBot: fetching, routing, and HTML extraction.
//!
//! This crate provides:
//! - [`Fetcher`]: bounded, retrying HTTP client with origin failover
//! - [`UpstreamRoutes`]: maps entity lookups onto configured origins
//! - [`parsers`]: per-kind page parsers behind [`PageParser`]
//! - [`Upstream`]: the seam the resolver and warmup talk to, implemented
//!   for the real site by [`SiteScraper`]

pub mod client;
pub mod hash;
pub mod parsers;
pub mod programs;
pub mod routes;
pub mod upstream;

pub use client::{FetchedDocument, Fetcher};
pub use hash::compute_content_hash;
pub use parsers::{PageParser, ParsedPage, ParserRegistry};
pub use programs::{DEFAULT_JACCARD_THRESHOLD, match_program_name};
pub use routes::{Route, UpstreamRoutes};
pub use upstream::{SiteScraper, Upstream};
