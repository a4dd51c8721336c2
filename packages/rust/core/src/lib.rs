//! Cache-and-scrape coordination for CampusBot.
//!
//! - [`Resolver`] answers lookups through three tiers: indexed substring
//!   search, fuzzy character-set search over the cache, then the upstream
//!   site under single-flight with write-back
//! - [`Scheduler`] keeps the cache warm: startup seeding, soft-TTL refresh,
//!   and hard-TTL cleanup
//! - [`CampusBot`] wires both to a hot-swappable store and exposes the
//!   handler API

pub mod app;
pub mod resolver;
pub mod singleflight;
pub mod warmup;
pub mod writeback;

#[cfg(test)]
mod test_support;

pub use app::{AppStats, CampusBot};
pub use resolver::{Resolved, Resolver, ResolverStatsSnapshot, Tier, sort_and_cap};
pub use singleflight::SingleFlight;
pub use warmup::{CleanupReport, RefreshReport, Scheduler, WarmupReport};
pub use writeback::{Persisted, WritePolicy, persist};
