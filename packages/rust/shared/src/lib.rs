//! Shared types, error model, configuration, and request context for CampusBot.
//!
//! This crate is the foundation depended on by all other CampusBot crates.
//! It provides:
//! - [`CampusBotError`]: the unified error type, classified by [`ErrorKind`]
//! - Domain types ([`Student`], [`Contact`], [`Course`], [`Syllabus`], [`Sticker`])
//! - Configuration ([`AppConfig`] and its sections, config loading)
//! - [`RequestContext`]: tracing identifiers plus cancellation

pub mod config;
pub mod context;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheConfig, LoggingConfig, MEMORY_STORAGE, MIN_BUSY_TIMEOUT, MetricsConfig,
    ScraperConfig, StorageConfig, SyncMode, WarmupConfig, WarmupSeed, config_dir,
    config_file_path, init_config, load_config, load_config_from, parse_base_urls,
};
pub use context::RequestContext;
pub use error::{CampusBotError, ErrorKind, Result};
pub use types::{
    Contact, ContactType, Course, CourseType, Entity, EntityKind, ProgramCourse, Sticker,
    StickerSource, Student, Syllabus,
};
