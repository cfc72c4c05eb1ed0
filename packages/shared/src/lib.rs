//! Shared types, error model, and configuration for recrawl.
//!
//! This crate is the foundation depended on by all other recrawl crates.
//! It provides:
//! - [`RecrawlError`], the unified error type
//! - The status taxonomy ([`Status`]) and record model ([`TrackedRecord`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod record;
pub mod status;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BrowserConfig, DefaultsConfig, HttpConfig, ParseOptions, PipelineConfig,
    RenderOptions, RequestOptions, config_dir, config_file_path, init_config, load_config,
    load_config_from,
};
pub use error::{RecrawlError, Result};
pub use record::{TrackedRecord, default_mergeable};
pub use status::Status;
