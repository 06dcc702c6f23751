//! Core types and shared functionality for prerender.
//!
//! This crate provides:
//! - URL normalization and cache/storage key derivation
//! - SSRF validation for render targets
//! - SQLite-backed page-metadata and render-job tables
//! - Unified error types
//! - Configuration structures

pub mod config;
pub mod db;
pub mod error;
pub mod keys;
pub mod normalize;
pub mod retry;
pub mod ssrf;

pub use config::AppConfig;
pub use db::{Admitted, CachedPage, JobStatus, MetaDb, RenderJob, StorageLocation};
pub use error::{Error, RenderFailureKind};
pub use normalize::NormalizedUrl;
pub use retry::RetryPolicy;
