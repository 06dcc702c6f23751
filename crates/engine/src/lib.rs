//! Render-cache engine for prerender.
//!
//! This crate provides the I/O side of the system:
//! - Fast-tier and content-store traits with in-memory implementations
//! - Sliding-window rate limiter
//! - Cache tier orchestrator (lookup / fill / invalidate)
//! - Render-worker contract and job dispatcher
//! - The `RenderService` facade tying the admission pipeline together

pub mod orchestrator;
pub mod ratelimit;
pub mod service;
pub mod store;
pub mod worker;

pub use orchestrator::{CacheStatus, CacheTiers, FillReport, InvalidateReport};
pub use ratelimit::{RateLimitKey, RateLimitStatus, SlidingWindowLimiter, SubjectKind};
pub use service::{RenderService, RequestOutcome, Subject};
pub use store::{ContentStore, FastTier, MemoryContentStore, MemoryFastTier};
pub use worker::{Dispatcher, RenderOutput, RenderRequest, RenderWorker};
