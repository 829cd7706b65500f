//! Core library: extraction, backend analysis, folder matching, caching,
//! and the per-file orchestration pipeline.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod deadline;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod index;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod writeback;
