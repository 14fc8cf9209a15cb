//! Fragment output caching for server-side rendering.
//!
//! Rendering code wraps regions of output in named cache blocks through a
//! per-render [`cache::BlockEngine`]. Blocks nest, derive their keys from the
//! request context, and are invalidated all at once by rotating the generation
//! stamp.

pub mod admin;
pub mod cache;
pub mod config;
pub mod context;
pub mod infra;
