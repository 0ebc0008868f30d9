//! Prompt scenarios
//!
//! One module per LLM use: intent classification, catalog query selection,
//! and narrative generation. Each pairs a system prompt with the structured
//! response the caller validates.

pub mod classify;
pub mod narrative;
pub mod select_queries;
