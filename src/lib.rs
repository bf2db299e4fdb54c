//! HomeFix Assist - home repair analysis backend
//!
//! A description and/or photo of a household problem goes in; a validated
//! repair plan comes out:
//! - Vision model prompting and strict parsing of its reply
//! - Store links, product pictures and tutorial videos for the plan
//! - Ticket and analysis persistence in SQLite
//! - HTTP API for the frontend

pub mod analysis;
pub mod config;
pub mod core;
pub mod error;
pub mod images;
pub mod llm;
pub mod logging;
pub mod scraper;
pub mod storage;

#[cfg(feature = "api")]
pub mod api;

// Re-export main types for convenience
pub use crate::analysis::RepairAnalysis;
pub use crate::config::AppConfig;
pub use crate::core::HomeFixService;
pub use crate::error::{ContextualError, HomeFixError, HomeFixResult};
