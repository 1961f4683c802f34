//! stagehand - build task scheduler with dependency staging, incremental
//! caching and watch mode

pub mod actions;
pub mod cache;
pub mod cli;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod models;
pub mod parser;
pub mod plan;
pub mod registry;
pub mod templates;
pub mod watcher;
