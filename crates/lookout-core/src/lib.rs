//! Core logic for the lookout code monitor.
//!
//! Everything that does not touch the terminal lives here: file snapshots
//! and the change watcher, the tool registry, the on-disk result cache,
//! the job engine with its worker subprocesses, and the styled-text model
//! that report bodies are made of.

pub mod cache;
pub mod config;
pub mod engine;
pub mod interrupt;
pub mod report;
pub mod snapshot;
pub mod textstyle;
pub mod toolkit;
pub mod watcher;
pub mod worker;
