//! Terminal frontend for the lookout code monitor.
//!
//! The structure is a reducer loop: [`state::Model`] holds everything,
//! [`update`] mutates it in response to events and returns effects,
//! [`render`] draws it, and [`runtime::TuiRuntime`] owns the terminal
//! and multiplexes the three input streams (keystrokes, filesystem
//! events, worker completions) on a bounded tick.

pub mod effects;
pub mod events;
pub mod layout;
pub mod lscolors;
pub mod render;
pub mod runtime;
pub mod state;
pub mod terminal;
pub mod theme;
pub mod update;
