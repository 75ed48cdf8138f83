//! Events into the reducer.

use lookout_core::engine::EngineEvent;
use lookout_core::report::{EntryKey, Report};
use lookout_core::watcher::FsEvent;

/// Everything the event loop can feed the reducer.
#[derive(Debug)]
pub enum UiEvent {
    /// Start of a loop pass with the current terminal size; recomputes
    /// layout before anything else is processed.
    Frame { width: u16, height: u16 },
    /// Cadence event; drives debounced persistence.
    Tick,
    Terminal(crossterm::event::Event),
    Fs(FsEvent),
    Engine(EngineEvent),
    /// A body blob finished loading (or failed to).
    BodyLoaded {
        key: EntryKey,
        report: Option<Report>,
    },
}
