//! Effects out of the reducer.
//!
//! The reducer only mutates state; anything that touches the outside
//! world (engine commands, cache writes, process spawning) comes back as
//! an effect for the runtime to execute. Cache writes in particular are
//! routed through here so this process is the only writer.

use lookout_core::engine::EngineCommand;
use lookout_core::report::{EntryKey, Report};

#[derive(Debug)]
pub enum UiEffect {
    Quit,
    Engine(EngineCommand),
    /// Write the status aggregate now.
    PersistStatus,
    /// Persist a finished report's body blob.
    StoreReport(Box<Report>),
    /// Load a body blob and come back with `UiEvent::BodyLoaded`.
    LoadBody { key: EntryKey, digest: String },
    /// Launch the editor on a file, detached.
    SpawnEditor { path: String },
    /// Open a file with the system handler.
    OpenPath { path: String },
}
